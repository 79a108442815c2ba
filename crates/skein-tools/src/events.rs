// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Downstream completion events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exchange carrying task-completion events for the space digester.
pub const SPACE_TASK_EXCHANGE: &str = "space.task";
/// Routing key (and queue name) for newly completed tasks.
pub const SPACE_TASK_NEW_COMPLETE: &str = "space.task.new.complete";

/// Published once each time a tool call transitions a task to `success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaskComplete {
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub task_id: Uuid,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Exchange, routing-key and queue names of the session-message pipeline.
//! The names are contract: external producers publish against them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_MESSAGE_EXCHANGE: &str = "session.message";

/// New-message notifications from ingress.
pub const RK_INSERT: &str = "session.message.insert";
pub const QUEUE_INSERT_ENTRY: &str = "session.message.insert.entry";

/// Parking queue for lock-contended notifications.  Messages sit for the
/// session-lock-wait TTL, then dead-letter back to [`RK_INSERT`].
pub const RK_INSERT_RETRY: &str = "session.message.insert.retry";
pub const QUEUE_INSERT_RETRY: &str = "session.message.insert.retry";

/// Flush-regardless-of-threshold notifications (idle timeout path).
pub const RK_BUFFER_PROCESS: &str = "session.message.buffer.process";
pub const QUEUE_BUFFER_PROCESS: &str = "session.message.buffer.process";

/// Body of every message on the `session.message` exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertNewMessage {
    pub project_id: Uuid,
    pub session_id: Uuid,
    pub message_id: Uuid,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The task tool set and its registry wiring.

mod append;
mod append_planning;
mod finish;
mod insert;
mod update;

pub use append::AppendMessagesToTaskTool;
pub use append_planning::AppendMessagesToPlanningTool;
pub use finish::FinishTool;
pub use insert::InsertTaskTool;
pub use update::UpdateTaskTool;

use skein_broker::Publisher;
use skein_store::Database;

use crate::ToolRegistry;

/// Name of the loop-terminating tool.  The agent loop intercepts it before
/// dispatch; the registered handler only exists so the schema reaches the
/// model.
pub const FINISH_TOOL: &str = "finish";

/// Registry with the full task tool set bound to the given stores.
pub fn task_tool_registry(db: Database, publisher: Publisher) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(InsertTaskTool::new(db.clone()));
    registry.register(UpdateTaskTool::new(db.clone(), publisher));
    registry.register(AppendMessagesToTaskTool::new(db.clone()));
    registry.register(AppendMessagesToPlanningTool::new(db));
    registry.register(FinishTool);
    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

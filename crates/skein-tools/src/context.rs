// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use skein_store::{Database, StoreError, TaskRecord};
use uuid::Uuid;

/// Snapshot of the task index a tool handler resolves against.
///
/// The model refers to tasks by 1-based `task_order` and to batch messages by
/// 0-based index; `task_ids_index` / `message_ids_index` translate those to
/// real ids.  The snapshot is immutable — after a tool that invalidates it
/// (task insertion shifts orders), the agent loop builds a fresh one rather
/// than patching this in place.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub project_id: Uuid,
    pub session_id: Uuid,
    /// Non-planning task ids, ascending by order (index 0 ⇒ order 1).
    pub task_ids_index: Vec<Uuid>,
    /// Parallel task records for status checks and rendering.
    pub task_index: Vec<TaskRecord>,
    /// The claimed batch's message ids in arrival order.
    pub message_ids_index: Vec<Uuid>,
}

impl TaskContext {
    /// Build a snapshot from the session's current committed task list.
    pub async fn load(
        db: &Database,
        project_id: Uuid,
        session_id: Uuid,
        message_ids: Vec<Uuid>,
    ) -> Result<Self, StoreError> {
        let tasks = db.fetch_ordered_tasks(session_id).await?;
        Ok(Self {
            project_id,
            session_id,
            task_ids_index: tasks.iter().map(|t| t.id).collect(),
            task_index: tasks,
            message_ids_index: message_ids,
        })
    }

    /// Resolve a 1-based task order.  `None` when out of range — the caller
    /// turns that into a textual correction for the model.
    pub fn task_at_order(&self, task_order: i64) -> Option<&TaskRecord> {
        if task_order < 1 {
            return None;
        }
        self.task_index.get(task_order as usize - 1)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

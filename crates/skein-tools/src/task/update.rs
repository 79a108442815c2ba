// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use skein_broker::Publisher;
use skein_store::{Database, ProcessStatus};

use crate::events::{NewTaskComplete, SPACE_TASK_EXCHANGE, SPACE_TASK_NEW_COMPLETE};
use crate::{TaskContext, Tool};

/// Updates a task's status and/or description; completion transitions emit a
/// downstream event.
pub struct UpdateTaskTool {
    db: Database,
    publisher: Publisher,
}

impl UpdateTaskTool {
    pub fn new(db: Database, publisher: Publisher) -> Self {
        Self { db, publisher }
    }
}

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update an existing task's description and/or status. \
         Use this when task progress changes or task details need modification. \
         Mostly use it to update the task status, if you're confident a task is \
         running, completed or failed. \
         Only when the conversation explicitly mentions that a task's purpose should \
         change should you use this tool to update the task description."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_order": {
                    "type": "integer",
                    "description": "The order number of the task to update.",
                },
                "task_status": {
                    "type": "string",
                    "enum": ["pending", "running", "success", "failed"],
                    "description": "New status for the task (optional).",
                },
                "task_description": {
                    "type": "string",
                    "description": "Updated description for the task, of what should be \
                                    done and what the expected result is, if any (optional).",
                },
            },
            "required": ["task_order"],
        })
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> anyhow::Result<String> {
        let Some(task_order) = args.get("task_order").and_then(Value::as_i64) else {
            return Ok(
                "You must provide a task order argument, so that we can update the task. \
                 Updating failed."
                    .into(),
            );
        };
        let Some(task) = ctx.task_at_order(task_order) else {
            return Ok(format!(
                "Task order {task_order} is out of range, updating failed."
            ));
        };

        let status = match args.get("task_status").and_then(Value::as_str) {
            Some(s) => match ProcessStatus::parse(s) {
                Ok(status) => Some(status),
                Err(_) => {
                    return Ok(format!("Unknown task status {s:?}, updating failed."));
                }
            },
            None => None,
        };
        let patch_data = args
            .get("task_description")
            .and_then(Value::as_str)
            .map(|d| {
                let mut patch = Map::new();
                patch.insert("task_description".into(), json!(d));
                patch
            });

        let updated = self.db.update_task(task.id, status, patch_data).await?;

        if status == Some(ProcessStatus::Success) {
            // Fire-and-forget toward the space digester: the publish never
            // blocks the agent loop and a routing failure is only logged.
            let event = NewTaskComplete {
                project_id: ctx.project_id,
                session_id: ctx.session_id,
                task_id: updated.id,
            };
            match serde_json::to_string(&event) {
                Ok(body) => {
                    self.publisher
                        .publish(SPACE_TASK_EXCHANGE, SPACE_TASK_NEW_COMPLETE, body);
                    info!(task_id = %updated.id, "task completed; digest event published");
                }
                Err(e) => {
                    tracing::warn!(task_id = %updated.id, error = %e, "failed to encode digest event");
                }
            }
        }

        Ok(format!("Task {} updated", updated.order))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

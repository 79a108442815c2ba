// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use skein_store::{Database, ProcessStatus, StoreError};

use crate::{TaskContext, Tool};

/// Creates a new task after the given order, renumbering the tail.
pub struct InsertTaskTool {
    db: Database,
}

impl InsertTaskTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for InsertTaskTool {
    fn name(&self) -> &str {
        "insert_task"
    }

    fn description(&self) -> &str {
        "Create a new task by inserting it after the specified task order. \
         This is used when identifying new tasks from conversation messages."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "after_task_order": {
                    "type": "integer",
                    "description": "The task order after which to insert the new task. \
                                    Use 0 to insert at the beginning.",
                },
                "task_description": {
                    "type": "string",
                    "description": "A clear, concise description of the task, of what \
                                    should be done and what the expected result is, if any.",
                },
            },
            "required": ["after_task_order", "task_description"],
        })
    }

    // Task orders shift on insert; the snapshot the model is resolving
    // against goes stale.
    fn invalidates_context(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> anyhow::Result<String> {
        let Some(after_order) = args.get("after_task_order").and_then(Value::as_i64) else {
            return Ok(
                "You must provide an after_task_order argument, so that we know where to \
                 insert the task. Creating failed."
                    .into(),
            );
        };
        let Some(description) = args.get("task_description").and_then(Value::as_str) else {
            return Ok(
                "You must provide a task_description argument for the new task. Creating failed."
                    .into(),
            );
        };

        let result = self
            .db
            .insert_task(
                ctx.session_id,
                after_order,
                json!({ "task_description": description }),
                ProcessStatus::Pending,
            )
            .await;
        match result {
            Ok(task) => {
                info!(task_id = %task.id, order = task.order, "task created");
                Ok(format!("Task {} created", task.order))
            }
            Err(StoreError::OrderOutOfRange {
                after_order,
                task_count,
            }) => Ok(format!(
                "After task order {after_order} is out of range (0..={task_count}), \
                 creating failed."
            )),
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn fixture() -> (Database, TaskContext, InsertTaskTool) {
        let db = Database::in_memory().await.unwrap();
        let session_id = Uuid::new_v4();
        let ctx = TaskContext::load(&db, Uuid::new_v4(), session_id, vec![])
            .await
            .unwrap();
        let tool = InsertTaskTool::new(db.clone());
        (db, ctx, tool)
    }

    #[tokio::test]
    async fn creates_task_at_position_one() {
        let (db, ctx, tool) = fixture().await;
        let out = tool
            .execute(
                &ctx,
                &json!({ "after_task_order": 0, "task_description": "collect data" }),
            )
            .await
            .unwrap();
        assert_eq!(out, "Task 1 created");
        let tasks = db.fetch_ordered_tasks(ctx.session_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_description(), "collect data");
        assert_eq!(tasks[0].status, ProcessStatus::Pending);
    }

    #[tokio::test]
    async fn out_of_range_order_is_a_textual_correction() {
        let (_db, ctx, tool) = fixture().await;
        let out = tool
            .execute(
                &ctx,
                &json!({ "after_task_order": 7, "task_description": "x" }),
            )
            .await
            .unwrap();
        assert!(out.contains("out of range"), "got: {out}");
    }

    #[tokio::test]
    async fn missing_arguments_are_textual_corrections() {
        let (_db, ctx, tool) = fixture().await;
        let out = tool
            .execute(&ctx, &json!({ "task_description": "x" }))
            .await
            .unwrap();
        assert!(out.contains("after_task_order"), "got: {out}");
        let out = tool
            .execute(&ctx, &json!({ "after_task_order": 0 }))
            .await
            .unwrap();
        assert!(out.contains("task_description"), "got: {out}");
    }
}

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use skein_store::Database;

use crate::tool::{raw_message_indices, resolve_message_indices};
use crate::{TaskContext, Tool};

/// Links batch messages to an existing task.
pub struct AppendMessagesToTaskTool {
    db: Database,
}

impl AppendMessagesToTaskTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for AppendMessagesToTaskTool {
    fn name(&self) -> &str {
        "append_messages_to_task"
    }

    fn description(&self) -> &str {
        "Link current message ids to a task for tracking progress and context. \
         Use this to associate conversation messages with relevant tasks. \
         Make sure you append messages first (if any), then update the task status. \
         If the task is marked as 'success' or 'failed', don't append messages to it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_order": {
                    "type": "integer",
                    "description": "The order number of the task to link messages to.",
                },
                "message_ids": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "List of message IDs to append to the task.",
                },
            },
            "required": ["task_order", "message_ids"],
        })
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> anyhow::Result<String> {
        let Some(task_order) = args.get("task_order").and_then(Value::as_i64) else {
            return Ok(
                "You must provide a task order argument, so that we can attach messages to \
                 the task. Appending failed."
                    .into(),
            );
        };
        let Some(task) = ctx.task_at_order(task_order) else {
            return Ok(format!(
                "Task order {task_order} is out of range, appending failed."
            ));
        };

        let message_ids = resolve_message_indices(ctx, args);
        if message_ids.is_empty() {
            return Ok(format!(
                "No message ids to append, skip: {:?}",
                raw_message_indices(args)
            ));
        }
        if task.status.is_terminal() {
            return Ok(format!(
                "Task {task_order} is already {}, appending failed.",
                task.status
            ));
        }

        self.db.append_messages_to_task(message_ids, task.id).await?;
        Ok(format!(
            "Messages {:?} appended to task {task_order}",
            raw_message_indices(args)
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skein_store::{NewMessage, PartAsset, ProcessStatus, Role};
    use uuid::Uuid;

    struct Fixture {
        db: Database,
        session_id: Uuid,
        message_ids: Vec<Uuid>,
    }

    async fn fixture(task_status: ProcessStatus) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let session_id = Uuid::new_v4();
        db.insert_task(
            session_id,
            0,
            json!({"task_description": "t"}),
            task_status,
        )
        .await
        .unwrap();
        let mut message_ids = Vec::new();
        for _ in 0..3 {
            message_ids.push(
                db.insert_message(NewMessage::new(
                    session_id,
                    Role::User,
                    PartAsset::for_key("a", "k"),
                ))
                .await
                .unwrap()
                .id,
            );
        }
        Fixture {
            db,
            session_id,
            message_ids,
        }
    }

    impl Fixture {
        async fn ctx(&self) -> TaskContext {
            TaskContext::load(
                &self.db,
                Uuid::new_v4(),
                self.session_id,
                self.message_ids.clone(),
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn links_resolved_indices() {
        let f = fixture(ProcessStatus::Running).await;
        let tool = AppendMessagesToTaskTool::new(f.db.clone());
        let out = tool
            .execute(&f.ctx().await, &json!({ "task_order": 1, "message_ids": [0, 2] }))
            .await
            .unwrap();
        assert_eq!(out, "Messages [0, 2] appended to task 1");

        let tasks = f.db.fetch_ordered_tasks(f.session_id).await.unwrap();
        assert_eq!(
            tasks[0].message_ids,
            vec![f.message_ids[0], f.message_ids[2]]
        );
    }

    #[tokio::test]
    async fn terminal_task_rejects_append_without_writes() {
        for status in [ProcessStatus::Success, ProcessStatus::Failed] {
            let f = fixture(status).await;
            let tool = AppendMessagesToTaskTool::new(f.db.clone());
            let out = tool
                .execute(&f.ctx().await, &json!({ "task_order": 1, "message_ids": [0] }))
                .await
                .unwrap();
            assert!(out.contains("appending failed"), "got: {out}");
            let tasks = f.db.fetch_ordered_tasks(f.session_id).await.unwrap();
            assert!(tasks[0].message_ids.is_empty());
        }
    }

    #[tokio::test]
    async fn out_of_range_indices_resolve_to_skip() {
        let f = fixture(ProcessStatus::Pending).await;
        let tool = AppendMessagesToTaskTool::new(f.db.clone());
        let out = tool
            .execute(&f.ctx().await, &json!({ "task_order": 1, "message_ids": [99] }))
            .await
            .unwrap();
        assert!(out.contains("No message ids to append"), "got: {out}");
    }

    #[tokio::test]
    async fn bad_task_order_is_textual() {
        let f = fixture(ProcessStatus::Pending).await;
        let tool = AppendMessagesToTaskTool::new(f.db.clone());
        let out = tool
            .execute(&f.ctx().await, &json!({ "task_order": 4, "message_ids": [0] }))
            .await
            .unwrap();
        assert!(out.contains("out of range"), "got: {out}");
        let out = tool
            .execute(&f.ctx().await, &json!({ "message_ids": [0] }))
            .await
            .unwrap();
        assert!(out.contains("must provide a task order"), "got: {out}");
    }
}

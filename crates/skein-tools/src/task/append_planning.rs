// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use skein_store::Database;

use crate::tool::{raw_message_indices, resolve_message_indices};
use crate::{TaskContext, Tool};

/// Links batch messages to the session's planning task, creating it lazily.
pub struct AppendMessagesToPlanningTool {
    db: Database,
}

impl AppendMessagesToPlanningTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for AppendMessagesToPlanningTool {
    fn name(&self) -> &str {
        "append_messages_to_planning_section"
    }

    fn description(&self) -> &str {
        "Save current message ids to the planning section. \
         Use this when messages are about the agent/user planning a general plan, \
         and those messages aren't related to any specific task execution."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message_ids": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "List of message IDs to append to the planning section.",
                },
            },
            "required": ["message_ids"],
        })
    }

    async fn execute(&self, ctx: &TaskContext, args: &Value) -> anyhow::Result<String> {
        let message_ids = resolve_message_indices(ctx, args);
        if message_ids.is_empty() {
            return Ok(format!(
                "No message ids to append, skip: {:?}",
                raw_message_indices(args)
            ));
        }
        self.db
            .append_messages_to_planning_section(ctx.session_id, message_ids)
            .await?;
        Ok(format!(
            "Messages {:?} appended to planning section",
            raw_message_indices(args)
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skein_store::{NewMessage, PartAsset, Role};
    use uuid::Uuid;

    #[tokio::test]
    async fn creates_planning_task_and_links() {
        let db = Database::in_memory().await.unwrap();
        let sid = Uuid::new_v4();
        let m = db
            .insert_message(NewMessage::new(sid, Role::User, PartAsset::for_key("a", "k")))
            .await
            .unwrap();
        let ctx = TaskContext::load(&db, Uuid::new_v4(), sid, vec![m.id])
            .await
            .unwrap();

        let tool = AppendMessagesToPlanningTool::new(db.clone());
        let out = tool
            .execute(&ctx, &json!({ "message_ids": [0] }))
            .await
            .unwrap();
        assert_eq!(out, "Messages [0] appended to planning section");

        let planning = db.fetch_planning_task(sid).await.unwrap().unwrap();
        assert_eq!(planning.order, 0);
        assert_eq!(planning.message_ids, vec![m.id]);
    }

    #[tokio::test]
    async fn empty_resolution_skips_without_creating_planning_task() {
        let db = Database::in_memory().await.unwrap();
        let sid = Uuid::new_v4();
        let ctx = TaskContext::load(&db, Uuid::new_v4(), sid, vec![]).await.unwrap();

        let tool = AppendMessagesToPlanningTool::new(db.clone());
        let out = tool
            .execute(&ctx, &json!({ "message_ids": [5] }))
            .await
            .unwrap();
        assert!(out.contains("skip"), "got: {out}");
        assert!(db.fetch_planning_task(sid).await.unwrap().is_none());
    }
}

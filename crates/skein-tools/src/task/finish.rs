// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{TaskContext, Tool};

/// Terminates the agent loop.
///
/// The loop intercepts this tool by name before dispatch, so the handler
/// body only runs if a caller dispatches it directly.
pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        super::FINISH_TOOL
    }

    fn description(&self) -> &str {
        "Call this when the task list is fully synchronized with the conversation \
         and no further tool calls are needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _ctx: &TaskContext, _args: &Value) -> anyhow::Result<String> {
        Ok("finished".into())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::TaskContext;

/// Trait every task tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    /// Whether a successful call changes the task index.  The agent loop
    /// rebuilds the [`TaskContext`] before the next tool call when this is
    /// set — task orders the model referenced may have shifted.
    fn invalidates_context(&self) -> bool {
        false
    }
    /// Execute against the bound context.
    ///
    /// `Ok(text)` is the result shown to the model, including recoverable
    /// argument problems.  `Err` aborts the flush.
    async fn execute(&self, ctx: &TaskContext, args: &Value) -> anyhow::Result<String>;
}

/// Resolve the model's 0-based batch indices to message ids, dropping
/// out-of-range indices the way the context contract specifies.
pub(crate) fn resolve_message_indices(ctx: &TaskContext, args: &Value) -> Vec<uuid::Uuid> {
    args.get("message_ids")
        .and_then(Value::as_array)
        .map(|indices| {
            indices
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|i| ctx.message_ids_index.get(i as usize).copied())
                .collect()
        })
        .unwrap_or_default()
}

/// The raw `message_ids` argument, for echoing back to the model.
pub(crate) fn raw_message_indices(args: &Value) -> Vec<i64> {
    args.get("message_ids")
        .and_then(Value::as_array)
        .map(|indices| indices.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

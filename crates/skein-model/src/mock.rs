// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Completion, CompletionRequest, ToolInvocation};

/// A pre-scripted provider.  Each `complete` call pops the next completion
/// from the front of the queue, letting tests specify exact turn sequences —
/// including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Completion>>,
    /// Every `CompletionRequest` seen by this provider, so tests can inspect
    /// what the agent actually sent.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from the ordered list of completions to replay.
    pub fn new(scripts: Vec<Completion>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: a provider that always answers with plain text (no tool
    /// calls), which ends the agent loop on the first turn.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Completion::text(reply)])
    }

    /// Convenience: one turn of tool calls followed by a text turn.
    pub fn tool_calls_then_text(
        calls: Vec<(&str, &str, Value)>,
        final_text: impl Into<String>,
    ) -> Self {
        let invocations = calls
            .into_iter()
            .map(|(id, name, arguments)| ToolInvocation {
                id: id.into(),
                name: name.into(),
                arguments,
            })
            .collect();
        Self::new(vec![
            Completion::with_tool_calls(invocations),
            Completion::text(final_text),
        ])
    }

    /// Number of completion calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        self.requests.lock().unwrap().push(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Fallback when all scripts are consumed: an empty text reply,
            // which the agent loop treats as "nothing left to do".
            return Ok(Completion::default());
        }
        Ok(scripts.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

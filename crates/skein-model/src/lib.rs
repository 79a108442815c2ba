// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! LLM provider abstraction for the task agent.
//!
//! The agent drives non-streaming, tool-calling completions; providers
//! translate the canonical [`CompletionRequest`] to their wire format and
//! normalize the response to a [`Completion`].  The mock provider replays
//! scripted completions so the agent loop is testable without network access.

mod anthropic;
mod mock;
mod openai;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use mock::ScriptedProvider;
pub use openai::OpenAiProvider;
pub use provider::ModelProvider;
pub use types::{
    ChatMessage, ChatRole, Completion, CompletionRequest, ToolInvocation, ToolSchema, Usage,
};

use std::sync::Arc;

use anyhow::bail;
use skein_config::LlmConfig;

/// Resolve the API key: explicit value wins, then the configured env var,
/// then the provider's conventional env var.
fn resolve_api_key(cfg: &LlmConfig, default_env: &str) -> Option<String> {
    if let Some(key) = &cfg.api_key {
        return Some(key.clone());
    }
    let env_name = cfg.api_key_env.as_deref().unwrap_or(default_env);
    std::env::var(env_name).ok()
}

/// Build a provider from configuration.
///
/// `provider = "mock"` returns a scripted provider with no scripts — every
/// completion answers with empty text, which ends the agent loop.  Real test
/// scripts are injected by constructing [`ScriptedProvider`] directly.
pub fn from_config(cfg: &LlmConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            cfg.model.clone(),
            resolve_api_key(cfg, "OPENAI_API_KEY"),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            cfg.model.clone(),
            resolve_api_key(cfg, "ANTHROPIC_API_KEY"),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Arc::new(ScriptedProvider::new(vec![]))),
        other => bail!("unknown llm provider {other:?} (expected openai | anthropic | mock)"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

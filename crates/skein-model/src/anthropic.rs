// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
//! Anthropic Messages API driver (non-streaming, tool calling).
//!
//! The dialogue shape differs from the OpenAI wire in two ways that matter
//! here: tool results are sent as `tool_result` blocks inside a *user*
//! message, and assistant tool calls are `tool_use` content blocks.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{ChatMessage, ChatRole, Completion, CompletionRequest, ToolInvocation, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    messages_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.as_deref().unwrap_or("https://api.anthropic.com");
        let base = base.trim_end_matches('/');
        Self {
            model,
            api_key,
            messages_url: format!("{base}/v1/messages"),
            // The Messages API requires max_tokens.
            max_tokens: max_tokens.unwrap_or(4096),
            temperature,
            client: reqwest::Client::new(),
        }
    }
}

/// Collapse the canonical dialogue into Anthropic's alternating shape.
/// Consecutive tool results merge into a single user turn.
fn build_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            ChatRole::System => {
                // System text travels in the top-level `system` field; a
                // stray system message mid-dialogue is demoted to user text.
                out.push(json!({
                    "role": "user",
                    "content": m.content.clone().unwrap_or_default(),
                }));
            }
            ChatRole::User => {
                out.push(json!({
                    "role": "user",
                    "content": m.content.clone().unwrap_or_default(),
                }));
            }
            ChatRole::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(text) = m.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for tc in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                if blocks.is_empty() {
                    blocks.push(json!({ "type": "text", "text": "" }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            ChatRole::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content.clone().unwrap_or_default(),
                });
                // Append to a preceding user turn that already carries tool
                // results; otherwise open a new user turn.
                let mergeable = out
                    .last()
                    .is_some_and(|last| last["role"] == "user" && last["content"].is_array());
                if mergeable {
                    if let Some(blocks) =
                        out.last_mut().and_then(|last| last["content"].as_array_mut())
                    {
                        blocks.push(block);
                    }
                } else {
                    out.push(json!({ "role": "user", "content": [block] }));
                }
            }
        }
    }
    out
}

fn parse_completion(body: &Value) -> anyhow::Result<Completion> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .context("response has no content blocks")?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    warn!("dropping tool_use block with empty name");
                    continue;
                }
                tool_calls.push(ToolInvocation {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("toolu_synthetic_{i}")),
                    name,
                    arguments: crate::types::arguments_as_object(
                        block.get("input").cloned().unwrap_or(Value::Null),
                    ),
                });
            }
            _ => {}
        }
    }

    let usage = Usage {
        input_tokens: body
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: body
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    };

    Ok(Completion {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        usage,
    })
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": build_messages(&req.messages),
        });
        if !req.system.is_empty() {
            body["system"] = json!(req.system);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let key = self
            .api_key
            .as_deref()
            .context("API key not set; provide api_key or api_key_env in config")?;
        let resp = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("anthropic error {status}: {text}");
        }

        let body: Value = resp.json().await.context("anthropic response not json")?;
        parse_completion(&body)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

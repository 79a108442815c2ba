// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
//! OpenAI chat-completions driver (non-streaming, tool calling).

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::types::arguments_as_object;
use crate::{ChatMessage, ChatRole, Completion, CompletionRequest, ToolInvocation, Usage};

pub struct OpenAiProvider {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.as_deref().unwrap_or("https://api.openai.com/v1");
        let base = base.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn build_messages(&self, req: &CompletionRequest) -> Vec<Value> {
        let mut out = Vec::with_capacity(req.messages.len() + 1);
        if !req.system.is_empty() {
            out.push(json!({ "role": "system", "content": req.system }));
        }
        for m in &req.messages {
            out.push(build_message(m));
        }
        out
    }
}

fn build_message(m: &ChatMessage) -> Value {
    let role = match m.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut v = json!({ "role": role, "content": m.content.clone().unwrap_or_default() });
    if !m.tool_calls.is_empty() {
        v["tool_calls"] = Value::Array(
            m.tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            // OpenAI requires arguments as a JSON-encoded string.
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &m.tool_call_id {
        v["tool_call_id"] = json!(id);
    }
    v
}

fn parse_completion(body: &Value) -> anyhow::Result<Completion> {
    let message = body
        .pointer("/choices/0/message")
        .context("response has no choices[0].message")?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (i, call) in calls.iter().enumerate() {
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                warn!("dropping tool call with empty name from model; cannot dispatch");
                continue;
            }
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("tc_synthetic_{i}"));
            let arguments = call
                .pointer("/function/arguments")
                .cloned()
                .map(arguments_as_object)
                .unwrap_or_else(|| json!({}));
            tool_calls.push(ToolInvocation {
                id,
                name,
                arguments,
            });
        }
    }

    let usage = Usage {
        input_tokens: body
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: body
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    };

    Ok(Completion {
        content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl crate::ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        let messages = self.build_messages(&req);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_completion_tokens"] = json!(max_tokens);
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
            .post(&self.chat_url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("openai error {status}: {text}");
        }

        let body: Value = resp.json().await.context("openai response not json")?;
        parse_completion(&body)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

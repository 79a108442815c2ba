// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Per-project buffering and agent tunables.  A multi-tenant deployment
    /// would resolve these per project row; the worker falls back to this
    /// section when the project carries no override.
    #[serde(default)]
    pub project: ProjectConfig,
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.  `:memory:` is accepted for throwaway workers.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "skein.db".into(),
        }
    }
}

/// Object-store settings for message-part blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobsConfig {
    /// Root directory the blob keys are resolved under.
    pub root: String,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            root: "skein-blobs".into(),
        }
    }
}

/// Message-broker behaviour shared by every registered queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-queue concurrent delivery budget.
    pub global_prefetch: usize,
    /// Outer timeout for one handler invocation, in seconds.
    pub handler_timeout_seconds: u64,
    /// Redelivery attempts before a message is dead-lettered.
    pub max_retries: u32,
    /// Backoff unit: the n-th retry waits `retry_delay_seconds * n^2`.
    pub retry_delay_seconds: f64,
    /// Default message TTL for parked queues that do not set their own.
    pub default_message_ttl_seconds: u64,
    /// Retention for dead-lettered messages.
    pub dead_letter_ttl_days: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            global_prefetch: 32,
            handler_timeout_seconds: 96,
            max_retries: 1,
            retry_delay_seconds: 1.0,
            default_message_ttl_seconds: 7 * 24 * 60 * 60,
            dead_letter_ttl_days: 7,
        }
    }
}

/// Session-lock behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long a contended notification parks before it is retried.
    pub session_lock_wait_seconds: u64,
    /// Lock TTL.  A crashed worker's lock expires after this long and the
    /// session becomes flushable again.
    pub processing_timeout_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            session_lock_wait_seconds: 1,
            processing_timeout_seconds: 60,
        }
    }
}

/// LLM provider settings for the task agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider identifier: "openai" | "anthropic" | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub model: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Per-completion timeout, in seconds.
    pub timeout_seconds: u64,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4.1".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            timeout_seconds: 60,
            temperature: Some(0.2),
            max_tokens: Some(4096),
        }
    }
}

/// Per-project buffering and agent tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Pending-message count at which a flush starts immediately.
    pub buffer_max_turns: usize,
    /// Extra headroom above `buffer_max_turns`.  A claim takes at most
    /// `buffer_max_turns + buffer_max_overflow` messages; anything beyond is
    /// drained by a follow-up flush.
    pub buffer_max_overflow: usize,
    /// Idle delay before a sub-threshold batch is flushed anyway.
    pub buffer_ttl_seconds: u64,
    /// How many older messages are shown to the agent as prior context.
    pub previous_messages_turns: usize,
    /// Cap on tool-calling turns per flush.
    pub task_agent_max_iterations: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            buffer_max_turns: 16,
            buffer_max_overflow: 16,
            buffer_ttl_seconds: 8,
            previous_messages_turns: 3,
            task_agent_max_iterations: 4,
        }
    }
}

impl ProjectConfig {
    /// Upper bound on how many messages a single flush may claim.
    pub fn max_claim(&self) -> usize {
        self.buffer_max_turns + self.buffer_max_overflow
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

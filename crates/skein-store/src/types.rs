// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::StoreError;

// ─── Status and role enums ────────────────────────────────────────────────────

/// Processing state shared by messages (`session_task_process_status`) and
/// tasks (`status`).  The persisted strings are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt(format!("unknown status {other:?}"))),
        }
    }

    /// A finished task no longer accepts message attachments.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author role of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Function => "function",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            "function" => Ok(Self::Function),
            other => Err(StoreError::Corrupt(format!("unknown role {other:?}"))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Message parts ────────────────────────────────────────────────────────────

/// Locator of an immutable blob in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartAsset {
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub size_b: u64,
}

impl PartAsset {
    /// Minimal locator used by tests and the ingress seam.
    pub fn for_key(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            etag: String::new(),
            sha256: String::new(),
            mime: "application/json".into(),
            size_b: 0,
        }
    }
}

/// One content item of a message.
///
/// This is the single canonical shape the core speaks; provider- or
/// client-specific message formats are normalized to it at the ingress edge.
/// The persisted `type` strings (`tool-call`, `tool-result`, …) are part of
/// the external contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Image {
        asset: PartAsset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Audio {
        asset: PartAsset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Video {
        asset: PartAsset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    File {
        asset: PartAsset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolCall {
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        content: Value,
    },
    Data {
        #[serde(default)]
        data: Value,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Decode a parts blob (a JSON array of [`MessagePart`]) downloaded from the
/// object store.
pub fn decode_parts(bytes: &[u8]) -> Result<Vec<MessagePart>, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode parts for upload.  The written blob is immutable.
pub fn encode_parts(parts: &[MessagePart]) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(parts)?)
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// A session message row.  `parts` is `None` until hydrated from the object
/// store, and stays `None` when hydration fails (degraded, never fatal).
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub parts_meta: PartAsset,
    pub parts: Option<Vec<MessagePart>>,
    pub parent_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for message creation (ingress and tests).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: Uuid,
    pub role: Role,
    pub parts_meta: PartAsset,
    pub parent_id: Option<Uuid>,
    /// Explicit creation timestamp.  `None` uses the current time.  Callers
    /// inserting several messages in one tick must pass strictly increasing
    /// values — `created_at` is the per-session ordering key.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(session_id: Uuid, role: Role, parts_meta: PartAsset) -> Self {
        Self {
            session_id,
            role,
            parts_meta,
            parent_id: None,
            created_at: None,
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A task row plus its attached message ids (sorted by the messages'
/// `created_at`), as presented to the agent.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub order: i64,
    pub data: Value,
    pub status: ProcessStatus,
    pub is_planning: bool,
    pub space_digested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_ids: Vec<Uuid>,
}

impl TaskRecord {
    /// The conventional description field of the opaque `data` map.
    pub fn task_description(&self) -> &str {
        self.data
            .get("task_description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

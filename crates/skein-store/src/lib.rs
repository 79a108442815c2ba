// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Persistence gateways for the session task-distillation worker.
//!
//! Four stores live here:
//! - the relational store (`Database`) holding messages and tasks, with a
//!   transactional `with_tx` scope that commits on `Ok` and rolls back on
//!   `Err`;
//! - the session-lock store (`SessionLockStore`), a TTL-bounded KV mutex
//!   serializing flushes per session;
//! - the blob store (`BlobStore` / `FsBlobStore`) holding immutable
//!   message-part payloads;
//! - the task/message operations built on top of the relational store.

mod blobs;
mod db;
mod error;
mod lock;
pub mod messages;
mod schema;
pub mod tasks;
mod types;

pub use blobs::{BlobStore, FsBlobStore};
pub use db::Database;
pub use error::StoreError;
pub use lock::{session_lock_key, SessionLockStore};
pub use types::{
    decode_parts, encode_parts, MessagePart, MessageRecord, NewMessage, PartAsset, ProcessStatus,
    Role, TaskRecord,
};

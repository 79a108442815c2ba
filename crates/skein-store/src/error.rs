// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced by the persistence gateways.
///
/// `OrderOutOfRange` is the one domain error the tool layer treats as
/// recoverable — it is fed back to the model as text rather than failing the
/// flush.  Everything else is transient or fatal infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("after_order {after_order} out of range [0, {task_count}]")]
    OrderOutOfRange { after_order: i64, task_count: i64 },

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("invalid persisted value: {0}")]
    Corrupt(String),

    #[error("blocking task failed: {0}")]
    Runtime(String),
}

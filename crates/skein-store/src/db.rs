// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::{schema, StoreError};

/// Handle to the relational store.
///
/// rusqlite is synchronous; every operation runs on the blocking pool behind
/// an `Arc<Mutex<Connection>>`, which also serializes writers in-process.
/// Cross-process serialization for task mutations comes from the immediate
/// (write-locking) transaction that [`Database::with_tx`] opens.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and migrate) the database at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            schema::apply(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and throwaway workers.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open_in_memory()?;
            schema::apply(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one transaction.
    ///
    /// `f` observes a single consistent view.  A normal return commits; an
    /// error return rolls back.  The transaction is opened `IMMEDIATE` so the
    /// write lock is taken up front — this is what serializes concurrent task
    /// renumbering the way the original row-lock did.
    pub async fn with_tx<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }
}

/// Fixed-width RFC 3339 encoding (UTC, microseconds) so string comparison in
/// SQL matches chronological order.
pub(crate) fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Message store operations.
//!
//! The `*_tx` functions compose inside a [`Database::with_tx`] scope; the
//! async methods on [`Database`] are single-operation conveniences that open
//! their own scope.  Parts hydration happens outside the transaction — it is
//! a pure object-store read and must not extend the write lock.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use tracing::warn;
use uuid::Uuid;

use crate::db::{decode_time, encode_time};
use crate::{
    decode_parts, BlobStore, Database, MessageRecord, NewMessage, ProcessStatus, Role, StoreError,
};

const MESSAGE_COLS: &str =
    "id, session_id, role, parts_meta, parent_id, task_id, session_task_process_status, \
     created_at, updated_at";

fn read_message_row(row: &Row<'_>) -> Result<MessageRecord, StoreError> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let parts_meta: String = row.get(3)?;
    let parent_id: Option<String> = row.get(4)?;
    let task_id: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    let parse_id = |s: &str| {
        Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid {s:?}: {e}")))
    };

    Ok(MessageRecord {
        id: parse_id(&id)?,
        session_id: parse_id(&session_id)?,
        role: Role::parse(&role)?,
        parts_meta: serde_json::from_str(&parts_meta)?,
        parts: None,
        parent_id: parent_id.as_deref().map(parse_id).transpose()?,
        task_id: task_id.as_deref().map(parse_id).transpose()?,
        status: ProcessStatus::parse(&status)?,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

fn id_placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

// ─── Transaction-scoped operations ────────────────────────────────────────────

/// Insert a message with status `pending`.
///
/// `created_at` is the per-session ordering key, so it is forced strictly
/// past the session's current newest message when the caller's timestamp
/// would collide or run backwards.
pub fn insert_message_tx(tx: &Transaction<'_>, msg: &NewMessage) -> Result<MessageRecord, StoreError> {
    let now = Utc::now();
    let mut created_at = msg.created_at.unwrap_or(now);

    let newest: Option<String> = tx
        .query_row(
            "SELECT MAX(created_at) FROM messages WHERE session_id = ?1",
            [msg.session_id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    if let Some(newest) = newest {
        let newest = decode_time(&newest)?;
        if created_at <= newest {
            created_at = newest + Duration::microseconds(1);
        }
    }

    let record = MessageRecord {
        id: Uuid::new_v4(),
        session_id: msg.session_id,
        role: msg.role,
        parts_meta: msg.parts_meta.clone(),
        parts: None,
        parent_id: msg.parent_id,
        task_id: None,
        status: ProcessStatus::Pending,
        created_at,
        updated_at: now,
    };

    tx.execute(
        "INSERT INTO messages (id, session_id, role, parts_meta, parent_id, task_id, \
         session_task_process_status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8)",
        params![
            record.id.to_string(),
            record.session_id.to_string(),
            record.role.as_str(),
            serde_json::to_string(&record.parts_meta)?,
            record.parent_id.map(|p| p.to_string()),
            record.status.as_str(),
            encode_time(record.created_at),
            encode_time(record.updated_at),
        ],
    )?;
    Ok(record)
}

/// Count of a session's messages in the given processing state.
pub fn count_with_status_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
    status: ProcessStatus,
) -> Result<usize, StoreError> {
    let n: i64 = tx.query_row(
        "SELECT COUNT(*) FROM messages \
         WHERE session_id = ?1 AND session_task_process_status = ?2",
        params![session_id.to_string(), status.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

/// The session's newest `pending` message id — the latest-wins admission key.
pub fn latest_pending_id_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
) -> Result<Option<Uuid>, StoreError> {
    let id: Option<String> = tx
        .query_row(
            "SELECT id FROM messages \
             WHERE session_id = ?1 AND session_task_process_status = 'pending' \
             ORDER BY created_at DESC LIMIT 1",
            [session_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    id.as_deref()
        .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid: {e}"))))
        .transpose()
}

/// Claim up to `limit` oldest pending messages: transition them to `running`
/// and return their ids in ascending `created_at` order.
pub fn claim_oldest_pending_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
    limit: usize,
) -> Result<Vec<Uuid>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id FROM messages \
         WHERE session_id = ?1 AND session_task_process_status = 'pending' \
         ORDER BY created_at ASC LIMIT ?2",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![session_id.to_string(), limit as i64], |row| {
            row.get(0)
        })?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "UPDATE messages SET session_task_process_status = 'running', updated_at = ?1 \
         WHERE id IN ({})",
        id_placeholders(ids.len())
    );
    let mut args: Vec<String> = Vec::with_capacity(ids.len() + 1);
    args.push(encode_time(Utc::now()));
    args.extend(ids.iter().cloned());
    tx.execute(&sql, params_from_iter(args))?;

    ids.iter()
        .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid: {e}"))))
        .collect()
}

/// Fetch rows by id, preserving the order of `ids`.  Unknown ids are an error
/// here — the caller claimed them moments ago.
pub fn fetch_message_rows_tx(
    tx: &Transaction<'_>,
    ids: &[Uuid],
) -> Result<Vec<MessageRecord>, StoreError> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages WHERE id IN ({})",
        id_placeholders(ids.len())
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows: Vec<MessageRecord> = stmt
        .query_and_then(
            params_from_iter(ids.iter().map(|i| i.to_string())),
            |row| read_message_row(row),
        )?
        .collect::<Result<_, _>>()?;

    let mut by_id: std::collections::HashMap<Uuid, MessageRecord> =
        rows.into_iter().map(|r| (r.id, r)).collect();
    ids.iter()
        .map(|id| {
            by_id
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
        })
        .collect()
}

/// Up to `limit` messages older than `before`, returned ascending — the prior
/// context window fed to the agent.
pub fn previous_message_rows_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
    before: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<MessageRecord>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id FROM messages \
         WHERE session_id = ?1 AND created_at < ?2 \
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let mut ids: Vec<Uuid> = stmt
        .query_map(
            params![session_id.to_string(), encode_time(before), limit as i64],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid: {e}"))))
        .collect::<Result<_, _>>()?;
    drop(stmt);

    ids.reverse();
    fetch_message_rows_tx(tx, &ids)
}

/// Set the processing status of a batch.
pub fn update_status_tx(
    tx: &Transaction<'_>,
    ids: &[Uuid],
    status: ProcessStatus,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "UPDATE messages SET session_task_process_status = ?1, updated_at = ?2 \
         WHERE id IN ({})",
        id_placeholders(ids.len())
    );
    let mut args: Vec<String> = Vec::with_capacity(ids.len() + 2);
    args.push(status.as_str().to_string());
    args.push(encode_time(Utc::now()));
    args.extend(ids.iter().map(|i| i.to_string()));
    tx.execute(&sql, params_from_iter(args))?;
    Ok(())
}

/// Processing status of a single message.
pub fn message_status_tx(tx: &Transaction<'_>, id: Uuid) -> Result<ProcessStatus, StoreError> {
    let s: Option<String> = tx
        .query_row(
            "SELECT session_task_process_status FROM messages WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match s {
        Some(s) => ProcessStatus::parse(&s),
        None => Err(StoreError::NotFound(format!("message {id}"))),
    }
}

// ─── Async conveniences ───────────────────────────────────────────────────────

impl Database {
    pub async fn insert_message(&self, msg: NewMessage) -> Result<MessageRecord, StoreError> {
        self.with_tx(move |tx| insert_message_tx(tx, &msg)).await
    }

    pub async fn count_pending(&self, session_id: Uuid) -> Result<usize, StoreError> {
        self.with_tx(move |tx| count_with_status_tx(tx, session_id, ProcessStatus::Pending))
            .await
    }

    pub async fn latest_pending_id(&self, session_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.with_tx(move |tx| latest_pending_id_tx(tx, session_id))
            .await
    }

    pub async fn claim_oldest_pending(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.with_tx(move |tx| claim_oldest_pending_tx(tx, session_id, limit))
            .await
    }

    /// Fetch messages by id (order-preserving) and hydrate their parts from
    /// the object store.  Hydration failures degrade to `parts = None`.
    pub async fn fetch_messages(
        &self,
        ids: Vec<Uuid>,
        blobs: &dyn BlobStore,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut rows = self
            .with_tx(move |tx| fetch_message_rows_tx(tx, &ids))
            .await?;
        hydrate_parts(&mut rows, blobs).await;
        Ok(rows)
    }

    /// The prior-context window: up to `limit` messages older than `before`,
    /// ascending, parts hydrated.
    pub async fn fetch_previous_messages(
        &self,
        session_id: Uuid,
        before: DateTime<Utc>,
        limit: usize,
        blobs: &dyn BlobStore,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut rows = self
            .with_tx(move |tx| previous_message_rows_tx(tx, session_id, before, limit))
            .await?;
        hydrate_parts(&mut rows, blobs).await;
        Ok(rows)
    }

    pub async fn update_message_status(
        &self,
        ids: Vec<Uuid>,
        status: ProcessStatus,
    ) -> Result<(), StoreError> {
        self.with_tx(move |tx| update_status_tx(tx, &ids, status))
            .await
    }

    pub async fn message_status(&self, id: Uuid) -> Result<ProcessStatus, StoreError> {
        self.with_tx(move |tx| message_status_tx(tx, id)).await
    }
}

/// Download and decode every record's parts blob concurrently.  A miss or a
/// malformed blob leaves that record with `parts = None`; the agent then sees
/// a truncated message.
pub async fn hydrate_parts(records: &mut [MessageRecord], blobs: &dyn BlobStore) {
    let downloads = records
        .iter()
        .map(|r| blobs.download(&r.parts_meta.key))
        .collect::<Vec<_>>();
    let results = join_all(downloads).await;

    for (record, result) in records.iter_mut().zip(results) {
        record.parts = match result.and_then(|bytes| decode_parts(&bytes)) {
            Ok(parts) => Some(parts),
            Err(e) => {
                warn!(
                    message_id = %record.id,
                    key = %record.parts_meta.key,
                    error = %e,
                    "parts hydration failed; passing message without parts"
                );
                None
            }
        };
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

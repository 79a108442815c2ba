// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Task store operations.
//!
//! All multi-row mutations run inside one [`Database::with_tx`] scope.  The
//! insert renumbering uses the two-phase sign-flip so the `(session_id,
//! "order")` uniqueness constraint — which SQLite checks per row during
//! UPDATE — is never transiently violated.

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::{decode_time, encode_time};
use crate::{Database, ProcessStatus, StoreError, TaskRecord};

const TASK_COLS: &str =
    "id, session_id, \"order\", data, status, is_planning, space_digested, created_at, updated_at";

fn read_task_row(row: &Row<'_>) -> Result<TaskRecord, StoreError> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let order: i64 = row.get(2)?;
    let data: String = row.get(3)?;
    let status: String = row.get(4)?;
    let is_planning: bool = row.get(5)?;
    let space_digested: bool = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    let parse_id = |s: &str| {
        Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid {s:?}: {e}")))
    };

    Ok(TaskRecord {
        id: parse_id(&id)?,
        session_id: parse_id(&session_id)?,
        order,
        data: serde_json::from_str(&data)?,
        status: ProcessStatus::parse(&status)?,
        is_planning,
        space_digested,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
        message_ids: vec![],
    })
}

/// Attach the ids of the task's messages, sorted by the messages' `created_at`.
fn load_message_ids(tx: &Transaction<'_>, task: &mut TaskRecord) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "SELECT id FROM messages WHERE task_id = ?1 ORDER BY created_at ASC",
    )?;
    task.message_ids = stmt
        .query_map([task.id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid: {e}"))))
        .collect::<Result<_, _>>()?;
    Ok(())
}

// ─── Transaction-scoped operations ────────────────────────────────────────────

/// Non-planning tasks ascending by `order`, each carrying its attached
/// message ids.  This is the task index presented to the agent.
pub fn fetch_ordered_tasks_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
) -> Result<Vec<TaskRecord>, StoreError> {
    let sql = format!(
        "SELECT {TASK_COLS} FROM tasks \
         WHERE session_id = ?1 AND is_planning = 0 ORDER BY \"order\" ASC"
    );
    let mut stmt = tx.prepare(&sql)?;
    let mut tasks: Vec<TaskRecord> = stmt
        .query_and_then([session_id.to_string()], |row| read_task_row(row))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for task in &mut tasks {
        load_message_ids(tx, task)?;
    }
    Ok(tasks)
}

/// The session's planning task, if it exists.
pub fn fetch_planning_task_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
) -> Result<Option<TaskRecord>, StoreError> {
    let sql = format!(
        "SELECT {TASK_COLS} FROM tasks WHERE session_id = ?1 AND is_planning = 1"
    );
    let task = tx
        .query_row(&sql, [session_id.to_string()], |row| {
            Ok(read_task_row(row))
        })
        .optional()?
        .transpose()?;
    match task {
        Some(mut t) => {
            load_message_ids(tx, &mut t)?;
            Ok(Some(t))
        }
        None => Ok(None),
    }
}

pub fn fetch_task_tx(tx: &Transaction<'_>, task_id: Uuid) -> Result<TaskRecord, StoreError> {
    let sql = format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1");
    let task = tx
        .query_row(&sql, [task_id.to_string()], |row| Ok(read_task_row(row)))
        .optional()?
        .transpose()?;
    match task {
        Some(mut t) => {
            load_message_ids(tx, &mut t)?;
            Ok(t)
        }
        None => Err(StoreError::NotFound(format!("task {task_id}"))),
    }
}

/// Insert a task after `after_order`, renumbering the tail.
///
/// `after_order = 0` prepends before the first real task.  `after_order` must
/// be within `[0, N]` where `N` is the current non-planning task count; the
/// tool layer turns the range error into a textual correction for the model.
pub fn insert_task_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
    after_order: i64,
    data: Value,
    status: ProcessStatus,
) -> Result<TaskRecord, StoreError> {
    let task_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM tasks WHERE session_id = ?1 AND is_planning = 0",
        [session_id.to_string()],
        |row| row.get(0),
    )?;
    if after_order < 0 || after_order > task_count {
        return Err(StoreError::OrderOutOfRange {
            after_order,
            task_count,
        });
    }

    // Two-phase renumbering: park the tail at negative orders, then flip back
    // shifted by one.  A single `order = order + 1` sweep would collide with
    // the still-unshifted neighbour under the uniqueness constraint.
    tx.execute(
        "UPDATE tasks SET \"order\" = -\"order\" \
         WHERE session_id = ?1 AND \"order\" > ?2",
        params![session_id.to_string(), after_order],
    )?;
    tx.execute(
        "UPDATE tasks SET \"order\" = -\"order\" + 1 \
         WHERE session_id = ?1 AND \"order\" < 0",
        [session_id.to_string()],
    )?;

    let now = Utc::now();
    let record = TaskRecord {
        id: Uuid::new_v4(),
        session_id,
        order: after_order + 1,
        data,
        status,
        is_planning: false,
        space_digested: false,
        created_at: now,
        updated_at: now,
        message_ids: vec![],
    };
    tx.execute(
        "INSERT INTO tasks (id, session_id, \"order\", data, status, is_planning, \
         space_digested, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?6)",
        params![
            record.id.to_string(),
            record.session_id.to_string(),
            record.order,
            serde_json::to_string(&record.data)?,
            record.status.as_str(),
            encode_time(now),
        ],
    )?;
    Ok(record)
}

/// Mutate only the provided fields; `patch_data` shallow-merges into `data`.
pub fn update_task_tx(
    tx: &Transaction<'_>,
    task_id: Uuid,
    status: Option<ProcessStatus>,
    patch_data: Option<Map<String, Value>>,
) -> Result<TaskRecord, StoreError> {
    let mut task = fetch_task_tx(tx, task_id)?;

    if let Some(status) = status {
        task.status = status;
    }
    if let Some(patch) = patch_data {
        let data = task
            .data
            .as_object_mut()
            .ok_or_else(|| StoreError::Corrupt(format!("task {task_id} data is not an object")))?;
        for (k, v) in patch {
            data.insert(k, v);
        }
    }
    task.updated_at = Utc::now();

    tx.execute(
        "UPDATE tasks SET status = ?1, data = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            task.status.as_str(),
            serde_json::to_string(&task.data)?,
            encode_time(task.updated_at),
            task_id.to_string(),
        ],
    )?;
    Ok(task)
}

/// Link messages to a task.  Ids that do not exist are silently tolerated.
pub fn append_messages_to_task_tx(
    tx: &Transaction<'_>,
    message_ids: &[Uuid],
    task_id: Uuid,
) -> Result<(), StoreError> {
    if message_ids.is_empty() {
        return Ok(());
    }
    let placeholders: Vec<String> = (0..message_ids.len())
        .map(|i| format!("?{}", i + 3))
        .collect();
    let sql = format!(
        "UPDATE messages SET task_id = ?1, updated_at = ?2 WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut args: Vec<String> = Vec::with_capacity(message_ids.len() + 2);
    args.push(task_id.to_string());
    args.push(encode_time(Utc::now()));
    args.extend(message_ids.iter().map(|i| i.to_string()));
    tx.execute(&sql, params_from_iter(args))?;
    Ok(())
}

/// Link messages to the session's planning task, creating it on first use
/// (`order = 0`, `is_planning = true`, status `pending`).  Returns the
/// planning task id.
pub fn append_messages_to_planning_tx(
    tx: &Transaction<'_>,
    session_id: Uuid,
    message_ids: &[Uuid],
) -> Result<Uuid, StoreError> {
    let planning_id = match fetch_planning_task_tx(tx, session_id)? {
        Some(t) => t.id,
        None => {
            let id = Uuid::new_v4();
            let now = encode_time(Utc::now());
            tx.execute(
                "INSERT INTO tasks (id, session_id, \"order\", data, status, is_planning, \
                 space_digested, created_at, updated_at) \
                 VALUES (?1, ?2, 0, '{}', 'pending', 1, 0, ?3, ?3)",
                params![id.to_string(), session_id.to_string(), now],
            )?;
            id
        }
    };
    append_messages_to_task_tx(tx, message_ids, planning_id)?;
    Ok(planning_id)
}

/// Atomically flip `space_digested` false→true.  Returns the prior value, so
/// the first caller observes `false` and every re-delivery observes `true`.
pub fn set_task_space_digested_tx(
    tx: &Transaction<'_>,
    task_id: Uuid,
) -> Result<bool, StoreError> {
    let prior: Option<bool> = tx
        .query_row(
            "SELECT space_digested FROM tasks WHERE id = ?1",
            [task_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let prior = prior.ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
    if !prior {
        tx.execute(
            "UPDATE tasks SET space_digested = 1, updated_at = ?1 WHERE id = ?2",
            params![encode_time(Utc::now()), task_id.to_string()],
        )?;
    }
    Ok(prior)
}

/// Administrative removal.  Not on the core flush path.
pub fn delete_task_tx(tx: &Transaction<'_>, task_id: Uuid) -> Result<(), StoreError> {
    tx.execute("DELETE FROM tasks WHERE id = ?1", [task_id.to_string()])?;
    Ok(())
}

// ─── Async conveniences ───────────────────────────────────────────────────────

impl Database {
    pub async fn fetch_ordered_tasks(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.with_tx(move |tx| fetch_ordered_tasks_tx(tx, session_id))
            .await
    }

    pub async fn fetch_planning_task(
        &self,
        session_id: Uuid,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.with_tx(move |tx| fetch_planning_task_tx(tx, session_id))
            .await
    }

    pub async fn fetch_task(&self, task_id: Uuid) -> Result<TaskRecord, StoreError> {
        self.with_tx(move |tx| fetch_task_tx(tx, task_id)).await
    }

    pub async fn insert_task(
        &self,
        session_id: Uuid,
        after_order: i64,
        data: Value,
        status: ProcessStatus,
    ) -> Result<TaskRecord, StoreError> {
        self.with_tx(move |tx| insert_task_tx(tx, session_id, after_order, data, status))
            .await
    }

    pub async fn update_task(
        &self,
        task_id: Uuid,
        status: Option<ProcessStatus>,
        patch_data: Option<Map<String, Value>>,
    ) -> Result<TaskRecord, StoreError> {
        self.with_tx(move |tx| update_task_tx(tx, task_id, status, patch_data))
            .await
    }

    pub async fn append_messages_to_task(
        &self,
        message_ids: Vec<Uuid>,
        task_id: Uuid,
    ) -> Result<(), StoreError> {
        self.with_tx(move |tx| append_messages_to_task_tx(tx, &message_ids, task_id))
            .await
    }

    pub async fn append_messages_to_planning_section(
        &self,
        session_id: Uuid,
        message_ids: Vec<Uuid>,
    ) -> Result<Uuid, StoreError> {
        self.with_tx(move |tx| append_messages_to_planning_tx(tx, session_id, &message_ids))
            .await
    }

    pub async fn set_task_space_digested(&self, task_id: Uuid) -> Result<bool, StoreError> {
        self.with_tx(move |tx| set_task_space_digested_tx(tx, task_id))
            .await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.with_tx(move |tx| delete_task_tx(tx, task_id)).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

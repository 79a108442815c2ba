// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use rusqlite::Connection;

/// Relational schema.
///
/// Timestamps are stored as fixed-width RFC 3339 strings (UTC, microsecond
/// precision) so that lexicographic ordering equals chronological ordering —
/// `created_at` is the per-session ordering key.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY,
    session_id      TEXT NOT NULL,
    "order"         INTEGER NOT NULL,
    data            TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'success', 'failed')),
    is_planning     INTEGER NOT NULL DEFAULT 0,
    space_digested  INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (session_id, "order")
);

CREATE INDEX IF NOT EXISTS idx_tasks_session        ON tasks (session_id);
CREATE INDEX IF NOT EXISTS idx_tasks_session_status ON tasks (session_id, status);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL,
    role        TEXT NOT NULL
        CHECK (role IN ('user', 'assistant', 'system', 'tool', 'function')),
    parts_meta  TEXT NOT NULL,
    parent_id   TEXT REFERENCES messages (id) ON DELETE CASCADE,
    task_id     TEXT REFERENCES tasks (id) ON DELETE SET NULL,
    session_task_process_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (session_task_process_status IN ('pending', 'running', 'success', 'failed')),
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session_created ON messages (session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_session_status
    ON messages (session_id, session_task_process_status);
CREATE INDEX IF NOT EXISTS idx_messages_task ON messages (task_id);
"#;

/// Apply the schema to a fresh or existing connection.  Idempotent.
pub(crate) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(DDL)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
    }

    #[test]
    fn status_check_constraint_rejects_unknown_values() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        let r = conn.execute(
            "INSERT INTO tasks (id, session_id, \"order\", data, status, created_at, updated_at) \
             VALUES ('t1', 's1', 1, '{}', 'done', '2026-01-01T00:00:00.000000+00:00', \
                     '2026-01-01T00:00:00.000000+00:00')",
            [],
        );
        assert!(r.is_err());
    }

    #[test]
    fn session_order_uniqueness_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        let insert = "INSERT INTO tasks (id, session_id, \"order\", data, created_at, updated_at) \
                      VALUES (?1, 's1', 1, '{}', '2026-01-01T00:00:00.000000+00:00', \
                              '2026-01-01T00:00:00.000000+00:00')";
        conn.execute(insert, ["t1"]).unwrap();
        assert!(conn.execute(insert, ["t2"]).is_err());
    }
}

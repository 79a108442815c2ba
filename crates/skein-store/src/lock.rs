// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Key of the per-session flush mutex.
pub fn session_lock_key(session_id: uuid::Uuid) -> String {
    format!("session.message.insert.lock.{session_id}")
}

/// TTL-bounded KV mutex store.
///
/// Advisory only: correctness of task mutation does not depend on it (the
/// database transaction and the `(session_id, "order")` constraint hold
/// independently), but honoring it is what serializes flushes per session.
/// No fairness, no reentrancy.  An entry whose TTL has passed counts as free,
/// which is the crash-recovery path: a worker that died holding the lock
/// stops blocking its session after `processing_timeout`.
#[derive(Default)]
pub struct SessionLockStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl SessionLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare-and-set acquire.  Returns `false` when the key is held and
    /// unexpired.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                entries.insert(key.to_string(), now + ttl);
                debug!(key, ttl_secs = ttl.as_secs(), "session lock acquired");
                true
            }
        }
    }

    /// Best-effort delete.  Releasing a key that is not held is a no-op.
    pub async fn release(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            debug!(key, "session lock released");
        }
    }

    /// Whether the key is currently held (unexpired).  Test/introspection aid.
    pub async fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .is_some_and(|expires| *expires > now)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use skein_broker::{Outcome, Publisher};
use skein_config::Config;
use skein_core::TaskAgent;
use skein_store::{session_lock_key, BlobStore, Database, ProcessStatus, SessionLockStore};

use crate::topology::{InsertNewMessage, RK_BUFFER_PROCESS, RK_INSERT_RETRY, SESSION_MESSAGE_EXCHANGE};

/// Structured result of the blocking flush primitive.  `status = 0` is
/// success; any other code is a domain error.  Ingress serializes this —
/// routine failures never cross the boundary as exceptions.
#[derive(Debug, Clone, Serialize)]
pub struct FlushResult {
    pub status: i32,
    pub errmsg: String,
}

impl FlushResult {
    pub const OK: i32 = 0;
    pub const PROCESS_FAILED: i32 = 1;

    fn ok() -> Self {
        Self {
            status: Self::OK,
            errmsg: String::new(),
        }
    }

    fn failed(errmsg: String) -> Self {
        Self {
            status: Self::PROCESS_FAILED,
            errmsg,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}

/// The admission/wait/flush state machine behind the session-message queues.
pub struct FlushController {
    config: Arc<Config>,
    db: Database,
    locks: Arc<SessionLockStore>,
    blobs: Arc<dyn BlobStore>,
    publisher: Publisher,
    agent: TaskAgent,
}

impl FlushController {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        locks: Arc<SessionLockStore>,
        blobs: Arc<dyn BlobStore>,
        publisher: Publisher,
        agent: TaskAgent,
    ) -> Self {
        Self {
            config,
            db,
            locks,
            blobs,
            publisher,
            agent,
        }
    }

    fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.config.lock.processing_timeout_seconds)
    }

    fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.config.lock.session_lock_wait_seconds)
    }

    /// Latest-wins admission: only the notification carrying the session's
    /// current newest pending message id may drive a flush.
    async fn is_latest_pending(&self, body: &InsertNewMessage) -> anyhow::Result<bool> {
        match self.db.latest_pending_id(body.session_id).await? {
            None => {
                debug!(session_id = %body.session_id, "no pending message found, ignore");
                Ok(false)
            }
            Some(latest) if latest != body.message_id => {
                debug!(
                    message_id = %body.message_id,
                    latest = %latest,
                    "message is not the latest pending message, ignore"
                );
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    fn park(&self, body: &InsertNewMessage) -> anyhow::Result<()> {
        self.publisher.publish(
            SESSION_MESSAGE_EXCHANGE,
            RK_INSERT_RETRY,
            serde_json::to_string(body)?,
        );
        Ok(())
    }

    /// Insert-entry handler: admission, threshold, then the flush sequence.
    pub async fn handle_insert(&self, body: InsertNewMessage) -> anyhow::Result<Outcome> {
        if !self.is_latest_pending(&body).await? {
            return Ok(Outcome::Ack);
        }

        let pending = self.db.count_pending(body.session_id).await?;
        if pending < self.config.project.buffer_max_turns {
            // Idle-flush path: wake up after the buffer TTL and force a
            // flush.  If newer messages arrive meanwhile, the latest-wins
            // check on delivery makes this wakeup a no-op.
            let wait = Duration::from_secs(self.config.project.buffer_ttl_seconds);
            info!(
                pending,
                wait_secs = wait.as_secs(),
                "buffer below threshold, waiting for next turn or idle flush"
            );
            let publisher = self.publisher.clone();
            let body_json = serde_json::to_string(&body)?;
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                publisher.publish(SESSION_MESSAGE_EXCHANGE, RK_BUFFER_PROCESS, body_json);
            });
            return Ok(Outcome::Ack);
        }

        info!(pending, "session message buffer is full, start process");
        self.lock_and_process(&body).await
    }

    /// Buffer-process handler: same sequence without the threshold check —
    /// delivery on this queue is itself the signal that idle time elapsed.
    pub async fn handle_buffer_process(&self, body: InsertNewMessage) -> anyhow::Result<Outcome> {
        if !self.is_latest_pending(&body).await? {
            return Ok(Outcome::Ack);
        }
        info!(message_id = %body.message_id, "message idle, process it now");
        self.lock_and_process(&body).await
    }

    /// Lock acquisition, overflow detection, and the claim-to-release
    /// sequence.  Contention parks the notification instead of erroring.
    async fn lock_and_process(&self, body: &InsertNewMessage) -> anyhow::Result<Outcome> {
        let key = session_lock_key(body.session_id);
        if !self.locks.try_acquire(&key, self.lock_ttl()).await {
            debug!(
                message_id = %body.message_id,
                wait_secs = self.lock_wait().as_secs(),
                "session is locked, parking notification for retry"
            );
            self.park(body)?;
            return Ok(Outcome::Ack);
        }

        let result = self.locked_flush(body).await;
        // Guaranteed release: the flush result — success or error — must not
        // skip this.
        self.locks.release(&key).await;
        result.map(|_| Outcome::Ack)
    }

    async fn locked_flush(&self, body: &InsertNewMessage) -> anyhow::Result<()> {
        let pending = self.db.count_pending(body.session_id).await?;
        let max_claim = self.config.project.max_claim();
        if pending > max_claim {
            // Overflow: this flush drains at most max_claim messages.  Park a
            // copy of the notification now; after this flush completes the
            // parked copy comes back and drives another flush for the rest.
            info!(
                pending,
                max_claim,
                "session message buffer overflow, truncating; \
                 the rest will be re-processed after the parked retry"
            );
            self.park(body)?;
        }
        self.process_pending(body.project_id, body.session_id).await
    }

    /// Steps 5–8: claim, hydrate, run the agent, finalize batch status.
    ///
    /// Caller must hold the session lock.
    pub async fn process_pending(&self, project_id: Uuid, session_id: Uuid) -> anyhow::Result<()> {
        let claimed = self
            .db
            .claim_oldest_pending(session_id, self.config.project.max_claim())
            .await?;
        if claimed.is_empty() {
            return Ok(());
        }
        info!(count = claimed.len(), "claimed pending session messages to process");

        let result = self.run_agent(project_id, session_id, &claimed).await;

        let final_status = if result.is_ok() {
            ProcessStatus::Success
        } else {
            ProcessStatus::Failed
        };
        if let Err(e) = self
            .db
            .update_message_status(claimed.clone(), final_status)
            .await
        {
            warn!(error = %e, "failed to finalize batch status");
            return result.and(Err(e.into()));
        }
        if let Err(e) = &result {
            warn!(
                count = claimed.len(),
                error = %e,
                "agent failed; claimed batch marked failed"
            );
        }
        result
    }

    async fn run_agent(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        claimed: &[Uuid],
    ) -> anyhow::Result<()> {
        let batch = self
            .db
            .fetch_messages(claimed.to_vec(), self.blobs.as_ref())
            .await?;
        let previous = self
            .db
            .fetch_previous_messages(
                session_id,
                batch[0].created_at,
                self.config.project.previous_messages_turns,
                self.blobs.as_ref(),
            )
            .await?;
        self.agent
            .run(project_id, session_id, &previous, &batch)
            .await
    }

    /// Blocking flush for synchronous "commit now" ingress operations.
    ///
    /// Spin-waits on the session lock (no deadline), runs the claim-to-
    /// release sequence, and returns the structured result.
    pub async fn flush_session(&self, project_id: Uuid, session_id: Uuid) -> FlushResult {
        let key = session_lock_key(session_id);
        while !self.locks.try_acquire(&key, self.lock_ttl()).await {
            tokio::time::sleep(self.lock_wait()).await;
        }
        let result = self.process_pending(project_id, session_id).await;
        self.locks.release(&key).await;

        match result {
            Ok(()) => FlushResult::ok(),
            Err(e) => FlushResult::failed(format!("{e:#}")),
        }
    }

    /// Ingress seam: announce a newly inserted message to the pipeline.
    pub fn notify_message_inserted(&self, body: &InsertNewMessage) -> anyhow::Result<()> {
        self.publisher.publish(
            SESSION_MESSAGE_EXCHANGE,
            crate::topology::RK_INSERT,
            serde_json::to_string(body)?,
        );
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::{controller_fixture, insert_user_message, ControllerFixture};

    #[tokio::test]
    async fn stale_notification_is_dropped() {
        let f: ControllerFixture = controller_fixture(Default::default()).await;
        let session_id = Uuid::new_v4();
        let m1 = insert_user_message(&f, session_id, "one").await;
        let _m2 = insert_user_message(&f, session_id, "two").await;

        let outcome = f
            .controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: m1,
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ack);
        // Nothing was claimed: both messages still pending.
        assert_eq!(f.db.count_pending(session_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn notification_for_empty_session_is_dropped() {
        let f = controller_fixture(Default::default()).await;
        let outcome = f
            .controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ack);
    }

    #[tokio::test]
    async fn at_threshold_flushes_immediately() {
        let mut config = skein_config::Config::default();
        config.project.buffer_max_turns = 3;
        let f = controller_fixture(config).await;
        let session_id = Uuid::new_v4();
        let mut last = Uuid::nil();
        for i in 0..3 {
            last = insert_user_message(&f, session_id, &format!("m{i}")).await;
        }

        f.controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: last,
            })
            .await
            .unwrap();

        assert_eq!(f.db.count_pending(session_id).await.unwrap(), 0);
        assert_eq!(
            f.db.message_status(last).await.unwrap(),
            ProcessStatus::Success
        );
    }

    #[tokio::test]
    async fn below_threshold_defers_to_idle_flush() {
        let mut config = skein_config::Config::default();
        config.project.buffer_max_turns = 3;
        config.project.buffer_ttl_seconds = 60;
        let f = controller_fixture(config).await;
        let session_id = Uuid::new_v4();
        let m = insert_user_message(&f, session_id, "only").await;

        f.controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: m,
            })
            .await
            .unwrap();
        // Not flushed now; the idle republish is parked on a 60 s timer.
        assert_eq!(f.db.count_pending(session_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn buffer_process_skips_threshold() {
        let mut config = skein_config::Config::default();
        config.project.buffer_max_turns = 16;
        let f = controller_fixture(config).await;
        let session_id = Uuid::new_v4();
        let m = insert_user_message(&f, session_id, "idle").await;

        f.controller
            .handle_buffer_process(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: m,
            })
            .await
            .unwrap();
        assert_eq!(
            f.db.message_status(m).await.unwrap(),
            ProcessStatus::Success
        );
    }

    #[tokio::test]
    async fn overflow_parks_exactly_one_retry_copy_before_claiming() {
        let mut config = skein_config::Config::default();
        config.project.buffer_max_turns = 2;
        config.project.buffer_max_overflow = 1;
        let f = controller_fixture(config).await;
        let session_id = Uuid::new_v4();
        let mut last = Uuid::nil();
        for i in 0..5 {
            last = insert_user_message(&f, session_id, &format!("m{i}")).await;
        }

        f.controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: last,
            })
            .await
            .unwrap();

        // One parked copy for the backlog; the claim took max_claim = 3 of
        // the 5 pending messages.
        f.wait_parked(1).await;
        assert_eq!(f.parked.lock().unwrap().len(), 1);
        assert_eq!(f.db.count_pending(session_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn contended_lock_parks_instead_of_flushing() {
        let mut config = skein_config::Config::default();
        config.project.buffer_max_turns = 1;
        let f = controller_fixture(config).await;
        let session_id = Uuid::new_v4();
        let m = insert_user_message(&f, session_id, "held").await;

        let key = session_lock_key(session_id);
        assert!(f.locks.try_acquire(&key, Duration::from_secs(60)).await);

        f.controller
            .handle_insert(InsertNewMessage {
                project_id: Uuid::new_v4(),
                session_id,
                message_id: m,
            })
            .await
            .unwrap();
        // Still pending: the notification went to the parking queue.
        assert_eq!(f.db.count_pending(session_id).await.unwrap(), 1);
        f.wait_parked(1).await;
    }

    #[tokio::test]
    async fn flush_session_waits_for_lock_then_processes() {
        let f = controller_fixture(Default::default()).await;
        let session_id = Uuid::new_v4();
        let m = insert_user_message(&f, session_id, "commit me").await;

        let key = session_lock_key(session_id);
        assert!(f.locks.try_acquire(&key, Duration::from_millis(120)).await);

        // The pre-held lock expires after 120 ms; the blocking flush spins
        // until it can take over.
        let result = f
            .controller
            .flush_session(Uuid::new_v4(), session_id)
            .await;
        assert!(result.is_ok(), "flush failed: {}", result.errmsg);
        assert_eq!(
            f.db.message_status(m).await.unwrap(),
            ProcessStatus::Success
        );
        assert!(!f.locks.is_held(&key).await);
    }

    #[tokio::test]
    async fn flush_session_on_empty_session_is_ok() {
        let f = controller_fixture(Default::default()).await;
        let result = f
            .controller
            .flush_session(Uuid::new_v4(), Uuid::new_v4())
            .await;
        assert_eq!(result.status, FlushResult::OK);
    }
}

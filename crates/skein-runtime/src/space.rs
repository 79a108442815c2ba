// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Consumer side of the `space.task` completion events.
//!
//! The worker owns only the dedupe contract: a task is handed to the space
//! digester at most once, enforced by the atomic `space_digested` flip.  The
//! actual knowledge construction lives behind [`SpaceDigester`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use skein_broker::{Consumer, Delivery, Outcome};
use skein_store::{Database, FsBlobStore, MessageRecord, ProcessStatus, TaskRecord};
use skein_tools::events::NewTaskComplete;

/// Downstream digestion seam.  Implementations receive the completed task
/// and its hydrated messages exactly once per task.
#[async_trait]
pub trait SpaceDigester: Send + Sync {
    async fn digest(
        &self,
        event: &NewTaskComplete,
        task: &TaskRecord,
        messages: &[MessageRecord],
    ) -> anyhow::Result<()>;
}

/// Default digester: records the hand-off in the log and does nothing else.
pub struct LogDigester;

#[async_trait]
impl SpaceDigester for LogDigester {
    async fn digest(
        &self,
        event: &NewTaskComplete,
        task: &TaskRecord,
        messages: &[MessageRecord],
    ) -> anyhow::Result<()> {
        info!(
            task_id = %event.task_id,
            session_id = %event.session_id,
            description = task.task_description(),
            message_count = messages.len(),
            "task handed to space digester"
        );
        Ok(())
    }
}

/// Consumer for `space.task.new.complete`.
pub struct SpaceTaskConsumer {
    db: Database,
    blobs: Arc<FsBlobStore>,
    digester: Arc<dyn SpaceDigester>,
}

impl SpaceTaskConsumer {
    pub fn new(db: Database, blobs: Arc<FsBlobStore>, digester: Arc<dyn SpaceDigester>) -> Self {
        Self {
            db,
            blobs,
            digester,
        }
    }
}

#[async_trait]
impl Consumer for SpaceTaskConsumer {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<Outcome> {
        let event: NewTaskComplete = match serde_json::from_str(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "task-complete event validation failed");
                return Ok(Outcome::Reject);
            }
        };

        let task = match self.db.fetch_task(event.task_id).await {
            Ok(task) => task,
            Err(skein_store::StoreError::NotFound(_)) => {
                info!(task_id = %event.task_id, "completed task no longer exists, ignore");
                return Ok(Outcome::Ack);
            }
            Err(e) => return Err(e.into()),
        };
        if task.status != ProcessStatus::Success {
            info!(task_id = %event.task_id, status = %task.status, "task is not success, skipping");
            return Ok(Outcome::Ack);
        }

        // At-least-once delivery meets the monotonic flip here: only the
        // first delivery observes `false` and proceeds.
        if self.db.set_task_space_digested(event.task_id).await? {
            info!(task_id = %event.task_id, "task is already digested");
            return Ok(Outcome::Ack);
        }

        let messages = self
            .db
            .fetch_messages(task.message_ids.clone(), self.blobs.as_ref())
            .await?;
        self.digester.digest(&event, &task, &messages).await?;
        Ok(Outcome::Ack)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use skein_broker::{Consumer, Delivery, Outcome};

use crate::controller::FlushController;
use crate::topology::InsertNewMessage;

fn parse_body(delivery: &Delivery) -> Result<InsertNewMessage, Outcome> {
    serde_json::from_str(&delivery.body).map_err(|e| {
        // Malformed bodies are fatal at the broker layer: reject without
        // retry (dead-letter if the queue has a route).
        error!(
            routing_key = %delivery.routing_key,
            error = %e,
            "message validation failed"
        );
        Outcome::Reject
    })
}

/// Consumer for `session.message.insert.entry`: new-message notifications.
pub struct InsertEntryConsumer {
    controller: Arc<FlushController>,
}

impl InsertEntryConsumer {
    pub fn new(controller: Arc<FlushController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Consumer for InsertEntryConsumer {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<Outcome> {
        let body = match parse_body(&delivery) {
            Ok(body) => body,
            Err(outcome) => return Ok(outcome),
        };
        debug!(message_id = %body.message_id, "insert new message");
        self.controller.handle_insert(body).await
    }
}

/// Consumer for `session.message.buffer.process`: flush-now notifications
/// from the idle-timeout path.
pub struct BufferProcessConsumer {
    controller: Arc<FlushController>,
}

impl BufferProcessConsumer {
    pub fn new(controller: Arc<FlushController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Consumer for BufferProcessConsumer {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<Outcome> {
        let body = match parse_body(&delivery) {
            Ok(body) => body,
            Err(outcome) => return Ok(outcome),
        };
        self.controller.handle_buffer_process(body).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_body_rejects_without_retry() {
        let delivery = Delivery {
            exchange: "session.message".into(),
            routing_key: "session.message.insert".into(),
            body: "not json".into(),
        };
        assert_eq!(parse_body(&delivery).unwrap_err(), Outcome::Reject);
    }

    #[test]
    fn valid_body_parses() {
        let body = InsertNewMessage {
            project_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            message_id: uuid::Uuid::new_v4(),
        };
        let delivery = Delivery {
            exchange: "session.message".into(),
            routing_key: "session.message.insert".into(),
            body: serde_json::to_string(&body).unwrap(),
        };
        assert_eq!(parse_body(&delivery).unwrap(), body);
    }
}

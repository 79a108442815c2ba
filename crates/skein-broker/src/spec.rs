// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use skein_config::BrokerConfig;

/// One message as seen by a consumer.  Bodies are UTF-8 JSON by contract.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
}

/// What the handler decided about a delivery.
///
/// Errors are reserved for unexpected conditions — they trigger the retry
/// policy and eventually dead-lettering.  Expected control flow (drop this,
/// retry that) is expressed through these variants instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; remove from the queue.
    Ack,
    /// Not processed; put back at the end of the same queue.
    NackRequeue,
    /// Not processable; route to the dead-letter target (or drop).
    Reject,
}

/// A typed queue handler.
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> anyhow::Result<Outcome>;
}

/// How a queue is serviced.
pub enum Binding {
    /// Deliveries are dispatched to the handler.
    Consume(Arc<dyn Consumer>),
    /// No handler: each message sits for the queue's TTL and is then
    /// dead-lettered.  Used as a timer.
    Park,
}

/// Plain-record configuration for a single queue binding.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    /// Time a message may sit in the queue before it is dead-lettered.
    /// Only meaningful for [`Binding::Park`] queues.
    pub message_ttl: Option<Duration>,
    /// Concurrent in-flight deliveries for this queue.
    pub prefetch: usize,
    /// Redelivery attempts after a handler error before dead-lettering.
    pub max_retries: u32,
    /// Backoff unit: the n-th retry waits `retry_delay * n²`.
    pub retry_delay: Duration,
    /// Outer timeout for one handler invocation.
    pub handler_timeout: Duration,
    /// Where rejected / expired messages go: `(exchange, routing_key)`.
    pub dead_letter: Option<(String, String)>,
}

impl QueueSpec {
    /// A spec with the shared defaults from [`BrokerConfig`].
    pub fn new(
        cfg: &BrokerConfig,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
            message_ttl: None,
            prefetch: cfg.global_prefetch,
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_secs_f64(cfg.retry_delay_seconds),
            handler_timeout: Duration::from_secs(cfg.handler_timeout_seconds),
            dead_letter: None,
        }
    }

    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some((exchange.into(), routing_key.into()));
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

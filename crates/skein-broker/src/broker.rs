// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use anyhow::bail;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{Binding, Consumer, Delivery, Outcome, QueueSpec};

/// A message sitting in a queue.  The enqueue instant anchors the TTL of
/// parked messages.
struct Queued {
    delivery: Delivery,
    enqueued_at: Instant,
}

type RouteTable = HashMap<(String, String), Vec<mpsc::UnboundedSender<Queued>>>;

/// Cheap cloneable publishing handle.
///
/// Shared with consumer loops (for requeue and dead-lettering) and with any
/// component that emits events — holding a `Publisher` does not keep consumer
/// tasks alive.
#[derive(Clone, Default)]
pub struct Publisher {
    routes: Arc<RwLock<RouteTable>>,
}

impl Publisher {
    /// Route `body` to every queue bound to `(exchange, routing_key)`.
    ///
    /// An unroutable publish is logged and dropped, matching direct-exchange
    /// semantics for unbound keys.
    pub fn publish(&self, exchange: &str, routing_key: &str, body: impl Into<String>) {
        let body = body.into();
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        match routes.get(&(exchange.to_string(), routing_key.to_string())) {
            Some(senders) => {
                debug!(exchange, routing_key, queues = senders.len(), "publish");
                for tx in senders {
                    let q = Queued {
                        delivery: Delivery {
                            exchange: exchange.to_string(),
                            routing_key: routing_key.to_string(),
                            body: body.clone(),
                        },
                        enqueued_at: Instant::now(),
                    };
                    // A closed receiver means the queue's loop is gone
                    // (shutdown); the message is dropped like any other
                    // in-flight state at process exit.
                    let _ = tx.send(q);
                }
            }
            None => {
                warn!(exchange, routing_key, "unroutable publish dropped");
            }
        }
    }
}

struct Registration {
    spec: QueueSpec,
    binding: Binding,
    receiver: mpsc::UnboundedReceiver<Queued>,
    sender: mpsc::UnboundedSender<Queued>,
}

struct Inner {
    running: bool,
    pending: Vec<Registration>,
    loops: Vec<JoinHandle<()>>,
}

/// The in-process broker: a route table plus one consumer loop per queue.
pub struct Broker {
    publisher: Publisher,
    inner: Mutex<Inner>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            publisher: Publisher::default(),
            inner: Mutex::new(Inner {
                running: false,
                pending: Vec::new(),
                loops: Vec::new(),
            }),
            shutdown_tx,
        }
    }

    /// Declare a queue and bind it to `(spec.exchange, spec.routing_key)`.
    ///
    /// Registration must happen before [`Broker::start`].  Publishes to the
    /// binding are accepted immediately — messages buffer in the queue until
    /// its loop starts.
    pub fn register(&self, spec: QueueSpec, binding: Binding) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.running {
            bail!("cannot register consumers while the broker is running");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut routes = self
                .publisher
                .routes
                .write()
                .unwrap_or_else(|e| e.into_inner());
            routes
                .entry((spec.exchange.clone(), spec.routing_key.clone()))
                .or_default()
                .push(tx.clone());
        }
        info!(
            queue = %spec.queue,
            exchange = %spec.exchange,
            routing_key = %spec.routing_key,
            parked = matches!(binding, Binding::Park),
            "registered consumer"
        );
        inner.pending.push(Registration {
            spec,
            binding,
            receiver: rx,
            sender: tx,
        });
        Ok(())
    }

    /// Publishing handle, shareable across components.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn publish(&self, exchange: &str, routing_key: &str, body: impl Into<String>) {
        self.publisher.publish(exchange, routing_key, body)
    }

    /// Start one loop per registered queue.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.running {
            bail!("broker is already running");
        }
        if inner.pending.is_empty() {
            bail!("no consumers registered");
        }
        inner.running = true;

        let registrations = std::mem::take(&mut inner.pending);
        let count = registrations.len();
        for reg in registrations {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let publisher = self.publisher.clone();
            let handle = match reg.binding {
                Binding::Consume(consumer) => tokio::spawn(consume_loop(
                    reg.spec,
                    reg.receiver,
                    reg.sender,
                    consumer,
                    publisher,
                    shutdown_rx,
                )),
                Binding::Park => {
                    tokio::spawn(park_loop(reg.spec, reg.receiver, publisher, shutdown_rx))
                }
            };
            inner.loops.push(handle);
        }
        info!(count, "started all consumers");
        Ok(())
    }

    /// Stop consumer loops and await in-flight processing.
    pub async fn shutdown(&self) {
        let loops = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.running {
                return;
            }
            inner.running = false;
            std::mem::take(&mut inner.loops)
        };
        info!(count = loops.len(), "stopping consumers");
        let _ = self.shutdown_tx.send(true);
        for handle in loops {
            let _ = handle.await;
        }
        info!("all consumers stopped");
    }
}

/// Dispatch loop for a handled queue.  Concurrency is bounded by the spec's
/// prefetch; in-flight deliveries are awaited on shutdown.
async fn consume_loop(
    spec: QueueSpec,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    requeue_tx: mpsc::UnboundedSender<Queued>,
    consumer: Arc<dyn Consumer>,
    publisher: Publisher,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        queue = %spec.queue,
        exchange = %spec.exchange,
        routing_key = %spec.routing_key,
        "looping consumer"
    );
    let semaphore = Arc::new(Semaphore::new(spec.prefetch.max(1)));
    let spec = Arc::new(spec);
    let mut inflight = JoinSet::new();

    loop {
        // Reap finished deliveries so the set does not grow unbounded.
        while inflight.try_join_next().is_some() {}

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            queued = rx.recv() => {
                let Some(queued) = queued else { break };
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let spec = Arc::clone(&spec);
                let consumer = Arc::clone(&consumer);
                let publisher = publisher.clone();
                let requeue_tx = requeue_tx.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    process_delivery(&spec, queued.delivery, consumer, publisher, requeue_tx)
                        .await;
                });
            }
        }
    }

    debug!(queue = %spec.queue, "consumer loop draining in-flight deliveries");
    while inflight.join_next().await.is_some() {}
}

/// One delivery through the retry policy.
async fn process_delivery(
    spec: &QueueSpec,
    delivery: Delivery,
    consumer: Arc<dyn Consumer>,
    publisher: Publisher,
    requeue_tx: mpsc::UnboundedSender<Queued>,
) {
    let mut attempt: u32 = 0;
    loop {
        let started = Instant::now();
        let result =
            tokio::time::timeout(spec.handler_timeout, consumer.handle(delivery.clone())).await;

        let err = match result {
            Ok(Ok(Outcome::Ack)) => {
                debug!(
                    queue = %spec.queue,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "delivery processed"
                );
                return;
            }
            Ok(Ok(Outcome::NackRequeue)) => {
                debug!(queue = %spec.queue, "delivery requeued by handler");
                let _ = requeue_tx.send(Queued {
                    delivery,
                    enqueued_at: Instant::now(),
                });
                return;
            }
            Ok(Ok(Outcome::Reject)) => {
                dead_letter(spec, &delivery, &publisher, "rejected by handler");
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!(
                "handler timeout after {:.0}s",
                spec.handler_timeout.as_secs_f64()
            ),
        };

        attempt += 1;
        if attempt <= spec.max_retries {
            // Quadratic backoff in units of retry_delay.
            let wait = spec.retry_delay * attempt * attempt;
            warn!(
                queue = %spec.queue,
                attempt,
                max_retries = spec.max_retries,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "delivery failed; retrying"
            );
            tokio::time::sleep(wait).await;
        } else {
            error!(queue = %spec.queue, error = %err, "delivery failed permanently");
            dead_letter(spec, &delivery, &publisher, "handler failed");
            return;
        }
    }
}

fn dead_letter(spec: &QueueSpec, delivery: &Delivery, publisher: &Publisher, reason: &str) {
    match &spec.dead_letter {
        Some((exchange, routing_key)) => {
            debug!(
                queue = %spec.queue,
                target_exchange = %exchange,
                target_routing_key = %routing_key,
                reason,
                "dead-lettering delivery"
            );
            publisher.publish(exchange, routing_key, delivery.body.clone());
        }
        None => {
            warn!(queue = %spec.queue, reason, "dropping delivery (no dead-letter route)");
        }
    }
}

/// Loop for a parking queue: each message sits for the queue TTL, then
/// dead-letters.  FIFO plus a constant TTL keeps deadlines ordered, so the
/// sequential sleep is exact.
async fn park_loop(
    spec: QueueSpec,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    publisher: Publisher,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let ttl = match spec.message_ttl {
        Some(ttl) => ttl,
        None => {
            error!(queue = %spec.queue, "parking queue registered without a TTL; loop disabled");
            return;
        }
    };
    info!(queue = %spec.queue, ttl_ms = ttl.as_millis() as u64, "parking queue ready");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            queued = rx.recv() => {
                let Some(queued) = queued else { break };
                let deadline = queued.enqueued_at + ttl;
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        dead_letter(&spec, &queued.delivery, &publisher, "message ttl expired");
                    }
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

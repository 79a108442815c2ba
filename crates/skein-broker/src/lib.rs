// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! In-process message broker with AMQP-shaped semantics.
//!
//! Direct exchanges route by exact routing key to bound queues.  Each queue
//! is either consumed by a typed handler (ack / nack-requeue / reject with
//! retry and dead-lettering) or registered as a *parking* queue: no
//! consumer, a per-message TTL, and a dead-letter route — the timer
//! primitive the buffer controller uses for lock-contention retries.
//!
//! The broker product behind this interface is replaceable by contract; the
//! in-process implementation keeps the worker self-contained and the
//! semantics testable without external infrastructure.

mod broker;
mod spec;

pub use broker::{Broker, Publisher};
pub use spec::{Binding, Consumer, Delivery, Outcome, QueueSpec};

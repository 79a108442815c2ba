// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Worker runtime: gateway construction and the buffer & lock controller.
//!
//! [`build_runtime`] constructs every gateway in dependency order and wires
//! the four consumers — no import-time singletons, each consumer receives
//! its handles explicitly.  The controller implements the
//! admission/wait/flush state machine: latest-wins admission, the
//! time-and-count buffer window, per-session lock serialization, and the
//! overflow truncation contract.

mod consumers;
mod controller;
mod runtime;
mod space;
pub mod topology;

pub use consumers::{BufferProcessConsumer, InsertEntryConsumer};
pub use controller::{FlushController, FlushResult};
pub use runtime::{build_runtime, build_runtime_with, Runtime};
pub use space::{LogDigester, SpaceDigester, SpaceTaskConsumer};
pub use topology::InsertNewMessage;

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The task tool library.
//!
//! Five tools the agent may invoke during a flush: `insert_task`,
//! `update_task`, `append_messages_to_task`,
//! `append_messages_to_planning_section`, and `finish`.  Handlers are bound
//! to a [`TaskContext`] that resolves the model's 1-based task orders and
//! 0-based batch message indices to real ids.
//!
//! Handlers return `Ok(text)` for everything the model can self-correct
//! (bounds violations, missing arguments) — the text is fed back as the tool
//! result.  `Err` is reserved for infrastructure failures and is fatal for
//! the flush.

mod context;
pub mod events;
mod registry;
pub mod task;
mod tool;

pub use context::TaskContext;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::Tool;

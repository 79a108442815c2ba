// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "skein",
    about = "Session task-distillation worker",
    long_about = "Buffers chat-session messages and, once a batch settles, drives an LLM \
                  task-management agent that keeps each session's task list in sync with \
                  the conversation."
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker: start all queue consumers and block until SIGINT
    Run,
    /// Print the effective merged configuration and exit
    ShowConfig,
    /// Flush one session's pending messages synchronously and print the result
    Flush {
        #[arg(long)]
        project_id: Uuid,
        #[arg(long)]
        session_id: Uuid,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{Completion, CompletionRequest};

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier for status display and logs.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Run one completion turn.
    ///
    /// Implementations translate the request to their wire format and
    /// normalize the response; tool-call arguments arrive at the caller as
    /// JSON objects, never raw fragments.  Timeouts are the caller's
    /// concern — the agent loop wraps this call.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion>;
}

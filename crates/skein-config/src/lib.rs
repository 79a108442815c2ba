// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;

pub use loader::load;
pub use schema::{
    BlobsConfig, BrokerConfig, Config, DatabaseConfig, LlmConfig, LockConfig, ProjectConfig,
};

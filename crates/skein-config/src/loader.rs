// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Candidate config files, weakest first: the system directory, then the
/// user's config directory, then the working directory.  Within one
/// directory `.yaml` is read before `.yml`, so `.yml` wins on conflict.
fn discovered_layers() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = vec![PathBuf::from("/etc/skein")];
    if let Some(user) = dirs::config_dir() {
        dirs.push(user.join("skein"));
    }

    let mut layers = Vec::new();
    for dir in dirs {
        for ext in ["yaml", "yml"] {
            layers.push(dir.join(format!("config.{ext}")));
        }
    }
    // Worker-local files, dotted variant first so the visible one wins.
    for name in [".skein", "skein"] {
        for ext in ["yaml", "yml"] {
            layers.push(PathBuf::from(format!("{name}.{ext}")));
        }
    }
    layers
}

fn parse_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Lay `patch` over `base`.
///
/// Mappings combine key by key so a layer can override a single field
/// without restating its section.  Anything else — scalars, sequences, a
/// section replaced by a scalar — is taken wholesale from the patch.
fn overlay(base: serde_yaml::Value, patch: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, patch) {
        (Value::Mapping(mut merged), Value::Mapping(patch)) => {
            for (key, value) in patch {
                let value = match merged.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Mapping(merged)
        }
        // An empty YAML file parses to Null; it must not erase lower layers.
        (base, Value::Null) => base,
        (_, patch) => patch,
    }
}

/// Assemble the configuration from every discovered layer, strongest last.
///
/// Discovered files are optional; an `extra` path (the `--config` flag) is
/// not — pointing the worker at a file that cannot be read is a startup
/// error, as is any layer that fails to deserialize.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Null;

    for path in discovered_layers() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "applying config layer");
        merged = overlay(merged, parse_layer(&path)?);
    }
    if let Some(path) = extra {
        debug!(path = %path.display(), "applying explicit config");
        merged = overlay(merged, parse_layer(path)?);
    }

    let mut config = match merged {
        serde_yaml::Value::Null => Config::default(),
        value => serde_yaml::from_value(value).context("invalid configuration")?,
    };

    // Expand `~` and `$VAR` in filesystem paths so config files can be shared
    // across machines without hard-coded home directories.  An undefined
    // variable leaves the path as written.
    if let Ok(expanded) = shellexpand::full(&config.database.path) {
        config.database.path = expanded.into_owned();
    }
    if let Ok(expanded) = shellexpand::full(&config.blobs.root) {
        config.blobs.root = expanded.into_owned();
    }

    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

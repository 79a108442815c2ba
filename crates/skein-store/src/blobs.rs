// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::StoreError;

/// Object-store gateway for message-part blobs.
///
/// Blobs are immutable once written; `download` is the only operation the
/// flush path uses.  `upload` exists for the ingress seam and tests.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem-backed blob store.  Keys map to paths under `root`; key
/// segments may not escape it.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if key.is_empty() || escapes {
            return Err(StoreError::Blob(format!("invalid blob key {key:?}")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::Blob(format!("read {key:?}: {e}")))
    }

    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Blob(format!("mkdir for {key:?}: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Blob(format!("write {key:?}: {e}")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store.upload("a/b/c.json", b"[1,2,3]").await.unwrap();
        assert_eq!(store.download("a/b/c.json").await.unwrap(), b"[1,2,3]");
    }

    #[tokio::test]
    async fn download_missing_key_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());
        assert!(matches!(
            store.download("nope.json").await,
            Err(StoreError::Blob(_))
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());
        assert!(store.download("../etc/passwd").await.is_err());
        assert!(store.upload("/abs/path", b"x").await.is_err());
        assert!(store.download("").await.is_err());
    }
}

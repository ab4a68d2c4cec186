//! Write seam for the live-upload subsystem's S3-compatible destination:
//! `<prefix>/<site>/LIVE_<table>/...` key layout, UTF-8 JSON bytes.
//! [`ObjectStoreWriter`] is the trait seam a real S3 client would implement;
//! [`LocalObjectStore`] is a real (not mocked) filesystem-backed writer used
//! by tests and by anyone running this without an AWS account.

use crate::error::LiveUploadError;
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait ObjectStoreWriter: Send + Sync {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LiveUploadError>;
}

/// Writes each key under `root` as a plain file, creating parent directories as
/// needed. `key` segments (site, table, filename) become path components.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStoreWriter for LocalObjectStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), LiveUploadError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_bytes_under_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store
            .write("ALIC1/LIVE_SOILMET_30MIN/1700000000000_abc.json", b"{}")
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("ALIC1/LIVE_SOILMET_30MIN/1700000000000_abc.json")).unwrap();
        assert_eq!(written, b"{}");
    }
}

//! Filesystem-backed blob store.
//!
//! `scheme://bucket/object` maps onto `<root>/bucket/object`; the scheme is
//! kept in listed URIs but otherwise ignored. Useful for local runs, for the
//! CLI, and as the output target of an OCR engine writing to shared disk.

use super::{split_uri, BlobStore};
use crate::error::BackendError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, uri: &str) -> Result<PathBuf, BackendError> {
        let (_, bucket, object) = split_uri(uri)?;
        if object.split('/').any(|part| part == "..") {
            return Err(BackendError::Failed(format!(
                "object path escapes its bucket: {uri}"
            )));
        }
        Ok(self.root.join(bucket).join(object))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.object_path(uri)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound {
                uri: uri.to_string(),
            }),
            Err(e) => Err(BackendError::Failed(format!("{}: {e}", path.display()))),
        }
    }

    async fn list(&self, prefix_uri: &str) -> Result<Vec<String>, BackendError> {
        let (scheme, bucket, prefix) = split_uri(prefix_uri)?;
        let bucket_dir = self.root.join(bucket);

        let mut found = Vec::new();
        let mut pending = vec![bucket_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackendError::Failed(format!("{}: {e}", dir.display()))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BackendError::Failed(e.to_string()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| BackendError::Failed(e.to_string()))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let object = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if object.starts_with(prefix) {
                    found.push(format!("{scheme}://{bucket}/{object}"));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

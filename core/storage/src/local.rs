//! Local filesystem object store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{ListPage, ObjectHead, ObjectStore, PutReceipt, MAX_DELETE_BATCH};
use bucketsync_common::{Error, Fingerprint, Headers, RemoteOp, Result};

/// Local filesystem object store.
///
/// A directory stands in for a bucket: each key is a file below `root`,
/// with `/` in keys mapped to subdirectories. Headers are accepted but not
/// persisted. ETags are quoted MD5 digests of the file content.
pub struct LocalStore {
    bucket: String,
    root: PathBuf,
    page_size: usize,
}

impl LocalStore {
    /// Create a new local store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(bucket: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            bucket: bucket.into(),
            root,
            page_size: MAX_DELETE_BATCH,
        })
    }

    /// Set the maximum number of keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Convert a key to a filesystem path, rejecting keys that escape the root.
    fn to_fs_path(&self, key: &str, op: RemoteOp) -> Result<PathBuf> {
        let mut fs_path = self.root.clone();
        for component in key.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(Error::remote(op, key, Some(400), "key escapes the store root"));
                }
                c => fs_path.push(c),
            }
        }
        if fs_path == self.root {
            return Err(Error::remote(op, key, Some(400), "empty key"));
        }
        Ok(fs_path)
    }

    /// Collect every key below the root, sorted.
    async fn all_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{}/{}", rel, name)
                };

                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), key));
                } else {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn io_error(op: RemoteOp, key: &str, err: std::io::Error) -> Error {
        let status = match err.kind() {
            ErrorKind::NotFound => Some(404),
            ErrorKind::PermissionDenied => Some(403),
            _ => None,
        };
        Error::remote(op, key, status, err.to_string())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        let fs_path = self.to_fs_path(key, RemoteOp::Head)?;

        let fs_meta = match fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(RemoteOp::Head, key, e)),
        };

        let data = fs::read(&fs_path)
            .await
            .map_err(|e| Self::io_error(RemoteOp::Head, key, e))?;
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(|t| t.into());

        Ok(Some(ObjectHead {
            etag: Some(Fingerprint::of(&data).as_str().to_string()),
            last_modified: modified,
        }))
    }

    async fn put(&self, key: &str, body: Vec<u8>, _headers: &Headers) -> Result<PutReceipt> {
        let fs_path = self.to_fs_path(key, RemoteOp::Put)?;

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(RemoteOp::Put, key, e))?;
        }

        fs::write(&fs_path, &body)
            .await
            .map_err(|e| Self::io_error(RemoteOp::Put, key, e))?;

        debug!("Wrote {} bytes to {}", body.len(), fs_path.display());
        Ok(PutReceipt { written_at: Utc::now() })
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let all = self
            .all_keys()
            .await
            .map_err(|e| Error::remote(RemoteOp::List, prefix, None, e.to_string()))?;

        let mut keys: Vec<String> = all
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| token.map_or(true, |t| k.as_str() > t))
            .take(self.page_size + 1)
            .collect();

        let next_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, next_token })
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(Error::remote(
                RemoteOp::DeleteBatch,
                keys.first().cloned().unwrap_or_default(),
                Some(400),
                format!("{} keys exceed the batch limit of {}", keys.len(), MAX_DELETE_BATCH),
            ));
        }

        for key in keys {
            let fs_path = self.to_fs_path(key, RemoteOp::DeleteBatch)?;
            match fs::remove_file(&fs_path).await {
                Ok(()) => {}
                // Deleting an absent key succeeds, as on object stores.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Self::io_error(RemoteOp::DeleteBatch, key, e)),
            }
        }

        Ok(())
    }
}

//! In-memory object store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use bucketsync_common::{Error, Fingerprint, Headers, RemoteOp, Result};
use crate::provider::{ListPage, ObjectHead, ObjectStore, PutReceipt, MAX_DELETE_BATCH};

/// Stored object.
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    headers: Headers,
    etag: String,
    modified: DateTime<Utc>,
}

/// Number of remote calls served, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub heads: usize,
    pub puts: usize,
    pub lists: usize,
    pub delete_batches: usize,
    /// Size of each delete batch, in call order.
    pub delete_batch_sizes: Vec<usize>,
}

impl CallCounts {
    /// Total number of remote calls.
    pub fn total(&self) -> usize {
        self.heads + self.puts + self.lists + self.delete_batches
    }
}

#[derive(Debug, Default)]
struct Faults {
    head: HashMap<String, u16>,
    put: HashMap<String, u16>,
    /// Fail list pages once this many pages have been served.
    list_after: Option<(usize, u16)>,
    /// Fail the delete batch with this zero-based call index.
    delete_batch_at: Option<(usize, u16)>,
}

/// In-memory object store.
///
/// Keys are kept sorted so listings are deterministic. ETags are quoted MD5
/// digests, like S3 for single-part uploads. All data is lost on drop.
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, Entry>>,
    calls: Mutex<CallCounts>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    /// Create a new empty memory store for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: MAX_DELETE_BATCH,
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(CallCounts::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Set the maximum number of keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store an object without counting it as a remote call.
    pub fn seed(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let entry = Entry {
            etag: Fingerprint::of(&data).as_str().to_string(),
            data,
            headers: Headers::new(),
            modified: Utc::now(),
        };
        self.objects().insert(key.into(), entry);
    }

    /// Content of a stored object.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).map(|e| e.data.clone())
    }

    /// Headers a stored object was written with.
    pub fn headers(&self, key: &str) -> Option<Headers> {
        self.objects().get(key).map(|e| e.headers.clone())
    }

    /// Check whether a key is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reset the call counters.
    pub fn reset_calls(&self) {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) = CallCounts::default();
    }

    /// Make probes of `key` fail with `status`.
    pub fn fail_head(&self, key: impl Into<String>, status: u16) {
        self.faults().head.insert(key.into(), status);
    }

    /// Make writes of `key` fail with `status`.
    pub fn fail_put(&self, key: impl Into<String>, status: u16) {
        self.faults().put.insert(key.into(), status);
    }

    /// Make listing fail with `status` once `pages` pages have been served.
    pub fn fail_list_after(&self, pages: usize, status: u16) {
        self.faults().list_after = Some((pages, status));
    }

    /// Make the delete batch call with zero-based index `batch` fail.
    pub fn fail_delete_batch_at(&self, batch: usize, status: u16) {
        self.faults().delete_batch_at = Some((batch, status));
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record<F: FnOnce(&mut CallCounts)>(&self, f: F) -> CallCounts {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut calls);
        calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        self.record(|c| c.heads += 1);

        if let Some(status) = self.faults().head.get(key).copied() {
            return Err(Error::remote(RemoteOp::Head, key, Some(status), "injected failure"));
        }

        Ok(self.objects().get(key).map(|e| ObjectHead {
            etag: Some(e.etag.clone()),
            last_modified: Some(e.modified),
        }))
    }

    async fn put(&self, key: &str, body: Vec<u8>, headers: &Headers) -> Result<PutReceipt> {
        self.record(|c| c.puts += 1);

        if let Some(status) = self.faults().put.get(key).copied() {
            return Err(Error::remote(RemoteOp::Put, key, Some(status), "injected failure"));
        }

        let written_at = Utc::now();
        let entry = Entry {
            etag: Fingerprint::of(&body).as_str().to_string(),
            data: body,
            headers: headers.clone(),
            modified: written_at,
        };
        self.objects().insert(key.to_string(), entry);

        Ok(PutReceipt { written_at })
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let served = self.record(|c| c.lists += 1).lists - 1;

        if let Some((after, status)) = self.faults().list_after {
            if served >= after {
                return Err(Error::remote(RemoteOp::List, prefix, Some(status), "injected failure"));
            }
        }

        // Tokens are the last key of the previous page (start-after semantics).
        let objects = self.objects();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| token.map_or(true, |t| k.as_str() > t))
            .take(self.page_size + 1)
            .cloned()
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
        let index = self
            .record(|c| {
                c.delete_batches += 1;
                c.delete_batch_sizes.push(keys.len());
            })
            .delete_batches
            - 1;

        let first = keys.first().cloned().unwrap_or_default();

        if keys.len() > MAX_DELETE_BATCH {
            return Err(Error::remote(
                RemoteOp::DeleteBatch,
                first,
                Some(400),
                format!("{} keys exceed the batch limit of {}", keys.len(), MAX_DELETE_BATCH),
            ));
        }

        if let Some((at, status)) = self.faults().delete_batch_at {
            if at == index {
                return Err(Error::remote(
                    RemoteOp::DeleteBatch,
                    first,
                    Some(status),
                    "injected failure",
                ));
            }
        }

        let mut objects = self.objects();
        for key in keys {
            objects.remove(key);
        }

        Ok(())
    }
}

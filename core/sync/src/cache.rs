//! Persistent path -> fingerprint cache and the stage that maintains it.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use bucketsync_common::{ContentItem, Disposition, Error, Fingerprint, Result};
use crate::pipeline::{ItemStream, Stage};

/// Items processed between two cache flushes.
pub const CACHE_FLUSH_INTERVAL: usize = 10;

/// Cache shared by the publish engine and the cache writer of one publisher.
pub type SharedCache = Arc<RwLock<HashCache>>;

/// Last committed fingerprint per remote key.
///
/// Read once from `path` and only ever overwritten wholesale, so a crash
/// mid-run leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct HashCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashCache {
    /// Create an empty cache that persists to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the cache from `path`.
    ///
    /// A missing or unreadable file yields an empty cache; this never fails.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        debug!("Loaded {} cache entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    /// Wrap in a shared handle.
    pub fn into_shared(self) -> SharedCache {
        Arc::new(RwLock::new(self))
    }

    /// File this cache persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached fingerprint for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether the cached fingerprint for `key` equals `fingerprint`.
    pub fn matches(&self, key: &str, fingerprint: &Fingerprint) -> bool {
        self.get(key).is_some_and(|cached| fingerprint.matches_etag(cached))
    }

    /// Insert or replace the entry for `key`.
    pub fn upsert(&mut self, key: impl Into<String>, fingerprint: &Fingerprint) {
        self.entries.insert(key.into(), fingerprint.as_str().to_string());
    }

    /// Remove the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply an item's outcome: deletions remove, committed fingerprints upsert.
    ///
    /// Returns whether the cache changed.
    pub fn record(&mut self, item: &ContentItem) -> bool {
        if item.path.is_empty() {
            return false;
        }

        if item.disposition == Some(Disposition::Delete) {
            return self.remove(&item.path).is_some();
        }

        match &item.fingerprint {
            Some(fp) if self.get(&item.path) != Some(fp.as_str()) => {
                self.upsert(item.path.clone(), fp);
                true
            }
            _ => false,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.entries).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Persist the cache.
    pub async fn flush(&self) -> Result<()> {
        let json = self.to_json()?;
        persist(&self.path, json).await
    }
}

/// Flush a shared cache without holding the lock during file I/O.
pub async fn flush_shared(cache: &SharedCache) -> Result<()> {
    let (path, json, len) = {
        let guard = cache.read().await;
        (guard.path().to_path_buf(), guard.to_json()?, guard.len())
    };
    persist(&path, json).await?;
    debug!("Flushed {} cache entries to {}", len, path.display());
    Ok(())
}

/// Write `json` to a sibling temp file, then rename it over `path`.
async fn persist(path: &Path, json: String) -> Result<()> {
    let cache_error = |e: std::io::Error| Error::Cache {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(cache_error)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    fs::write(&tmp, json.as_bytes()).await.map_err(cache_error)?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(cache_error(e));
    }

    Ok(())
}

/// Pipeline stage that records item outcomes into the shared cache.
///
/// Flushes every [`CACHE_FLUSH_INTERVAL`] items and once more when input
/// ends. Flush failures are emitted into the stream as errors.
pub struct CacheWriter {
    cache: SharedCache,
}

impl CacheWriter {
    /// Create a writer over `cache`.
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    /// Record one item's outcome.
    pub async fn record(&self, item: &ContentItem) -> bool {
        self.cache.write().await.record(item)
    }
}

struct WriterState {
    input: ItemStream,
    writer: CacheWriter,
    processed: usize,
    pending: VecDeque<Result<ContentItem>>,
    finished: bool,
}

impl WriterState {
    async fn step(&mut self) -> Option<Result<ContentItem>> {
        loop {
            if let Some(next) = self.pending.pop_front() {
                return Some(next);
            }
            if self.finished {
                return None;
            }

            match self.input.next().await {
                Some(Ok(item)) => {
                    self.writer.record(&item).await;
                    self.processed += 1;
                    self.pending.push_back(Ok(item));

                    if self.processed % CACHE_FLUSH_INTERVAL == 0 {
                        if let Err(e) = flush_shared(&self.writer.cache).await {
                            warn!("Periodic cache flush failed: {}", e);
                            self.pending.push_back(Err(e));
                        }
                    }
                }
                Some(Err(e)) => self.pending.push_back(Err(e)),
                None => {
                    self.finished = true;
                    if let Err(e) = flush_shared(&self.writer.cache).await {
                        warn!("Final cache flush failed: {}", e);
                        self.pending.push_back(Err(e));
                    }
                }
            }
        }
    }
}

impl Stage for CacheWriter {
    fn apply(self, input: ItemStream) -> ItemStream {
        let state = WriterState {
            input,
            writer: self,
            processed: 0,
            pending: VecDeque::new(),
            finished: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let next = state.step().await;
            next.map(|item| (item, state))
        }))
    }
}

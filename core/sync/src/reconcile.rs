//! Sync reconciler: deletes remote keys the current run did not touch.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use bucketsync_common::{ContentItem, Error, Result};
use bucketsync_storage::{list_keys, KeyStream, ObjectStore};

use crate::cache::{flush_shared, SharedCache};
use crate::delete::DeleteBatcher;
use crate::keep::{is_kept, KeepRule};
use crate::pipeline::{ItemStream, Stage};

/// Pipeline stage that mirrors the run onto the remote prefix.
///
/// Items pass through unchanged while their paths are recorded. Once upstream
/// ends cleanly the listing under `prefix` is walked. Every unseen key that no
/// keep rule protects is emitted as a delete item and removed in batches.
pub struct SyncReconciler {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    keep: Vec<KeepRule>,
    batcher: DeleteBatcher,
    cache: Option<SharedCache>,
}

impl SyncReconciler {
    /// Create a reconciler. An empty prefix covers the whole bucket.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        keep: Vec<KeepRule>,
    ) -> Self {
        Self {
            batcher: DeleteBatcher::new(store.clone()),
            store,
            prefix: prefix.into(),
            keep,
            cache: None,
        }
    }

    /// Use a custom batcher.
    pub fn with_batcher(mut self, batcher: DeleteBatcher) -> Self {
        self.batcher = batcher;
        self
    }

    /// Drop deleted keys from `cache` as their batches succeed.
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

enum Phase {
    PassThrough(ItemStream),
    Listing(KeyStream),
    Deleting,
    Done,
}

struct ReconcileState {
    phase: Phase,
    reconciler: SyncReconciler,
    seen: HashSet<String>,
    tombstones: HashSet<String>,
    queued: Vec<String>,
    upstream_failed: bool,
}

impl ReconcileState {
    async fn step(&mut self) -> Option<Result<ContentItem>> {
        loop {
            match &mut self.phase {
                Phase::PassThrough(input) => match input.next().await {
                    Some(Ok(item)) => {
                        if item.is_delete() {
                            self.tombstones.insert(item.path.clone());
                        } else {
                            self.seen.insert(item.path.clone());
                        }
                        return Some(Ok(item));
                    }
                    Some(Err(e)) => {
                        self.upstream_failed = true;
                        return Some(Err(e));
                    }
                    None if self.upstream_failed => {
                        warn!("Upstream reported errors; skipping remote deletions");
                        self.phase = Phase::Done;
                    }
                    None => {
                        debug!(
                            "Reconciling '{}' against {} seen paths",
                            self.reconciler.prefix,
                            self.seen.len()
                        );
                        let keys = list_keys(
                            self.reconciler.store.clone(),
                            self.reconciler.prefix.clone(),
                        );
                        self.phase = Phase::Listing(keys);
                    }
                },
                Phase::Listing(keys) => match keys.next().await {
                    Some(Ok(key)) => {
                        if self.seen.contains(&key) {
                            continue;
                        }
                        if is_kept(&self.reconciler.keep, &key) {
                            debug!("Keeping {}", key);
                            continue;
                        }
                        if self.tombstones.contains(&key) {
                            // Already announced by upstream.
                            self.queued.push(key);
                            continue;
                        }
                        self.queued.push(key.clone());
                        return Some(Ok(ContentItem::deleted(key)));
                    }
                    Some(Err(e)) => {
                        error!(
                            "Listing '{}' failed; nothing deleted: {}",
                            self.reconciler.prefix, e
                        );
                        self.phase = Phase::Done;
                        return Some(Err(e));
                    }
                    None => self.phase = Phase::Deleting,
                },
                Phase::Deleting => {
                    self.phase = Phase::Done;
                    if let Err(e) = self.drain().await {
                        return Some(Err(e));
                    }
                }
                Phase::Done => return None,
            }
        }
    }

    async fn drain(&mut self) -> Result<()> {
        if self.queued.is_empty() {
            info!("Nothing to delete under '{}'", self.reconciler.prefix);
            return Ok(());
        }

        match self.reconciler.batcher.delete_all(&self.queued).await {
            Ok(report) => {
                info!(
                    "Deleted {} keys under '{}' in {} batches",
                    report.deleted, self.reconciler.prefix, report.batches
                );
                self.forget(self.queued.len()).await
            }
            Err(e) => {
                // Batches before the failing one are gone remotely.
                if let Error::BatchDelete { deleted, .. } = &e {
                    if let Err(flush) = self.forget(*deleted).await {
                        warn!("Cache update after partial delete failed: {}", flush);
                    }
                }
                Err(e)
            }
        }
    }

    /// Remove the first `count` queued keys from the cache and persist it.
    async fn forget(&mut self, count: usize) -> Result<()> {
        let Some(cache) = &self.reconciler.cache else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }

        {
            let mut guard = cache.write().await;
            for key in &self.queued[..count] {
                guard.remove(key);
            }
        }
        flush_shared(cache).await
    }
}

impl Stage for SyncReconciler {
    fn apply(self, input: ItemStream) -> ItemStream {
        let state = ReconcileState {
            phase: Phase::PassThrough(input),
            reconciler: self,
            seen: HashSet::new(),
            tombstones: HashSet::new(),
            queued: Vec::new(),
            upstream_failed: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let next = state.step().await;
            next.map(|item| (item, state))
        }))
    }
}

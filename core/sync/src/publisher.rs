//! Publisher: one bucket's store, cache and stage factories.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use bucketsync_common::{Headers, Result};
use bucketsync_storage::{ObjectStore, StoreRegistry};

use crate::cache::{flush_shared, CacheWriter, HashCache, SharedCache};
use crate::config::PublisherConfig;
use crate::content_type::{ContentTypeResolver, ExtensionContentTypes};
use crate::keep::KeepRule;
use crate::publish::{PublishEngine, PublishOptions};
use crate::reconcile::SyncReconciler;
use crate::retry::RetryStore;

/// Entry point for publishing to one bucket.
///
/// Owns the store handle and the shared hash cache. `publish`, `cache` and
/// `sync` hand out stages for a [`crate::Pipeline`]; all of them see the same
/// cache.
pub struct Publisher {
    config: PublisherConfig,
    store: Arc<dyn ObjectStore>,
    cache: SharedCache,
    content_types: Arc<dyn ContentTypeResolver>,
}

impl Publisher {
    /// Create a publisher over `store` and load its cache.
    ///
    /// # Errors
    /// - Configuration error if the bucket is empty
    pub async fn new(config: PublisherConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let cache_path = config.cache_path()?;

        let store: Arc<dyn ObjectStore> = match config.retry_config() {
            Some(retry) => {
                debug!("Retrying transient store errors up to {} times", retry.max_retries);
                Arc::new(RetryStore::new(store, retry))
            }
            None => store,
        };

        let cache = HashCache::load(cache_path).await;
        info!(
            "Publisher ready for bucket '{}' on {} store ({} cached entries)",
            config.bucket,
            store.name(),
            cache.len()
        );

        Ok(Self {
            config,
            store,
            cache: cache.into_shared(),
            content_types: Arc::new(ExtensionContentTypes::new()),
        })
    }

    /// Resolve the store through `registry`, then create the publisher.
    pub async fn from_registry(config: PublisherConfig, registry: &StoreRegistry) -> Result<Self> {
        let bucket = config.bucket_id()?;
        let store = registry.resolve(&config.store, &bucket, &config.store_options)?;
        Self::new(config, store).await
    }

    /// Use a different Content-Type resolver for `publish` stages.
    pub fn with_content_types(mut self, resolver: Arc<dyn ContentTypeResolver>) -> Self {
        self.content_types = resolver;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// The store every stage talks to.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Shared cache handle.
    pub fn cache_handle(&self) -> SharedCache {
        self.cache.clone()
    }

    /// Cache file path.
    pub async fn cache_path(&self) -> std::path::PathBuf {
        self.cache.read().await.path().to_path_buf()
    }

    /// Publish stage. `overrides` win over configured default headers.
    pub fn publish(&self, overrides: Headers, options: PublishOptions) -> PublishEngine {
        let mut headers = self.config.headers.clone();
        headers.extend(overrides);

        PublishEngine::new(self.store.clone(), self.cache.clone(), headers, options)
            .with_content_types(self.content_types.clone())
            .with_probe_tolerance(self.config.probe_tolerance())
    }

    /// Cache-writing stage.
    pub fn cache(&self) -> CacheWriter {
        CacheWriter::new(self.cache.clone())
    }

    /// Sync stage deleting unseen keys under `prefix`.
    pub fn sync(&self, prefix: impl Into<String>, keep: Vec<KeepRule>) -> SyncReconciler {
        SyncReconciler::new(self.store.clone(), prefix, keep).with_cache(self.cache.clone())
    }

    /// Persist the cache now.
    pub async fn flush_cache(&self) -> Result<()> {
        flush_shared(&self.cache).await
    }

    /// Drop every cache entry and persist the empty cache.
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.write().await.clear();
        self.flush_cache().await
    }
}

/// Whether a cache file exists at `path`.
pub async fn cache_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use bucketsync_common::{ContentItem, Disposition, Fingerprint};
    use bucketsync_storage::{create_default_registry, MemoryStore};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> PublisherConfig {
        PublisherConfig {
            cache_file: Some(temp.path().join("cache.json")),
            ..PublisherConfig::new("site")
        }
    }

    async fn publish_run(
        publisher: &Publisher,
        items: Vec<ContentItem>,
    ) -> Result<crate::RunSummary> {
        Pipeline::from_items(items)
            .pipe(publisher.publish(Headers::new(), PublishOptions::default()))
            .pipe(publisher.cache())
            .run()
            .await
    }

    #[tokio::test]
    async fn test_end_to_end_create_then_cache() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("site"));

        let publisher = Publisher::new(config(&temp), store.clone()).await.unwrap();
        let summary = publish_run(&publisher, vec![ContentItem::new("x.txt", "hello")])
            .await
            .unwrap();

        assert_eq!(summary.item("x.txt").unwrap().disposition, Some(Disposition::Create));
        assert_eq!(
            publisher.cache_handle().read().await.get("x.txt"),
            Some(Fingerprint::of(b"hello").as_str())
        );

        // Fresh publisher over the persisted cache: no remote calls at all.
        store.reset_calls();
        let publisher = Publisher::new(config(&temp), store.clone()).await.unwrap();
        let summary = publish_run(&publisher, vec![ContentItem::new("x.txt", "hello")])
            .await
            .unwrap();

        assert_eq!(summary.item("x.txt").unwrap().disposition, Some(Disposition::Cache));
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_second_publish_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("site"));
        let items = || {
            (0..15)
                .map(|i| ContentItem::new(format!("page{}.html", i), format!("<p>{}</p>", i)))
                .collect::<Vec<_>>()
        };

        let publisher = Publisher::new(config(&temp), store.clone()).await.unwrap();
        let first = publish_run(&publisher, items()).await.unwrap();
        assert_eq!(first.count(Disposition::Create), 15);

        // Without the cache, the remote ETags alone make every item a skip.
        let uncached = PublisherConfig {
            cache_file: Some(temp.path().join("other-cache.json")),
            ..PublisherConfig::new("site")
        };
        store.reset_calls();
        let publisher = Publisher::new(uncached, store.clone()).await.unwrap();
        let second = publish_run(&publisher, items()).await.unwrap();

        assert_eq!(second.count(Disposition::Skip), 15);
        assert_eq!(store.calls().puts, 0);
    }

    #[tokio::test]
    async fn test_publish_then_sync() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("site"));
        store.seed("old.html", "stale");
        store.seed("robots.txt", "keep me");

        let publisher = Publisher::new(config(&temp), store.clone()).await.unwrap();
        let summary = Pipeline::from_items(vec![ContentItem::new("index.html", "<p>hi</p>")])
            .pipe(publisher.publish(Headers::new(), PublishOptions::default()))
            .pipe(publisher.cache())
            .pipe(publisher.sync("", vec![KeepRule::exact("robots.txt")]))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.count(Disposition::Create), 1);
        assert_eq!(summary.count(Disposition::Delete), 1);
        assert_eq!(store.keys(), vec!["index.html".to_string(), "robots.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_put_blocks_sync_deletes() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("site"));
        store.seed("a.html", "old a");
        store.seed("orphan.html", "x");
        store.fail_put("a.html", 500);

        let publisher = Publisher::new(config(&temp), store.clone()).await.unwrap();
        let err = Pipeline::from_items(vec![
            ContentItem::new("a.html", "new a"),
            ContentItem::new("b.html", "b"),
        ])
        .pipe(publisher.publish(Headers::new(), PublishOptions::default()))
        .pipe(publisher.cache())
        .pipe(publisher.sync("", Vec::new()))
        .run()
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(500));
        // The run is incomplete, so nothing remote is deleted.
        assert_eq!(store.calls().delete_batches, 0);
        assert_eq!(store.get("a.html").unwrap(), b"old a".to_vec());
        assert!(store.contains("orphan.html"));

        // Items after the failure were still published and cached.
        assert!(store.contains("b.html"));
        let reloaded = HashCache::load(temp.path().join("cache.json")).await;
        assert!(reloaded.get("b.html").is_some());
        assert!(reloaded.get("a.html").is_none());
    }

    #[tokio::test]
    async fn test_config_headers_yield_to_overrides() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("site"));
        let mut config = config(&temp);
        config.headers.insert("Cache-Control".to_string(), "max-age=60".to_string());
        config.headers.insert("x-team".to_string(), "web".to_string());

        let publisher = Publisher::new(config, store.clone()).await.unwrap();
        let mut overrides = Headers::new();
        overrides.insert("Cache-Control".to_string(), "no-store".to_string());

        Pipeline::from_items(vec![ContentItem::new("a.css", "body{}")])
            .pipe(publisher.publish(overrides, PublishOptions::default()))
            .run()
            .await
            .unwrap();

        let headers = store.headers("a.css").unwrap();
        assert_eq!(headers["Cache-Control"], "no-store");
        assert_eq!(headers["x-team"], "web");
    }

    #[tokio::test]
    async fn test_from_registry_and_clear_cache() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.store = "memory".to_string();

        let publisher = Publisher::from_registry(config, &create_default_registry()).await.unwrap();
        assert_eq!(publisher.store().name(), "memory");

        publish_run(&publisher, vec![ContentItem::new("a", "1")]).await.unwrap();
        assert!(cache_exists(&publisher.cache_path().await).await);

        publisher.clear_cache().await.unwrap();
        let reloaded = HashCache::load(temp.path().join("cache.json")).await;
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_empty_bucket_fails_before_io() {
        let store = Arc::new(MemoryStore::new("x"));
        let err = Publisher::new(PublisherConfig::default(), store.clone()).await.err().unwrap();
        assert!(err.is_config());
        assert_eq!(store.calls().total(), 0);
    }
}

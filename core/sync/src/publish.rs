//! Publish engine: fingerprint, cache short-circuit, probe, write.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

use bucketsync_common::{ContentItem, Disposition, Error, Fingerprint, Headers, RemoteOp, Result};
use bucketsync_storage::{ObjectHead, ObjectStore};

use crate::cache::SharedCache;
use crate::content_type::{ContentTypeResolver, ExtensionContentTypes};
use crate::pipeline::{ItemStream, Stage};

/// Header carrying the MIME type.
pub const CONTENT_TYPE: &str = "Content-Type";
/// Header carrying the body size in bytes.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Per-run publish switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishOptions {
    /// Bypass the cache and remote equality checks.
    pub force: bool,
    /// Never overwrite an existing remote object.
    pub create_only: bool,
    /// Resolve dispositions without writing anything.
    pub simulate: bool,
    /// Write unconditionally without probing.
    pub put_only: bool,
}

/// Probe statuses that mean "absent" rather than failure.
///
/// Permission-limited stores answer 403 instead of 404 for missing keys,
/// so both are tolerated by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTolerance(BTreeSet<u16>);

impl ProbeTolerance {
    /// Tolerate exactly `statuses`.
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self(statuses.into_iter().collect())
    }

    /// Tolerate nothing; every probe error is fatal for the item.
    pub fn strict() -> Self {
        Self(BTreeSet::new())
    }

    /// Whether `err` is a tolerated probe failure.
    pub fn tolerates(&self, err: &Error) -> bool {
        match err {
            Error::Remote {
                op: RemoteOp::Head,
                status: Some(status),
                ..
            } => self.0.contains(status),
            _ => false,
        }
    }
}

impl Default for ProbeTolerance {
    fn default() -> Self {
        Self::new([403, 404])
    }
}

/// Decides and applies each item's disposition against the remote store.
pub struct PublishEngine {
    store: Arc<dyn ObjectStore>,
    cache: SharedCache,
    content_types: Arc<dyn ContentTypeResolver>,
    overrides: Headers,
    options: PublishOptions,
    tolerance: ProbeTolerance,
}

impl PublishEngine {
    /// Create an engine.
    ///
    /// `overrides` are applied over each item's own headers.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: SharedCache,
        overrides: Headers,
        options: PublishOptions,
    ) -> Self {
        Self {
            store,
            cache,
            content_types: Arc::new(ExtensionContentTypes::new()),
            overrides,
            options,
            tolerance: ProbeTolerance::default(),
        }
    }

    /// Use a different Content-Type resolver.
    pub fn with_content_types(mut self, resolver: Arc<dyn ContentTypeResolver>) -> Self {
        self.content_types = resolver;
        self
    }

    /// Use a different probe tolerance.
    pub fn with_probe_tolerance(mut self, tolerance: ProbeTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Resolve one item.
    ///
    /// On error the item is dropped and nothing about it was committed: the
    /// write either did not happen or failed.
    pub async fn process(&self, mut item: ContentItem) -> Result<ContentItem> {
        if item.path.is_empty() {
            return Err(Error::InvalidInput("Content item has an empty path".to_string()));
        }

        let fingerprint = match &item.content {
            Some(content) if item.disposition != Some(Disposition::Delete) => {
                Fingerprint::of(content)
            }
            _ => {
                item.disposition = Some(Disposition::Delete);
                trace!("{} tagged for deletion", item.path);
                return Ok(item);
            }
        };

        if !self.options.force && self.cache.read().await.matches(&item.path, &fingerprint) {
            item.disposition = Some(Disposition::Cache);
            item.fingerprint = Some(fingerprint);
            trace!("{} unchanged since last publish", item.path);
            return Ok(item);
        }

        self.merge_headers(&mut item);

        if self.options.put_only {
            if self.options.simulate {
                item.disposition = Some(Disposition::Put);
                return Ok(item);
            }
            return self.write(item, Disposition::Put, fingerprint).await;
        }

        let remote = self.probe(&item.path).await?;

        let disposition = match &remote {
            Some(head)
                if self.options.create_only
                    || (!self.options.force && remote_matches(head, &fingerprint)) =>
            {
                Disposition::Skip
            }
            Some(_) => Disposition::Update,
            None => Disposition::Create,
        };

        if self.options.simulate {
            debug!("[simulate] {} would be {}", item.path, disposition);
            item.disposition = Some(disposition);
            return Ok(item);
        }

        if disposition == Disposition::Skip {
            let head = remote.unwrap_or(ObjectHead {
                etag: None,
                last_modified: None,
            });
            item.disposition = Some(Disposition::Skip);
            item.fingerprint = Some(head.etag.map(Fingerprint::from_etag).unwrap_or(fingerprint));
            item.timestamp = head.last_modified;
            debug!("{} already up to date remotely", item.path);
            return Ok(item);
        }

        self.write(item, disposition, fingerprint).await
    }

    /// Item headers first, then overrides, then defaults for anything missing.
    fn merge_headers(&self, item: &mut ContentItem) {
        for (name, value) in &self.overrides {
            item.headers.insert(name.clone(), value.clone());
        }

        if !item.headers.contains_key(CONTENT_TYPE) {
            item.headers
                .insert(CONTENT_TYPE.to_string(), self.content_types.content_type(&item.path));
        }

        if !item.headers.contains_key(CONTENT_LENGTH) {
            let len = item.content.as_ref().map_or(0, Vec::len);
            item.headers.insert(CONTENT_LENGTH.to_string(), len.to_string());
        }
    }

    async fn probe(&self, key: &str) -> Result<Option<ObjectHead>> {
        match self.store.head(key).await {
            Ok(head) => Ok(head),
            Err(e) if self.tolerance.tolerates(&e) => {
                debug!("Probe of {} tolerated ({}); treating as absent", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(
        &self,
        mut item: ContentItem,
        disposition: Disposition,
        fingerprint: Fingerprint,
    ) -> Result<ContentItem> {
        let body = item.content.clone().unwrap_or_default();
        let receipt = self.store.put(&item.path, body, &item.headers).await?;

        item.disposition = Some(disposition);
        item.fingerprint = Some(fingerprint);
        item.timestamp = Some(receipt.written_at);
        debug!("{} {}", disposition, item.path);
        Ok(item)
    }
}

fn remote_matches(head: &ObjectHead, fingerprint: &Fingerprint) -> bool {
    head.etag
        .as_deref()
        .is_some_and(|etag| fingerprint.matches_etag(etag))
}

struct PublishState {
    input: ItemStream,
    engine: PublishEngine,
    upstream_failed: bool,
}

impl PublishState {
    async fn step(&mut self) -> Option<Result<ContentItem>> {
        if self.upstream_failed {
            return None;
        }

        match self.input.next().await? {
            Ok(item) => Some(self.engine.process(item).await),
            Err(e) => {
                // The source is broken: forward the error and start nothing new.
                self.upstream_failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Stage for PublishEngine {
    fn apply(self, input: ItemStream) -> ItemStream {
        let state = PublishState {
            input,
            engine: self,
            upstream_failed: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let next = state.step().await;
            next.map(|item| (item, state))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HashCache;
    use bucketsync_storage::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, SharedCache) {
        let store = Arc::new(MemoryStore::new("bucket"));
        let cache = HashCache::new("unused-cache").into_shared();
        (store, cache)
    }

    fn engine(
        store: &Arc<MemoryStore>,
        cache: &SharedCache,
        options: PublishOptions,
    ) -> PublishEngine {
        PublishEngine::new(store.clone(), cache.clone(), Headers::new(), options)
    }

    #[tokio::test]
    async fn test_create_when_absent() {
        let (store, cache) = setup();
        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Create));
        assert_eq!(item.fingerprint, Some(Fingerprint::of(b"hello")));
        assert!(item.timestamp.is_some());
        assert_eq!(store.get("x.txt").unwrap(), b"hello".to_vec());
        assert_eq!(store.calls().heads, 1);
        assert_eq!(store.calls().puts, 1);
    }

    #[tokio::test]
    async fn test_skip_when_remote_identical() {
        let (store, cache) = setup();
        store.seed("x.txt", "hello");

        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Skip));
        assert!(item.timestamp.is_some());
        assert_eq!(store.calls().puts, 0);
    }

    #[tokio::test]
    async fn test_update_when_remote_differs() {
        let (store, cache) = setup();
        store.seed("x.txt", "old");

        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "new"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Update));
        assert_eq!(store.get("x.txt").unwrap(), b"new".to_vec());
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_remote_call() {
        let (store, cache) = setup();
        cache.write().await.upsert("x.txt", &Fingerprint::of(b"hello"));

        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Cache));
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache_and_remote_equality() {
        let (store, cache) = setup();
        store.seed("x.txt", "hello");
        cache.write().await.upsert("x.txt", &Fingerprint::of(b"hello"));

        let options = PublishOptions { force: true, ..Default::default() };
        let item = engine(&store, &cache, options)
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Update));
        assert_eq!(store.calls().puts, 1);
    }

    #[tokio::test]
    async fn test_create_only_skips_existing_with_different_content() {
        let (store, cache) = setup();
        store.seed("x.txt", "remote");

        let options = PublishOptions { create_only: true, ..Default::default() };
        let item = engine(&store, &cache, options)
            .process(ContentItem::new("x.txt", "local"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Skip));
        // The committed fingerprint reflects what is actually stored remotely.
        assert_eq!(item.fingerprint, Some(Fingerprint::of(b"remote")));
        assert_eq!(store.get("x.txt").unwrap(), b"remote".to_vec());
    }

    #[tokio::test]
    async fn test_put_only_writes_without_probe() {
        let (store, cache) = setup();
        store.seed("x.txt", "hello");

        let options = PublishOptions { put_only: true, ..Default::default() };
        let item = engine(&store, &cache, options)
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Put));
        assert_eq!(store.calls().heads, 0);
        assert_eq!(store.calls().puts, 1);
    }

    #[tokio::test]
    async fn test_simulate_never_writes() {
        let (store, cache) = setup();
        store.seed("changed.txt", "old");

        let options = PublishOptions { simulate: true, ..Default::default() };
        let engine = engine(&store, &cache, options);

        let created = engine.process(ContentItem::new("new.txt", "n")).await.unwrap();
        let updated = engine.process(ContentItem::new("changed.txt", "new")).await.unwrap();

        assert_eq!(created.disposition, Some(Disposition::Create));
        assert_eq!(updated.disposition, Some(Disposition::Update));
        assert!(created.fingerprint.is_none());
        assert_eq!(store.calls().puts, 0);
        assert!(!store.contains("new.txt"));
    }

    #[tokio::test]
    async fn test_simulate_put_only_makes_no_remote_call() {
        let (store, cache) = setup();

        let options = PublishOptions {
            simulate: true,
            put_only: true,
            ..Default::default()
        };
        let item = engine(&store, &cache, options)
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Put));
        assert!(item.fingerprint.is_none());
        assert!(item.timestamp.is_none());
        assert_eq!(store.calls().total(), 0);
        assert!(!store.contains("x.txt"));
    }

    #[tokio::test]
    async fn test_missing_content_is_delete_without_remote_call() {
        let (store, cache) = setup();
        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::deleted("gone.txt"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Delete));
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_tolerated_probe_status_means_create() {
        let (store, cache) = setup();
        store.fail_head("x.txt", 403);

        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(item.disposition, Some(Disposition::Create));
    }

    #[tokio::test]
    async fn test_untolerated_probe_status_is_item_error() {
        let (store, cache) = setup();
        store.fail_head("x.txt", 403);

        let err = engine(&store, &cache, PublishOptions::default())
            .with_probe_tolerance(ProbeTolerance::new([404]))
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(store.calls().puts, 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_item_error() {
        let (store, cache) = setup();
        store.fail_put("x.txt", 500);

        let err = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("x.txt", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote { op: RemoteOp::Put, .. }));
    }

    #[tokio::test]
    async fn test_header_merge_order() {
        let (store, cache) = setup();
        let mut overrides = Headers::new();
        overrides.insert("Cache-Control".to_string(), "max-age=60".to_string());
        overrides.insert("x-amz-acl".to_string(), "private".to_string());

        let item = ContentItem::new("page.html", "<p>hi</p>")
            .with_header("Cache-Control", "no-cache")
            .with_header("Content-Encoding", "gzip");

        let item = PublishEngine::new(store.clone(), cache, overrides, PublishOptions::default())
            .process(item)
            .await
            .unwrap();

        assert_eq!(item.headers["Cache-Control"], "max-age=60");
        assert_eq!(item.headers["Content-Encoding"], "gzip");
        assert_eq!(item.headers["x-amz-acl"], "private");
        assert_eq!(item.headers[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(item.headers[CONTENT_LENGTH], "9");
        assert_eq!(store.headers("page.html").unwrap(), item.headers);
    }

    #[tokio::test]
    async fn test_explicit_content_type_is_kept() {
        let (store, cache) = setup();
        let item = engine(&store, &cache, PublishOptions::default())
            .process(ContentItem::new("data", "{}").with_header(CONTENT_TYPE, "application/json"))
            .await
            .unwrap();

        assert_eq!(item.headers[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_stage_stops_after_upstream_error() {
        let (store, cache) = setup();
        let source: ItemStream = Box::pin(stream::iter(vec![
            Ok(ContentItem::new("a.txt", "a")),
            Err(Error::Io(std::io::Error::other("source broke"))),
            Ok(ContentItem::new("b.txt", "b")),
        ]));

        let results: Vec<Result<ContentItem>> = engine(&store, &cache, PublishOptions::default())
            .apply(source)
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
        assert!(!store.contains("b.txt"));
    }

    #[tokio::test]
    async fn test_stage_continues_after_item_error() {
        let (store, cache) = setup();
        store.fail_put("a.txt", 500);

        let results: Vec<Result<ContentItem>> = engine(&store, &cache, PublishOptions::default())
            .apply(crate::pipeline::from_items(vec![
                ContentItem::new("a.txt", "a"),
                ContentItem::new("b.txt", "b"),
            ]))
            .collect()
            .await;

        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().disposition, Some(Disposition::Create));
    }
}

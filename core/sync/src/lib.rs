//! bucketsync reconciliation engine
//!
//! Stages for publishing a stream of content items to an object store:
//! - `publish`: decide create / update / skip / cache per item and write
//! - `cache`: record committed fingerprints and persist them
//! - `sync`: delete remote keys the run did not produce, in batches
//!
//! A [`Publisher`] wires one bucket's store and cache into these stages and a
//! [`Pipeline`] drives them.

pub mod cache;
pub mod config;
pub mod content_type;
pub mod delete;
pub mod keep;
pub mod pipeline;
pub mod publish;
pub mod publisher;
pub mod reconcile;
pub mod reporter;
pub mod retry;

pub use cache::{flush_shared, CacheWriter, HashCache, SharedCache, CACHE_FLUSH_INTERVAL};
pub use config::PublisherConfig;
pub use content_type::{ContentTypeResolver, ExtensionContentTypes};
pub use delete::{DeleteBatcher, DeleteReport};
pub use keep::{is_kept, KeepRule};
pub use pipeline::{from_items, ItemStream, Pipeline, RunSummary, Stage};
pub use publish::{ProbeTolerance, PublishEngine, PublishOptions};
pub use publisher::{cache_exists, Publisher};
pub use reconcile::SyncReconciler;
pub use reporter::Reporter;
pub use retry::{is_transient, RetryConfig, RetryExecutor, RetryStore};

//! Object store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bucketsync_common::{Headers, Result};

/// Largest number of keys a single `delete_batch` call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Metadata returned by an existence probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    /// ETag as reported by the store, usually a quoted content hash.
    pub etag: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutReceipt {
    pub written_at: DateTime<Utc>,
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys on this page, in store order.
    pub keys: Vec<String>,
    /// Continuation token; `None` when this is the last page.
    pub next_token: Option<String>,
}

/// Remote object store binding.
///
/// The reconciliation core only needs these four calls. Implementations own
/// their authentication and any retry policy; the core never retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get the store kind (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Bucket this store writes to.
    fn bucket(&self) -> &str;

    /// Probe a key.
    ///
    /// # Returns
    /// - `Ok(None)` when the store can tell the key is absent
    ///
    /// # Errors
    /// - `Error::Remote` with a status for absent keys on stores that only
    ///   report HTTP-like statuses (404, or 403 on permission-limited probes)
    /// - Network/I/O errors
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>>;

    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, body: Vec<u8>, headers: &Headers) -> Result<PutReceipt>;

    /// Fetch one listing page under `prefix`.
    ///
    /// Pass the previous page's `next_token` to continue.
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage>;

    /// Delete up to [`MAX_DELETE_BATCH`] keys in one call.
    ///
    /// # Preconditions
    /// - `keys.len() <= MAX_DELETE_BATCH`
    async fn delete_batch(&self, keys: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_head_serialization() {
        let head = ObjectHead {
            etag: Some("\"abc123\"".to_string()),
            last_modified: Some(Utc::now()),
        };

        let json = serde_json::to_string(&head).unwrap();
        let deserialized: ObjectHead = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, head);
    }
}

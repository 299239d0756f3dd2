//! Batched deletion of remote keys.

use std::sync::Arc;
use tracing::{debug, error, info};

use bucketsync_common::{Error, Result};
use bucketsync_storage::{ObjectStore, MAX_DELETE_BATCH};

/// Outcome of a successful batched delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Batches issued.
    pub batches: usize,
    /// Keys deleted.
    pub deleted: usize,
}

/// Splits keys into bounded batches and deletes them one batch at a time.
///
/// Failed batches are not retried and earlier batches are not rolled back.
pub struct DeleteBatcher {
    store: Arc<dyn ObjectStore>,
    batch_size: usize,
}

impl DeleteBatcher {
    /// Create a batcher using the store's batch ceiling.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            batch_size: MAX_DELETE_BATCH,
        }
    }

    /// Use smaller batches.
    ///
    /// # Errors
    /// - Configuration error unless `1 <= batch_size <= MAX_DELETE_BATCH`
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 || batch_size > MAX_DELETE_BATCH {
            return Err(Error::Config(format!(
                "Delete batch size must be between 1 and {}, got {}",
                MAX_DELETE_BATCH, batch_size
            )));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    /// Consecutive chunks of `keys`, in order; only the last may be short.
    pub fn plan<'a>(&self, keys: &'a [String]) -> Vec<&'a [String]> {
        keys.chunks(self.batch_size).collect()
    }

    /// Delete every key, one batch per call.
    ///
    /// Stops at the first failed batch. The error reports the failing batch
    /// (1-based) and how many keys earlier batches removed.
    pub async fn delete_all(&self, keys: &[String]) -> Result<DeleteReport> {
        let plan = self.plan(keys);
        let batches = plan.len();
        let mut report = DeleteReport::default();

        for (index, chunk) in plan.into_iter().enumerate() {
            debug!("Deleting batch {}/{} ({} keys)", index + 1, batches, chunk.len());

            if let Err(e) = self.store.delete_batch(chunk).await {
                error!("Delete batch {}/{} failed: {}", index + 1, batches, e);
                return Err(Error::BatchDelete {
                    batch: index + 1,
                    batches,
                    deleted: report.deleted,
                    source: Box::new(e),
                });
            }

            report.batches += 1;
            report.deleted += chunk.len();
        }

        if report.deleted > 0 {
            info!("Deleted {} keys in {} batches", report.deleted, report.batches);
        }
        Ok(report)
    }
}

//! Publisher configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use bucketsync_common::{BucketId, Error, Headers, Result};

use crate::publish::ProbeTolerance;
use crate::retry::RetryConfig;

/// Store kind used when none is configured.
pub const DEFAULT_STORE: &str = "local";

/// Prefix of the default per-bucket cache file name.
pub const CACHE_FILE_PREFIX: &str = ".bucketsync-";

/// Configuration for one bucket's publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Target bucket.
    pub bucket: String,
    /// Store kind resolved through the store registry.
    pub store: String,
    /// Options handed to the store factory.
    pub store_options: Value,
    /// Cache file override; defaults to `.bucketsync-<bucket>`.
    pub cache_file: Option<PathBuf>,
    /// Probe statuses treated as "absent".
    pub probe_tolerance: Vec<u16>,
    /// Retry attempts for transient store errors; 0 disables retries.
    pub retries: u32,
    /// Headers applied over every item's own headers.
    pub headers: Headers,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            store: DEFAULT_STORE.to_string(),
            store_options: Value::Object(Default::default()),
            cache_file: None,
            probe_tolerance: vec![403, 404],
            retries: 0,
            headers: Headers::new(),
        }
    }
}

impl PublisherConfig {
    /// Default configuration for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Validated bucket identifier.
    pub fn bucket_id(&self) -> Result<BucketId> {
        BucketId::new(self.bucket.clone())
    }

    /// Where the hash cache lives.
    ///
    /// # Errors
    /// - Configuration error if the bucket is empty
    pub fn cache_path(&self) -> Result<PathBuf> {
        let bucket = self.bucket_id()?;
        Ok(self
            .cache_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}{}", CACHE_FILE_PREFIX, bucket))))
    }

    /// Probe tolerance from `probe_tolerance`.
    pub fn probe_tolerance(&self) -> ProbeTolerance {
        ProbeTolerance::new(self.probe_tolerance.iter().copied())
    }

    /// Retry policy, or `None` when retries are disabled.
    pub fn retry_config(&self) -> Option<RetryConfig> {
        (self.retries > 0).then(|| RetryConfig::new(self.retries))
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid publisher config: {}", e)))
    }

    /// Read a JSON config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

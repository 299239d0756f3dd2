//! Common types used throughout bucketsync.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header map sent with an object. Keys are case-sensitive as given.
pub type Headers = BTreeMap<String, String>;

/// Identifier of a target bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(String);

impl BucketId {
    /// Create a new BucketId from a string.
    ///
    /// # Errors
    /// - Returns a configuration error if `id` is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::Config(
                "Bucket identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content fingerprint: quoted hex MD5 of the raw bytes.
///
/// The quoting matches the ETag format of stores whose ETag is itself a
/// content hash, so a fingerprint can be compared with a probed ETag directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `content`.
    pub fn of(content: &[u8]) -> Self {
        let digest = Md5::digest(content);
        Self(format!("\"{:x}\"", digest))
    }

    /// Wrap an already computed fingerprint or ETag string.
    pub fn from_etag(etag: impl Into<String>) -> Self {
        Self(etag.into())
    }

    /// Get the inner string value, including quotes.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a remote ETag, ignoring surrounding quotes.
    pub fn matches_etag(&self, etag: &str) -> bool {
        self.0.trim_matches('"') == etag.trim_matches('"')
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal classification of what happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Object did not exist remotely and was written.
    Create,
    /// Object existed with a different fingerprint and was overwritten.
    Update,
    /// Object already identical remotely (or create-only); nothing written.
    Skip,
    /// Fingerprint matched the local cache; no remote call at all.
    Cache,
    /// Forced unconditional write without an existence check.
    Put,
    /// Remote object to remove.
    Delete,
}

impl Disposition {
    /// All dispositions, in reporting order.
    pub const ALL: [Disposition; 6] = [
        Disposition::Create,
        Disposition::Update,
        Disposition::Skip,
        Disposition::Cache,
        Disposition::Put,
        Disposition::Delete,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Create => "create",
            Disposition::Update => "update",
            Disposition::Skip => "skip",
            Disposition::Cache => "cache",
            Disposition::Put => "put",
            Disposition::Delete => "delete",
        }
    }

    /// Parse a lowercase name.
    pub fn parse(name: &str) -> crate::Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == name)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown disposition '{}'", name)))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical unit to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Remote key, forward-slash normalized.
    pub path: String,
    /// Headers to send with the object.
    pub headers: Headers,
    /// Raw content; `None` marks a deletion.
    pub content: Option<Vec<u8>>,
    /// Disposition once resolved.
    pub disposition: Option<Disposition>,
    /// Content fingerprint once committed.
    pub fingerprint: Option<Fingerprint>,
    /// Remote write time (or last-modified time on skip).
    pub timestamp: Option<DateTime<Utc>>,
}

impl ContentItem {
    /// Create an item carrying content.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            headers: Headers::new(),
            content: Some(content.into()),
            disposition: None,
            fingerprint: None,
            timestamp: None,
        }
    }

    /// Create a content-less item that marks `path` for deletion.
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: Headers::new(),
            content: None,
            disposition: Some(Disposition::Delete),
            fingerprint: None,
            timestamp: None,
        }
    }

    /// Add a header, replacing any existing value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Whether this item is a deletion marker.
    pub fn is_delete(&self) -> bool {
        self.content.is_none() || self.disposition == Some(Disposition::Delete)
    }
}

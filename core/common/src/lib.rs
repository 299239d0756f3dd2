//! Common utilities and types shared across bucketsync modules.
//!
//! This module provides the content item model, dispositions, fingerprints
//! and the error taxonomy used by the storage and sync crates.

pub mod error;
pub mod types;

pub use error::{Error, RemoteOp, Result};
pub use types::{BucketId, ContentItem, Disposition, Fingerprint, Headers};

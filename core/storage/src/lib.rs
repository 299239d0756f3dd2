//! Object store abstraction for bucketsync.
//!
//! This module provides a trait-based interface for remote object stores
//! (head, put, paginated list, batched delete), a lazily paginated listing
//! stream, and a registry for resolving stores by kind.
//!
//! # Design Principles
//! - Store isolation: no store-specific logic in the reconciliation core
//! - Async operations: all I/O operations are async
//! - Unified error semantics: transport failures carry operation, key and status

pub mod provider;
pub mod listing;
pub mod registry;
pub mod memory;
pub mod local;

pub use provider::{ListPage, ObjectHead, ObjectStore, PutReceipt, MAX_DELETE_BATCH};
pub use listing::{list_keys, KeyStream};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use memory::{CallCounts, MemoryStore};
pub use local::LocalStore;

//! Mini Store - A type-safe in-memory key-value store
//!
//! Provides a concurrent store with runtime type checking at its erased
//! boundary, pluggable eviction and TTL/TTI expiry.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{ErasedStore, Store};
pub use config::{StoreConfig, StoreSettings};
pub use error::{AccessError, StoreError};
pub use tasks::spawn_expiry_task;

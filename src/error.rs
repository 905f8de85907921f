//! Error types for the store
//!
//! Provides unified error handling using thiserror.

use std::fmt;

use thiserror::Error;

// == Role ==
/// Which half of a mapping an input was offered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Key,
    Value,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Key => f.write_str("key"),
            Role::Value => f.write_str("value"),
        }
    }
}

// == Access Error ==
/// Failure originating below the key-to-entry mapping.
///
/// Callers may retry; the store never retries on their behalf.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The store has been closed
    #[error("store is closed")]
    Closed,

    /// A shard lock was poisoned by a thread that panicked while holding it
    #[error("slot shard {shard} was poisoned by a panicking writer")]
    Poisoned { shard: usize },
}

// == Store Error ==
/// Unified error type for store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A null key was supplied to a keyed operation
    #[error("key must not be null")]
    InvalidKey,

    /// A null value was supplied to a put
    #[error("value must not be null")]
    InvalidValue,

    /// The runtime type of a key or value differs from the declared type
    #[error("{role} type mismatch: store declares {declared}, got {actual}")]
    TypeMismatch {
        role: Role,
        declared: &'static str,
        actual: &'static str,
    },

    /// Resource-level failure below the mapping layer
    #[error(transparent)]
    Access(#[from] AccessError),
}

impl StoreError {
    /// Returns true for failures the caller may treat as transient.
    pub fn is_access(&self) -> bool {
        matches!(self, StoreError::Access(_))
    }
}

// == Config Error ==
/// Rejected store configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    #[error("shard count must be greater than zero")]
    ZeroShards,

    #[error("time-to-live and time-to-idle are mutually exclusive")]
    ConflictingExpiry,

    #[error("largest-first eviction needs an explicit weigher")]
    MissingWeigher,

    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    #[error("invalid settings: {0}")]
    Malformed(#[from] serde_json::Error),
}

// == Result Type Alias ==
/// Convenience Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

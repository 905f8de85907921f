//! Cache Module
//!
//! Provides the in-memory store: type guard, slot table, eviction advisors
//! and the public facade.

mod entry;
mod eviction;
mod slot_table;
mod store;
mod type_guard;


// Re-export public types
pub use entry::{Entry, Expiry};
pub use eviction::{from_fn, AcceptAll, EvictionAdvisor, FnAdvisor, RejectAll, VictimOrder};
pub use store::{downcast_value, ErasedStore, Store};
pub use type_guard::{Erased, TypeGuard, TypeToken};

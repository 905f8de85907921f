//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a store.
//!
//! # Tasks
//! - Expiry Sweep: Removes expired entries at a configured interval

mod expiry;

pub use expiry::spawn_expiry_task;

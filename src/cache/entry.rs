//! Cache Entry Module
//!
//! Defines the structure for individual store entries and the expiry policy
//! that decides when they stop being live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// == Expiry ==
/// Expiry policy applied to every entry of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// Entries live until removed or evicted
    #[default]
    Never,
    /// Entries expire a fixed duration after they were written
    TimeToLive(Duration),
    /// Entries expire a fixed duration after they were last read or written
    TimeToIdle(Duration),
}

// == Cache Entry ==
/// A stored value with its lifecycle metadata.
///
/// Entries are owned by the slot table. Eviction advisors only ever see
/// them by shared reference while a victim is being chosen.
#[derive(Debug)]
pub struct Entry<V> {
    value: V,
    created_at: Instant,
    /// Nanoseconds after `created_at` of the last access
    last_access_nanos: AtomicU64,
    /// Logical clock reading at creation
    created_tick: u64,
    /// Logical clock reading at last access
    access_tick: AtomicU64,
    size_hint: usize,
}

impl<V> Entry<V> {
    // == Constructor ==
    pub(crate) fn new(value: V, size_hint: usize, tick: u64, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            last_access_nanos: AtomicU64::new(0),
            created_tick: tick,
            access_tick: AtomicU64::new(tick),
            size_hint,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn into_value(self) -> V {
        self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last read or write.
    pub fn last_accessed(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_access_nanos.load(Ordering::Relaxed))
    }

    pub fn size_hint(&self) -> usize {
        self.size_hint
    }

    pub(crate) fn created_tick(&self) -> u64 {
        self.created_tick
    }

    pub(crate) fn access_tick(&self) -> u64 {
        self.access_tick.load(Ordering::Relaxed)
    }

    // == Touch ==
    /// Records a read. Only metadata changes; the value is untouched.
    pub(crate) fn touch(&self, tick: u64, now: Instant) {
        let nanos = now.saturating_duration_since(self.created_at).as_nanos();
        self.last_access_nanos
            .fetch_max(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.access_tick.fetch_max(tick, Ordering::Relaxed);
    }

    // == Is Expired ==
    /// Checks whether the entry is expired at `now` under `expiry`.
    ///
    /// An entry is expired once the full duration has elapsed, so a zero
    /// duration expires it immediately.
    pub fn is_expired(&self, expiry: &Expiry, now: Instant) -> bool {
        match expiry {
            Expiry::Never => false,
            Expiry::TimeToLive(ttl) => now.saturating_duration_since(self.created_at) >= *ttl,
            Expiry::TimeToIdle(tti) => now.saturating_duration_since(self.last_accessed()) >= *tti,
        }
    }
}

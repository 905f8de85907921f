//! Eviction Advisor Module
//!
//! Policy objects consulted by the slot table when a put pushes the store
//! over capacity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::Entry;

// == Victim Order ==
/// Order in which evictable entries are chosen as victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictimOrder {
    /// Entry read or written longest ago goes first
    #[default]
    LeastRecentlyUsed,
    /// Entry written longest ago goes first, regardless of reads
    FirstInFirstOut,
    /// Entry with the largest size hint goes first
    LargestFirst,
}

// == Eviction Advisor ==
/// Decides which entries may be evicted.
///
/// The base contract only gates eligibility. `victim_order` lets a policy
/// also say which eligible entry should go first.
pub trait EvictionAdvisor<K, V>: Send + Sync {
    fn is_evictable(&self, key: &K, entry: &Entry<V>) -> bool;

    fn victim_order(&self) -> VictimOrder {
        VictimOrder::LeastRecentlyUsed
    }
}

// == Accept All ==
/// Every entry is an eviction candidate. The default advisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll {
    order: VictimOrder,
}

impl AcceptAll {
    pub fn with_order(order: VictimOrder) -> Self {
        Self { order }
    }
}

impl<K, V> EvictionAdvisor<K, V> for AcceptAll {
    fn is_evictable(&self, _key: &K, _entry: &Entry<V>) -> bool {
        true
    }

    fn victim_order(&self) -> VictimOrder {
        self.order
    }
}

// == Reject All ==
/// No entry is ever evicted; the store grows past its capacity instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl<K, V> EvictionAdvisor<K, V> for RejectAll {
    fn is_evictable(&self, _key: &K, _entry: &Entry<V>) -> bool {
        false
    }
}

// == Closure Advisor ==
/// Advisor backed by a predicate over key and value.
pub struct FnAdvisor<F> {
    predicate: F,
    order: VictimOrder,
}

/// Builds an advisor from a `(key, value) -> bool` predicate.
pub fn from_fn<F>(predicate: F) -> FnAdvisor<F> {
    FnAdvisor {
        predicate,
        order: VictimOrder::default(),
    }
}

impl<F> FnAdvisor<F> {
    pub fn with_order(mut self, order: VictimOrder) -> Self {
        self.order = order;
        self
    }
}

impl<F> fmt::Debug for FnAdvisor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAdvisor")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl<K, V, F> EvictionAdvisor<K, V> for FnAdvisor<F>
where
    F: Fn(&K, &V) -> bool + Send + Sync,
{
    fn is_evictable(&self, key: &K, entry: &Entry<V>) -> bool {
        (self.predicate)(key, entry.value())
    }

    fn victim_order(&self) -> VictimOrder {
        self.order
    }
}

// == Victim Rank ==
/// Sort key for a candidate under `order`; lower ranks are evicted first.
pub(crate) fn victim_rank<V>(order: VictimOrder, entry: &Entry<V>) -> u64 {
    match order {
        VictimOrder::LeastRecentlyUsed => entry.access_tick(),
        VictimOrder::FirstInFirstOut => entry.created_tick(),
        VictimOrder::LargestFirst => u64::MAX - entry.size_hint() as u64,
    }
}

//! Slot Table Module
//!
//! Sharded concurrent mapping from key to entry. Every per-key operation
//! holds the key's shard lock for its whole duration; capacity bookkeeping
//! is a shared counter and evictions are serialized.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::eviction::victim_rank;
use crate::cache::{Entry, EvictionAdvisor, Expiry};
use crate::config::Weigher;
use crate::error::AccessError;

type Shard<K, V> = RwLock<HashMap<K, Entry<V>>>;

// == Victim ==
struct Victim<K> {
    shard: usize,
    key: K,
    expired: bool,
    rank: u64,
}

impl<K> Victim<K> {
    /// Expired entries beat live ones, then the lower rank wins.
    fn beats(&self, other: &Victim<K>) -> bool {
        (!self.expired, self.rank) < (!other.expired, other.rank)
    }
}

// == Slot Table ==
pub(crate) struct SlotTable<K, V> {
    shards: Box<[Shard<K, V>]>,
    hasher: RandomState,
    /// Entries currently held, expired ones included until purged
    len: AtomicUsize,
    /// Logical clock stamping writes and reads, for victim ordering
    clock: AtomicU64,
    capacity: Option<NonZeroUsize>,
    expiry: Expiry,
    advisor: Arc<dyn EvictionAdvisor<K, V>>,
    weigher: Weigher<K, V>,
    eviction: Mutex<()>,
}

impl<K, V> SlotTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    pub(crate) fn new(
        shards: NonZeroUsize,
        capacity: Option<NonZeroUsize>,
        expiry: Expiry,
        advisor: Arc<dyn EvictionAdvisor<K, V>>,
        weigher: Weigher<K, V>,
    ) -> Self {
        Self {
            shards: (0..shards.get()).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            capacity,
            expiry,
            advisor,
            weigher,
            eviction: Mutex::new(()),
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Shared access to one shard.
    ///
    /// A poisoned shard is reported once and then cleared, so a retry
    /// goes through.
    fn read(&self, shard: usize) -> Result<RwLockReadGuard<'_, HashMap<K, Entry<V>>>, AccessError> {
        self.shards[shard].read().map_err(|poisoned| {
            drop(poisoned);
            self.recover(shard)
        })
    }

    fn write(
        &self,
        shard: usize,
    ) -> Result<RwLockWriteGuard<'_, HashMap<K, Entry<V>>>, AccessError> {
        self.shards[shard].write().map_err(|poisoned| {
            drop(poisoned);
            self.recover(shard)
        })
    }

    fn recover(&self, shard: usize) -> AccessError {
        self.shards[shard].clear_poison();
        warn!(shard, "Recovered poisoned shard");
        AccessError::Poisoned { shard }
    }

    /// Shard access for maintenance passes, which never fail on poison.
    fn read_recovered(&self, shard: usize) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        let map = self.shards[shard]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.shards[shard].clear_poison();
        map
    }

    fn write_recovered(&self, shard: usize) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        let map = self.shards[shard]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.shards[shard].clear_poison();
        map
    }

    // == Get ==
    /// Returns a copy of the live value for `key`, recording the access.
    ///
    /// A stale entry found on the way is removed.
    pub(crate) fn get(&self, key: &K) -> Result<Option<V>, AccessError> {
        let shard = self.shard_index(key);
        let now = Instant::now();
        {
            let map = self.read(shard)?;
            match map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(&self.expiry, now) => {
                    entry.touch(self.tick(), now);
                    return Ok(Some(entry.value().clone()));
                }
                Some(_) => {}
            }
        }
        self.expire_stale(shard, key, now)?;
        Ok(None)
    }

    // == Contains Key ==
    /// Same liveness rules as `get`, without recording an access.
    pub(crate) fn contains_key(&self, key: &K) -> Result<bool, AccessError> {
        let shard = self.shard_index(key);
        let now = Instant::now();
        let stale = {
            let map = self.read(shard)?;
            match map.get(key) {
                None => return Ok(false),
                Some(entry) => entry.is_expired(&self.expiry, now),
            }
        };
        if stale {
            self.expire_stale(shard, key, now)?;
        }
        Ok(!stale)
    }

    fn expire_stale(&self, shard: usize, key: &K, now: Instant) -> Result<(), AccessError> {
        let mut map = self.write(shard)?;
        if map
            .get(key)
            .is_some_and(|entry| entry.is_expired(&self.expiry, now))
        {
            map.remove(key);
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    // == Put ==
    /// Inserts or replaces the entry for `key`.
    ///
    /// Returns the previous live value. A put that adds a new key to a
    /// full table evicts before returning.
    pub(crate) fn put(&self, key: K, value: V) -> Result<Option<V>, AccessError> {
        let shard = self.shard_index(&key);
        let now = Instant::now();
        let size = (self.weigher)(&key, &value);
        let previous = {
            let mut map = self.write(shard)?;
            let entry = Entry::new(value, size, self.tick(), now);
            match map.insert(key.clone(), entry) {
                Some(old) => Some(old),
                None => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        };

        match previous {
            Some(old) if old.is_expired(&self.expiry, now) => Ok(None),
            Some(old) => Ok(Some(old.into_value())),
            None => {
                self.enforce_capacity(&key);
                Ok(None)
            }
        }
    }

    // == Put If Absent ==
    /// Inserts only when no live entry exists; returns the live value otherwise.
    pub(crate) fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, AccessError> {
        let shard = self.shard_index(&key);
        let now = Instant::now();
        let inserted = {
            let mut map = self.write(shard)?;
            if let Some(current) = map.get(&key) {
                if !current.is_expired(&self.expiry, now) {
                    current.touch(self.tick(), now);
                    return Ok(Some(current.value().clone()));
                }
            }
            let size = (self.weigher)(&key, &value);
            let entry = Entry::new(value, size, self.tick(), now);
            let inserted = map.insert(key.clone(), entry).is_none();
            if inserted {
                self.len.fetch_add(1, Ordering::Relaxed);
            }
            inserted
        };

        if inserted {
            self.enforce_capacity(&key);
        }
        Ok(None)
    }

    // == Replace ==
    /// Overwrites the value only when a live entry exists.
    pub(crate) fn replace(&self, key: &K, value: V) -> Result<Option<V>, AccessError> {
        let shard = self.shard_index(key);
        let now = Instant::now();
        let mut map = self.write(shard)?;
        let live = map
            .get(key)
            .is_some_and(|entry| !entry.is_expired(&self.expiry, now));
        if !live {
            return Ok(None);
        }

        let size = (self.weigher)(key, &value);
        let entry = Entry::new(value, size, self.tick(), now);
        Ok(map.insert(key.clone(), entry).map(Entry::into_value))
    }

    // == Remove ==
    /// Removes the entry for `key`, returning its value if it was live.
    ///
    /// An absent key is not an error. On a poisoned shard the removal is
    /// still carried out and the poison cleared before the fault is
    /// reported, so the key is gone either way.
    pub(crate) fn remove(&self, key: &K) -> Result<Option<V>, AccessError> {
        let shard = self.shard_index(key);
        let now = Instant::now();
        match self.shards[shard].write() {
            Ok(mut map) => Ok(self.take(&mut map, key, now)),
            Err(poisoned) => {
                let mut map = poisoned.into_inner();
                self.take(&mut map, key, now);
                drop(map);
                self.shards[shard].clear_poison();
                warn!(shard, "Recovered poisoned shard during remove");
                Err(AccessError::Poisoned { shard })
            }
        }
    }

    fn take(&self, map: &mut HashMap<K, Entry<V>>, key: &K, now: Instant) -> Option<V> {
        let entry = map.remove(key)?;
        self.len.fetch_sub(1, Ordering::Relaxed);
        if entry.is_expired(&self.expiry, now) {
            None
        } else {
            Some(entry.into_value())
        }
    }

    // == Purge Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub(crate) fn purge_expired(&self) -> usize {
        if self.expiry == Expiry::Never {
            return 0;
        }

        let now = Instant::now();
        let mut removed = 0;
        for shard in 0..self.shards.len() {
            let mut map = self.write_recovered(shard);
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(&self.expiry, now));
            let dropped = before - map.len();
            self.len.fetch_sub(dropped, Ordering::Relaxed);
            removed += dropped;
        }

        if removed > 0 {
            debug!(removed, "Purged expired entries");
        }
        removed
    }

    // == Clear ==
    /// Drops every entry, recovering poisoned shards on the way.
    pub(crate) fn clear(&self) {
        for shard in 0..self.shards.len() {
            let mut map = self.write_recovered(shard);
            self.len.fetch_sub(map.len(), Ordering::Relaxed);
            map.clear();
        }
    }

    // == Length ==
    /// Number of entries held, counting expired ones not yet purged.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    // == Eviction ==
    /// Evicts until the table is back within capacity or nothing is evictable.
    ///
    /// `fresh` is the key just written; it is never its own victim.
    fn enforce_capacity(&self, fresh: &K) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.len() <= capacity.get() {
            return;
        }

        let _serial = self.eviction.lock().unwrap_or_else(PoisonError::into_inner);
        while self.len() > capacity.get() {
            let Some(victim) = self.select_victim(fresh) else {
                warn!(
                    len = self.len(),
                    capacity = capacity.get(),
                    "No evictable entry found, store exceeds its capacity"
                );
                return;
            };
            // A victim removed concurrently already lowered the count.
            let mut map = self.write_recovered(victim.shard);
            if map.remove(&victim.key).is_some() {
                self.len.fetch_sub(1, Ordering::Relaxed);
                debug!(
                    shard = victim.shard,
                    expired = victim.expired,
                    "Evicted entry"
                );
            }
        }
    }

    fn select_victim(&self, fresh: &K) -> Option<Victim<K>> {
        let order = self.advisor.victim_order();
        let now = Instant::now();
        let mut best: Option<Victim<K>> = None;

        for shard in 0..self.shards.len() {
            let map = self.read_recovered(shard);
            for (key, entry) in map.iter() {
                if key == fresh {
                    continue;
                }
                let expired = entry.is_expired(&self.expiry, now);
                if !expired && !self.advisor.is_evictable(key, entry) {
                    continue;
                }
                let candidate = Victim {
                    shard,
                    key: key.clone(),
                    expired,
                    rank: victim_rank(order, entry),
                };
                if best.as_ref().map_or(true, |current| candidate.beats(current)) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Poisons the shard holding `key` by panicking while holding its lock.
    #[cfg(test)]
    pub(crate) fn poison_shard_of(&self, key: &K)
    where
        K: Send + Sync,
        V: Send + Sync,
    {
        let shard = self.shard_index(key);
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.shards[shard].write();
                    panic!("poisoning shard {shard}");
                })
                .join();
        });
    }
}

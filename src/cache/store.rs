//! Cache Store Module
//!
//! Public store facade: type guard, slot table and eviction advisor behind
//! one thread-safe handle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::cache::slot_table::SlotTable;
use crate::cache::{Erased, TypeGuard, TypeToken};
use crate::config::StoreConfig;
use crate::error::{AccessError, Result, StoreError};

// == Store ==
/// Thread-safe in-memory key-value store.
///
/// Share it between threads with `Arc<Store<K, V>>`. Every operation is
/// atomic with respect to its key; batch operations are not atomic as a
/// whole.
pub struct Store<K, V> {
    config: StoreConfig<K, V>,
    guard: TypeGuard,
    table: SlotTable<K, V>,
    closed: AtomicBool,
}

impl<K, V> Store<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    pub fn new(config: StoreConfig<K, V>) -> Self {
        let table = SlotTable::new(
            config.shards(),
            config.capacity(),
            config.expiry(),
            config.advisor(),
            config.weigher(),
        );
        debug!(
            key_type = config.key_type().name(),
            value_type = config.value_type().name(),
            capacity = ?config.capacity(),
            "Store created"
        );
        Self {
            guard: TypeGuard::new(config.key_type(), config.value_type()),
            config,
            table,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StoreConfig<K, V> {
        &self.config
    }

    fn ensure_open(&self) -> std::result::Result<(), AccessError> {
        if self.closed.load(Ordering::Acquire) {
            Err(AccessError::Closed)
        } else {
            Ok(())
        }
    }

    /// Runs after a write. A write that raced `close` may have landed after
    /// the table was cleared, so it is cleared again and the write reports
    /// `Closed`.
    fn discard_if_closed(&self) -> std::result::Result<(), AccessError> {
        if self.closed.load(Ordering::Acquire) {
            self.table.clear();
            return Err(AccessError::Closed);
        }
        Ok(())
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.ensure_open()?;
        self.table.put(key, value)?;
        self.discard_if_closed()?;
        Ok(())
    }

    // == Get ==
    /// Returns the live value for `key`. Absent and expired keys yield `None`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        Ok(self.table.get(key)?)
    }

    // == Remove ==
    /// Removes `key`. Removing an absent key succeeds.
    ///
    /// When an `AccessError` is returned the key is nevertheless absent.
    pub fn remove(&self, key: &K) -> Result<()> {
        self.ensure_open()?;
        self.table.remove(key)?;
        Ok(())
    }

    // == Contains Key ==
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.table.contains_key(key)?)
    }

    // == Put If Absent ==
    /// Stores `value` only if `key` has no live value; returns the existing one.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let existing = self.table.put_if_absent(key, value)?;
        self.discard_if_closed()?;
        Ok(existing)
    }

    // == Replace ==
    /// Overwrites the value of a live `key`; returns the replaced value.
    pub fn replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let replaced = self.table.replace(key, value)?;
        self.discard_if_closed()?;
        Ok(replaced)
    }

    // == Batch Operations ==
    /// Stores every pair in order, stopping at the first failure.
    pub fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        entries
            .into_iter()
            .try_for_each(|(key, value)| self.put(key, value))
    }

    /// Looks up every key; absent keys map to `None`.
    pub fn get_all<'a, I>(&self, keys: I) -> Result<HashMap<K, Option<V>>>
    where
        I: IntoIterator<Item = &'a K>,
    {
        keys.into_iter()
            .map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Removes every key.
    ///
    /// Access errors do not stop the batch: every key is attempted and the
    /// first error is returned afterwards.
    pub fn remove_all<'a, I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a K>,
    {
        let mut first_error = None;
        for key in keys {
            match self.remove(key) {
                Ok(()) => {}
                Err(err @ StoreError::Access(AccessError::Poisoned { .. })) => {
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // == Maintenance ==
    /// Drops all entries.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.table.clear();
        Ok(())
    }

    /// Removes expired entries now; returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.table.purge_expired())
    }

    // == Length ==
    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // == Close ==
    /// Releases all entries. Later operations fail with `AccessError::Closed`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.table.clear();
            info!(
                key_type = self.guard.key_type().name(),
                "Store closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<K, V> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// == Erased Store ==
/// Dynamically typed view of a store.
///
/// Keys and values arrive as `&dyn Erased` and are checked against the
/// declared types before the slot table is touched. `None` stands for a
/// null key or value and is always rejected.
pub trait ErasedStore: Send + Sync {
    fn key_type(&self) -> TypeToken;

    fn value_type(&self) -> TypeToken;

    fn put(&self, key: Option<&dyn Erased>, value: Option<&dyn Erased>) -> Result<()>;

    fn get(&self, key: Option<&dyn Erased>) -> Result<Option<Box<dyn Erased>>>;

    fn remove(&self, key: Option<&dyn Erased>) -> Result<()>;

    fn contains_key(&self, key: Option<&dyn Erased>) -> Result<bool>;

    fn close(&self);
}

impl<K, V> ErasedStore for Store<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn key_type(&self) -> TypeToken {
        self.guard.key_type()
    }

    fn value_type(&self) -> TypeToken {
        self.guard.value_type()
    }

    fn put(&self, key: Option<&dyn Erased>, value: Option<&dyn Erased>) -> Result<()> {
        let key: &K = self.guard.check_key(key)?;
        let value: &V = self.guard.check_value(value)?;
        Store::put(self, key.clone(), value.clone())
    }

    fn get(&self, key: Option<&dyn Erased>) -> Result<Option<Box<dyn Erased>>> {
        let key: &K = self.guard.check_key(key)?;
        let value = Store::get(self, key)?;
        Ok(value.map(|value| Box::new(value) as Box<dyn Erased>))
    }

    fn remove(&self, key: Option<&dyn Erased>) -> Result<()> {
        let key: &K = self.guard.check_key(key)?;
        Store::remove(self, key)
    }

    fn contains_key(&self, key: Option<&dyn Erased>) -> Result<bool> {
        let key: &K = self.guard.check_key(key)?;
        Store::contains_key(self, key)
    }

    fn close(&self) {
        Store::close(self)
    }
}

/// Downcasts a value returned by `ErasedStore::get`.
pub fn downcast_value<V: Any>(value: &dyn Erased) -> Option<&V> {
    value.as_any().downcast_ref::<V>()
}

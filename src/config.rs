//! Configuration Module
//!
//! Declarative store settings (environment or JSON) and the immutable,
//! typed configuration record a store is built from.

use std::any::Any;
use std::env;
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{AcceptAll, EvictionAdvisor, Expiry, TypeToken, VictimOrder};
use crate::error::ConfigError;

/// Default number of lock shards in a store.
pub const DEFAULT_SHARDS: usize = 16;

/// Default interval between background expiry sweeps, in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

/// Estimates the size of an entry, for size-ordered eviction.
pub type Weigher<K, V> = fn(&K, &V) -> usize;

fn shallow_size<K, V>(_key: &K, value: &V) -> usize {
    mem::size_of_val(value)
}

// == Store Settings ==
/// Untyped store settings.
///
/// All fields have defaults, so a partial JSON document or a partial set of
/// environment variables is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Maximum number of entries, unbounded when absent
    pub capacity: Option<usize>,
    /// Entry lifetime after write, in milliseconds
    pub time_to_live_ms: Option<u64>,
    /// Entry lifetime after last access, in milliseconds
    pub time_to_idle_ms: Option<u64>,
    /// Number of lock shards
    pub shards: usize,
    /// Victim order of the default advisor
    pub eviction_order: VictimOrder,
    /// Background expiry sweep interval in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity: None,
            time_to_live_ms: None,
            time_to_idle_ms: None,
            shards: DEFAULT_SHARDS,
            eviction_order: VictimOrder::default(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl StoreSettings {
    /// Loads settings from environment variables.
    ///
    /// # Environment Variables
    /// - `MINI_STORE_CAPACITY` - Maximum entries (default: unbounded)
    /// - `MINI_STORE_TTL_MS` - Time to live in milliseconds (default: none)
    /// - `MINI_STORE_TTI_MS` - Time to idle in milliseconds (default: none)
    /// - `MINI_STORE_SHARDS` - Lock shards (default: 16)
    /// - `MINI_STORE_EVICTION_ORDER` - `least_recently_used`, `first_in_first_out`
    ///   or `largest_first` (default: `least_recently_used`)
    /// - `MINI_STORE_SWEEP_INTERVAL_MS` - Expiry sweep interval (default: 1000)
    ///
    /// Unparseable values, and a zero sweep interval, fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            capacity: lookup("MINI_STORE_CAPACITY").and_then(|v| v.parse().ok()),
            time_to_live_ms: lookup("MINI_STORE_TTL_MS").and_then(|v| v.parse().ok()),
            time_to_idle_ms: lookup("MINI_STORE_TTI_MS").and_then(|v| v.parse().ok()),
            shards: lookup("MINI_STORE_SHARDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.shards),
            eviction_order: lookup("MINI_STORE_EVICTION_ORDER")
                .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok())
                .unwrap_or(defaults.eviction_order),
            sweep_interval_ms: lookup("MINI_STORE_SWEEP_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.sweep_interval_ms),
        }
    }

    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.sweep_interval()?;
        Ok(settings)
    }

    pub fn expiry(&self) -> Result<Expiry, ConfigError> {
        match (self.time_to_live_ms, self.time_to_idle_ms) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingExpiry),
            (Some(ttl), None) => Ok(Expiry::TimeToLive(Duration::from_millis(ttl))),
            (None, Some(tti)) => Ok(Expiry::TimeToIdle(Duration::from_millis(tti))),
            (None, None) => Ok(Expiry::Never),
        }
    }

    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        match self.sweep_interval_ms {
            0 => Err(ConfigError::ZeroSweepInterval),
            ms => Ok(Duration::from_millis(ms)),
        }
    }
}

// == Store Config ==
/// Immutable configuration of a single store.
///
/// The declared key and value types are fixed by `K` and `V`; their tokens
/// are carried for runtime checks at the type-erased boundary.
pub struct StoreConfig<K, V> {
    key_type: TypeToken,
    value_type: TypeToken,
    capacity: Option<NonZeroUsize>,
    expiry: Expiry,
    advisor: Arc<dyn EvictionAdvisor<K, V>>,
    weigher: Weigher<K, V>,
    shards: NonZeroUsize,
}

impl<K: Any, V: Any> StoreConfig<K, V> {
    pub fn builder() -> StoreConfigBuilder<K, V> {
        StoreConfigBuilder::new()
    }

    /// Builds a configuration from untyped settings with the default advisor.
    ///
    /// `largest_first` ordering needs a weigher, so it is rejected here; use
    /// `builder().weigher(..).settings(..)` instead.
    pub fn from_settings(settings: &StoreSettings) -> Result<Self, ConfigError> {
        Self::builder().settings(settings)?.build()
    }
}

impl<K, V> StoreConfig<K, V> {
    pub fn key_type(&self) -> TypeToken {
        self.key_type
    }

    pub fn value_type(&self) -> TypeToken {
        self.value_type
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn advisor(&self) -> Arc<dyn EvictionAdvisor<K, V>> {
        Arc::clone(&self.advisor)
    }

    pub fn weigher(&self) -> Weigher<K, V> {
        self.weigher
    }

    pub fn shards(&self) -> NonZeroUsize {
        self.shards
    }
}

impl<K, V> Clone for StoreConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            key_type: self.key_type,
            value_type: self.value_type,
            capacity: self.capacity,
            expiry: self.expiry,
            advisor: Arc::clone(&self.advisor),
            weigher: self.weigher,
            shards: self.shards,
        }
    }
}

impl<K, V> fmt::Debug for StoreConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("key_type", &self.key_type)
            .field("value_type", &self.value_type)
            .field("capacity", &self.capacity)
            .field("expiry", &self.expiry)
            .field("shards", &self.shards)
            .finish_non_exhaustive()
    }
}

// == Store Config Builder ==
pub struct StoreConfigBuilder<K, V> {
    capacity: Option<usize>,
    expiry: Expiry,
    advisor: Arc<dyn EvictionAdvisor<K, V>>,
    weigher: Option<Weigher<K, V>>,
    shards: usize,
}

impl<K: Any, V: Any> StoreConfigBuilder<K, V> {
    fn new() -> Self {
        Self {
            capacity: None,
            expiry: Expiry::Never,
            advisor: Arc::new(AcceptAll::default()),
            weigher: None,
            shards: DEFAULT_SHARDS,
        }
    }

    /// Maximum number of live entries.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn advisor<A>(mut self, advisor: A) -> Self
    where
        A: EvictionAdvisor<K, V> + 'static,
    {
        self.advisor = Arc::new(advisor);
        self
    }

    pub fn shared_advisor(mut self, advisor: Arc<dyn EvictionAdvisor<K, V>>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Entry size estimate; required for largest-first eviction.
    pub fn weigher(mut self, weigher: Weigher<K, V>) -> Self {
        self.weigher = Some(weigher);
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Applies untyped settings: capacity, expiry, shards and a default
    /// advisor with the configured victim order.
    pub fn settings(mut self, settings: &StoreSettings) -> Result<Self, ConfigError> {
        settings.sweep_interval()?;
        self.expiry = settings.expiry()?;
        self.advisor = Arc::new(AcceptAll::with_order(settings.eviction_order));
        self.shards = settings.shards;
        if let Some(capacity) = settings.capacity {
            self.capacity = Some(capacity);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<StoreConfig<K, V>, ConfigError> {
        let capacity = match self.capacity {
            Some(capacity) => Some(NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity)?),
            None => None,
        };
        let shards = NonZeroUsize::new(self.shards).ok_or(ConfigError::ZeroShards)?;
        let weigher: Weigher<K, V> = match self.weigher {
            Some(weigher) => weigher,
            None if self.advisor.victim_order() == VictimOrder::LargestFirst => {
                return Err(ConfigError::MissingWeigher)
            }
            None => shallow_size::<K, V>,
        };

        Ok(StoreConfig {
            key_type: TypeToken::of::<K>(),
            value_type: TypeToken::of::<V>(),
            capacity,
            expiry: self.expiry,
            advisor: self.advisor,
            weigher,
            shards,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_default() {
        let settings = StoreSettings::default();
        assert_eq!(settings.capacity, None);
        assert_eq!(settings.shards, 16);
        assert_eq!(settings.eviction_order, VictimOrder::LeastRecentlyUsed);
        assert_eq!(settings.sweep_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(settings.expiry().unwrap(), Expiry::Never);
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("MINI_STORE_CAPACITY", "500"),
            ("MINI_STORE_TTI_MS", "2500"),
            ("MINI_STORE_SHARDS", "not-a-number"),
            ("MINI_STORE_EVICTION_ORDER", "first_in_first_out"),
        ]
        .into_iter()
        .collect();

        let settings = StoreSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(settings.capacity, Some(500));
        assert_eq!(settings.shards, DEFAULT_SHARDS);
        assert_eq!(settings.eviction_order, VictimOrder::FirstInFirstOut);
        assert_eq!(
            settings.expiry().unwrap(),
            Expiry::TimeToIdle(Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_settings_from_env_defaults() {
        env::remove_var("MINI_STORE_CAPACITY");
        env::remove_var("MINI_STORE_SHARDS");

        let settings = StoreSettings::from_env();
        assert_eq!(settings.capacity, None);
        assert_eq!(settings.shards, DEFAULT_SHARDS);
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let settings = StoreSettings {
            sweep_interval_ms: 0,
            ..StoreSettings::default()
        };
        assert!(matches!(
            settings.sweep_interval(),
            Err(ConfigError::ZeroSweepInterval)
        ));
        assert!(matches!(
            StoreConfig::<String, String>::from_settings(&settings),
            Err(ConfigError::ZeroSweepInterval)
        ));
        assert!(matches!(
            StoreSettings::from_json(r#"{"sweep_interval_ms": 0}"#),
            Err(ConfigError::ZeroSweepInterval)
        ));

        let vars: HashMap<&str, &str> = [("MINI_STORE_SWEEP_INTERVAL_MS", "0")].into_iter().collect();
        let settings = StoreSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(settings.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL_MS);
    }

    #[test]
    fn test_largest_first_requires_a_weigher() {
        let settings = StoreSettings {
            capacity: Some(2),
            eviction_order: VictimOrder::LargestFirst,
            ..StoreSettings::default()
        };
        assert!(matches!(
            StoreConfig::<String, String>::from_settings(&settings),
            Err(ConfigError::MissingWeigher)
        ));
        assert!(matches!(
            StoreConfig::<String, String>::builder()
                .advisor(AcceptAll::with_order(VictimOrder::LargestFirst))
                .build(),
            Err(ConfigError::MissingWeigher)
        ));

        fn by_length(_key: &String, value: &String) -> usize {
            value.len()
        }
        let config = StoreConfig::<String, String>::builder()
            .weigher(by_length)
            .settings(&settings)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.advisor().victim_order(), VictimOrder::LargestFirst);
        assert_eq!((config.weigher())(&"k".to_string(), &"x".repeat(10)), 10);
    }

    #[test]
    fn test_settings_from_json() {
        let settings =
            StoreSettings::from_json(r#"{"capacity": 10, "eviction_order": "largest_first"}"#)
                .unwrap();
        assert_eq!(settings.capacity, Some(10));
        assert_eq!(settings.eviction_order, VictimOrder::LargestFirst);
        assert_eq!(settings.shards, DEFAULT_SHARDS);

        assert!(matches!(
            StoreSettings::from_json("{\"capacity\": -1}"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_conflicting_expiry_is_rejected() {
        let settings = StoreSettings {
            time_to_live_ms: Some(1),
            time_to_idle_ms: Some(1),
            ..StoreSettings::default()
        };
        assert!(matches!(
            StoreConfig::<String, String>::from_settings(&settings),
            Err(ConfigError::ConflictingExpiry)
        ));
    }

    #[test]
    fn test_builder_validates_limits() {
        assert!(matches!(
            StoreConfig::<u32, u32>::builder().capacity(0).build(),
            Err(ConfigError::ZeroCapacity)
        ));
        assert!(matches!(
            StoreConfig::<u32, u32>::builder().shards(0).build(),
            Err(ConfigError::ZeroShards)
        ));
    }

    #[test]
    fn test_builder_records_declared_types() {
        let config = StoreConfig::<String, u64>::builder()
            .capacity(8)
            .expiry(Expiry::TimeToLive(Duration::from_secs(5)))
            .build()
            .unwrap();

        assert_eq!(config.key_type(), TypeToken::of::<String>());
        assert_eq!(config.value_type(), TypeToken::of::<u64>());
        assert_eq!(config.capacity().map(NonZeroUsize::get), Some(8));
        assert_eq!(config.expiry(), Expiry::TimeToLive(Duration::from_secs(5)));
        assert_eq!((config.weigher())(&"k".to_string(), &1u64), 8);
    }
}

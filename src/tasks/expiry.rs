//! Expiry Sweep Task
//!
//! Background task that periodically removes expired store entries.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Store;

/// Spawns a background task that periodically purges expired entries.
///
/// Reads already hide expired entries; the sweep only reclaims their
/// memory. The task ends on its own once the store is closed, or can be
/// aborted through the returned handle.
///
/// # Example
/// ```ignore
/// let store = Arc::new(Store::new(config));
/// let sweeper = spawn_expiry_task(store.clone(), settings.sweep_interval()?);
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_expiry_task<K, V>(store: Arc<Store<K, V>>, interval: Duration) -> JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(?interval, "Starting expiry sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let Ok(removed) = store.purge_expired() else {
                info!("Store closed, stopping expiry sweep task");
                break;
            };

            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

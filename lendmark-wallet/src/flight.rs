//! Per-identity concurrency guards.
//!
//! [`SingleFlight`] collapses concurrent calls for the same key into one
//! spawned task. The task owns the work, so it runs to completion even when
//! every caller is dropped, and it clears its own entry when it ends.
//! [`KeyedLock`] serializes work per key.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

/// Output of a flight, `None` if its task panicked
type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;

struct Entry<V> {
    id: u64,
    flight: Flight<V>,
}

type Registry<K, V> = Arc<Mutex<HashMap<K, Entry<V>>>>;

fn registry<K, V>(flights: &Mutex<HashMap<K, Entry<V>>>) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
    flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a finished flight from the registry, panics included.
struct Landing<K: Eq + Hash, V> {
    flights: Registry<K, V>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V> Drop for Landing<K, V> {
    fn drop(&mut self) {
        let mut flights = registry(&self.flights);
        if flights.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

/// In-flight task cache keyed by `K`.
pub struct SingleFlight<K, V: Clone> {
    flights: Registry<K, V>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the flight for `key`, spawning one from `start` if none is
    /// running. Every caller gets the same output. Dropping a caller never
    /// cancels the work. Must be called inside a tokio runtime.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut flights = registry(&self.flights);
            match flights.get(&key) {
                Some(entry) => entry.flight.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let landing = Landing {
                        flights: Arc::clone(&self.flights),
                        key: key.clone(),
                        id,
                    };
                    let work = start();
                    let task = tokio::spawn(async move {
                        let _landing = landing;
                        work.await
                    });
                    let flight = async move {
                        task.await
                            .map_err(|e| warn!("single-flight task failed: {}", e))
                            .ok()
                    }
                    .boxed()
                    .shared();
                    flights.insert(
                        key,
                        Entry {
                            id,
                            flight: flight.clone(),
                        },
                    );
                    flight
                }
            }
        };

        flight.await
    }

    /// Number of keys with a flight in progress
    pub fn in_flight(&self) -> usize {
        registry(&self.flights).len()
    }
}

/// One async mutex per key.
pub struct KeyedLock<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // drop idle entries
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

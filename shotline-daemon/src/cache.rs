//! Time-windowed, invalidate-on-write cache of daemon responses.
//!
//! Concurrent misses on one key coalesce: the first caller marks the slot
//! in flight and runs the producer without holding the lock, later callers
//! block on the condvar until the slot settles.
//!
//! Every in-flight slot carries a generation. `invalidate` removes slots
//! outright, so a producer whose slot vanished (or was replaced) while it
//! ran hands its result to its own caller but never stores it. Waiters
//! re-run the lookup after waking, which means an invalidation can never be
//! masked by a response fetched before it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use shotline_core::CacheSettings;

enum Slot<V> {
    Ready {
        value: V,
        stored_at: Instant,
        generation: u64,
    },
    InFlight {
        generation: u64,
    },
}

struct Inner<V> {
    slots: HashMap<String, Slot<V>>,
    next_generation: u64,
}

pub struct MetadataCache<V: Clone = Value> {
    inner: Mutex<Inner<V>>,
    settled: Condvar,
    ttl: Duration,
    coalesce_window: Duration,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(ttl: Duration, coalesce_window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                next_generation: 0,
            }),
            settled: Condvar::new(),
            ttl,
            coalesce_window,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.ttl(), settings.coalesce_window())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `get` with the configured TTL.
    pub fn fetch<E, F>(&self, key: &str, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get(key, self.ttl, producer)
    }

    /// `get` with the coalescing window as TTL, for rapidly polled keys.
    pub fn get_coalesced<E, F>(&self, key: &str, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get(key, self.coalesce_window, producer)
    }

    /// Cached value for `key` if younger than `ttl`, otherwise the producer's result.
    ///
    /// Producer errors are returned but never cached.
    pub fn get<E, F>(&self, key: &str, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let generation = {
            let mut inner = self.inner.lock();
            loop {
                match inner.slots.get(key) {
                    Some(Slot::Ready {
                        value, stored_at, ..
                    }) if stored_at.elapsed() < ttl => return Ok(value.clone()),
                    Some(Slot::InFlight { .. }) => self.settled.wait(&mut inner),
                    _ => {
                        inner.next_generation += 1;
                        let generation = inner.next_generation;
                        inner
                            .slots
                            .insert(key.to_string(), Slot::InFlight { generation });
                        break generation;
                    }
                }
            }
        };

        let mut guard = InFlightGuard {
            cache: self,
            key,
            generation,
            armed: true,
        };
        let result = producer();
        guard.armed = false;

        let mut inner = self.inner.lock();
        let still_ours = matches!(
            inner.slots.get(key),
            Some(Slot::InFlight { generation: g }) if *g == generation
        );
        if still_ours {
            match &result {
                Ok(value) => {
                    inner.slots.insert(
                        key.to_string(),
                        Slot::Ready {
                            value: value.clone(),
                            stored_at: Instant::now(),
                            generation,
                        },
                    );
                }
                Err(_) => {
                    inner.slots.remove(key);
                }
            }
        } else {
            tracing::debug!(key, "discarding result fetched before invalidation");
        }
        drop(inner);
        self.settled.notify_all();
        result
    }

    /// Fresh cached value without running a producer.
    pub fn peek(&self, key: &str) -> Option<V> {
        match self.inner.lock().slots.get(key) {
            Some(Slot::Ready {
                value, stored_at, ..
            }) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Generation of the stored value for `key`, if any.
    pub fn generation(&self, key: &str) -> Option<u64> {
        match self.inner.lock().slots.get(key) {
            Some(Slot::Ready { generation, .. }) => Some(*generation),
            _ => None,
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.lock().slots.remove(key).is_some();
        if removed {
            tracing::debug!(key, "cache entry invalidated");
            self.settled.notify_all();
        }
        removed
    }

    /// Remove every key that starts with `prefix`. Returns the number removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.slots.len();
            inner.slots.retain(|key, _| !key.starts_with(prefix));
            before - inner.slots.len()
        };
        if removed > 0 {
            tracing::debug!(prefix, removed, "cache entries invalidated");
            self.settled.notify_all();
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.lock().slots.clear();
        self.settled.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases an in-flight slot if the producer unwinds.
struct InFlightGuard<'a, V: Clone> {
    cache: &'a MetadataCache<V>,
    key: &'a str,
    generation: u64,
    armed: bool,
}

impl<V: Clone> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.cache.inner.lock();
        if matches!(
            inner.slots.get(self.key),
            Some(Slot::InFlight { generation }) if *generation == self.generation
        ) {
            inner.slots.remove(self.key);
        }
        drop(inner);
        self.cache.settled.notify_all();
    }
}

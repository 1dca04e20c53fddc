//! A semi-persistent key-value mapping behind a validated builder.
//!
//! [`CacheBuilder`] configures capacity, eviction, expiration and
//! observability; [`Cache`] and [`LoadingCache`] are the contracts the built
//! caches fulfil. The backing engine is a striped in-memory table: entries
//! hash to one of `concurrency_level` independently locked segments.
//!
//! ```rust
//! use sluice::cache::{Cache, CacheBuilder, LoadingCache};
//!
//! let cache = CacheBuilder::new()
//!     .maximum_size(1_000)
//!     .record_stats()
//!     .build_with(|key: &String| key.len());
//!
//! assert_eq!(5, cache.get("hello".to_string()).unwrap());
//! assert_eq!(1.0, cache.stats().miss_rate());
//! ```

mod builder;
mod local;
mod stats;

pub use builder::{CacheBuilder, Equivalence, Strength};
pub use local::{StripedCache, StripedLoadingCache};
pub use stats::{CacheStats, SimpleStatsCounter, StatsCounter};

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{BoxError, LoadError};

/// Computes values for a [`LoadingCache`].
///
/// Any `Fn(&K) -> V` closure is a loader; implement the trait directly when
/// loading can fail or when reloading an existing value should behave
/// differently from a cold load.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Computes the value for `key`.
    fn load(&self, key: &K) -> Result<V, BoxError>;

    /// Recomputes the value for `key` during a refresh. Defaults to
    /// [`load`](Self::load).
    fn reload(&self, key: &K, _old_value: &V) -> Result<V, BoxError> {
        self.load(key)
    }
}

impl<K, V, F> CacheLoader<K, V> for F
where
    F: Fn(&K) -> V + Send + Sync,
{
    fn load(&self, key: &K) -> Result<V, BoxError> {
        Ok(self(key))
    }
}

/// Computes the relative weight of one entry for weight-based eviction.
pub trait Weigher<K, V>: Send + Sync {
    fn weigh(&self, key: &K, value: &V) -> u32;
}

impl<K, V, F> Weigher<K, V> for F
where
    F: Fn(&K, &V) -> u32 + Send + Sync,
{
    fn weigh(&self, key: &K, value: &V) -> u32 {
        self(key, value)
    }
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// The caller removed it.
    Explicit,
    /// The caller replaced its value.
    Replaced,
    /// Its reference was reclaimed by the runtime.
    Collected,
    /// It outlived its expiry.
    Expired,
    /// It was evicted to honour the size or weight bound.
    Size,
}

impl RemovalCause {
    /// Whether the removal was automatic rather than requested.
    pub fn was_evicted(&self) -> bool {
        matches!(
            self,
            RemovalCause::Collected | RemovalCause::Expired | RemovalCause::Size
        )
    }
}

/// Notification of one removed entry, delivered to a removal listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalNotification<K, V> {
    key: K,
    value: V,
    cause: RemovalCause,
}

impl<K, V> RemovalNotification<K, V> {
    pub(crate) fn new(key: K, value: V, cause: RemovalCause) -> Self {
        Self { key, value, cause }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn cause(&self) -> RemovalCause {
        self.cause
    }

    pub fn was_evicted(&self) -> bool {
        self.cause.was_evicted()
    }

    pub fn into_parts(self) -> (K, V, RemovalCause) {
        (self.key, self.value, self.cause)
    }
}

/// Receives a notification for every entry removed from the cache, with the
/// reason for the removal.
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, notification: RemovalNotification<K, V>);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    F: Fn(RemovalNotification<K, V>) + Send + Sync,
{
    fn on_removal(&self, notification: RemovalNotification<K, V>) {
        self(notification);
    }
}

/// A semi-persistent mapping from keys to values.
///
/// Entries are added with [`put`](Self::put) or
/// [`get_with`](Self::get_with) and stay until evicted or invalidated.
/// Implementations are thread-safe.
pub trait Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// The value associated with `key`, or `None` when absent or expired.
    fn get_if_present(&self, key: &K) -> Option<V>;

    /// The value associated with `key`, computing it with `loader` on a
    /// miss. At most one load runs per key at a time; a failed load caches
    /// nothing.
    fn get_with(&self, key: K, loader: &dyn CacheLoader<K, V>) -> Result<V, LoadError>;

    /// Associates `value` with `key`, replacing any previous value.
    fn put(&self, key: K, value: V);

    /// Copies all of `entries` into the cache.
    fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        Self: Sized,
    {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// The present values of `keys`, omitting misses.
    fn get_all_present<I>(&self, keys: I) -> HashMap<K, V>
    where
        I: IntoIterator<Item = K>,
        Self: Sized,
    {
        let mut found = HashMap::new();
        for key in keys {
            if !found.contains_key(&key) {
                if let Some(value) = self.get_if_present(&key) {
                    found.insert(key, value);
                }
            }
        }
        found
    }

    /// Discards the entry for `key`, if any.
    fn invalidate(&self, key: &K);

    /// Discards the entries for `keys`.
    fn invalidate_many<'k, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'k K>,
        K: 'k,
        Self: Sized,
    {
        for key in keys {
            self.invalidate(key);
        }
    }

    /// Discards every entry.
    fn invalidate_all(&self);

    /// The approximate number of live entries.
    fn size(&self) -> u64;

    /// Sweeps expired entries now instead of waiting for reads to find them.
    fn cleanup(&self);

    /// A snapshot of this cache's statistics. All-zero unless
    /// [`record_stats`](CacheBuilder::record_stats) was set.
    fn stats(&self) -> CacheStats;
}

/// A [`Cache`] that loads values itself from the loader it was built with.
pub trait LoadingCache<K, V>: Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// The value for `key`, loading it on a miss.
    fn get(&self, key: K) -> Result<V, LoadError>;

    /// The values for `keys`, loading the missing ones.
    fn get_all<I>(&self, keys: I) -> Result<HashMap<K, V>, LoadError>
    where
        I: IntoIterator<Item = K>,
        Self: Sized,
    {
        let mut found = HashMap::new();
        for key in keys {
            if !found.contains_key(&key) {
                let value = self.get(key.clone())?;
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    /// Recomputes the value for `key` with the loader's
    /// [`reload`](CacheLoader::reload), replacing the cached value.
    fn refresh(&self, key: K);
}

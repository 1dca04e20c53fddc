use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::stats::StatsCounter;
use crate::cache::{
    Cache, CacheLoader, CacheStats, LoadingCache, RemovalCause, RemovalNotification,
    RemovalListener, Weigher,
};
use crate::clock::Clock;
use crate::error::LoadError;

pub(crate) struct CacheConfig<K: 'static, V: 'static> {
    pub(crate) initial_capacity: usize,
    pub(crate) segment_count: usize,
    pub(crate) max_segment_size: Option<u64>,
    pub(crate) max_segment_weight: Option<u64>,
    pub(crate) weigher: Option<Arc<dyn Weigher<K, V>>>,
    pub(crate) expire_after_write: Option<u64>,
    pub(crate) expire_after_access: Option<u64>,
    pub(crate) refresh_after_write: Option<u64>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    pub(crate) stats: Arc<dyn StatsCounter>,
}

struct Entry<V> {
    value: V,
    weight: u32,
    write_micros: u64,
    access_micros: u64,
}

struct Segment<K, V> {
    map: HashMap<K, Entry<V>>,
    total_weight: u64,
}

enum Lookup<V> {
    /// A live value; `stale` marks it past its refresh window.
    Live { value: V, stale: bool },
    Expired,
    Absent,
}

impl<K, V> Segment<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            total_weight: 0,
        }
    }
}

/// Striped in-memory cache built by
/// [`CacheBuilder::build`](crate::cache::CacheBuilder::build).
///
/// Entries hash to one of `concurrency_level` independently locked segments;
/// eviction bounds and the least-recently-accessed scan apply per segment.
/// Cloning shares the underlying storage.
pub struct StripedCache<K: 'static, V: 'static> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for StripedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<K: 'static, V: 'static> {
    segments: Box<[Mutex<Segment<K, V>>]>,
    config: CacheConfig<K, V>,
}

impl<K, V> StripedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(config: CacheConfig<K, V>) -> Self {
        let per_segment_capacity =
            (config.initial_capacity / config.segment_count.max(1)).max(1);
        let segments = (0..config.segment_count)
            .map(|_| Mutex::new(Segment::with_capacity(per_segment_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            inner: Arc::new(CacheInner { segments, config }),
        }
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn segment_for(&self, key: &K) -> &Mutex<Segment<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.segments.len() as u64) as usize;
        &self.segments[index]
    }

    fn weigh(&self, key: &K, value: &V) -> u32 {
        self.config
            .weigher
            .as_ref()
            .map_or(1, |weigher| weigher.weigh(key, value))
    }

    fn is_expired(&self, entry: &Entry<V>, now_micros: u64) -> bool {
        if let Some(ttl) = self.config.expire_after_write {
            if now_micros.saturating_sub(entry.write_micros) >= ttl {
                return true;
            }
        }
        if let Some(ttl) = self.config.expire_after_access {
            if now_micros.saturating_sub(entry.access_micros) >= ttl {
                return true;
            }
        }
        false
    }

    /// Delivers queued notifications after the segment lock is released and
    /// records evictions.
    fn deliver(&self, pending: Vec<RemovalNotification<K, V>>) {
        for notification in pending {
            if notification.was_evicted() {
                self.config.stats.record_eviction();
            }
            if let Some(listener) = &self.config.removal_listener {
                listener.on_removal(notification);
            }
        }
    }

    fn remove_entry(
        segment: &mut Segment<K, V>,
        key: &K,
        cause: RemovalCause,
        pending: &mut Vec<RemovalNotification<K, V>>,
    ) {
        if let Some((key, entry)) = segment.map.remove_entry(key) {
            segment.total_weight = segment.total_weight.saturating_sub(u64::from(entry.weight));
            pending.push(RemovalNotification::new(key, entry.value, cause));
        }
    }

    /// Evicts least-recently-accessed entries until the segment honours its
    /// size and weight bounds.
    fn evict_locked(
        &self,
        segment: &mut Segment<K, V>,
        pending: &mut Vec<RemovalNotification<K, V>>,
    ) {
        loop {
            let over_size = self
                .config
                .max_segment_size
                .is_some_and(|bound| segment.map.len() as u64 > bound);
            let over_weight = self
                .config
                .max_segment_weight
                .is_some_and(|bound| segment.total_weight > bound);
            if !over_size && !over_weight {
                return;
            }
            let coldest = segment
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.access_micros)
                .map(|(key, _)| key.clone());
            let Some(key) = coldest else { return };
            Self::remove_entry(segment, &key, RemovalCause::Size, pending);
        }
    }

    fn insert_locked(
        &self,
        segment: &mut Segment<K, V>,
        key: K,
        value: V,
        now_micros: u64,
        pending: &mut Vec<RemovalNotification<K, V>>,
    ) {
        let weight = self.weigh(&key, &value);
        let entry = Entry {
            value,
            weight,
            write_micros: now_micros,
            access_micros: now_micros,
        };
        if let Some(previous) = segment.map.insert(key.clone(), entry) {
            segment.total_weight = segment
                .total_weight
                .saturating_sub(u64::from(previous.weight));
            pending.push(RemovalNotification::new(
                key,
                previous.value,
                RemovalCause::Replaced,
            ));
        }
        segment.total_weight = segment.total_weight.saturating_add(u64::from(weight));
        self.evict_locked(segment, pending);
    }

    /// Outcome of looking one key up under the segment lock.
    fn lookup(
        &self,
        segment: &mut Segment<K, V>,
        key: &K,
        now_micros: u64,
    ) -> Lookup<V> {
        match segment.map.get_mut(key) {
            Some(entry) => {
                if self.is_expired(entry, now_micros) {
                    Lookup::Expired
                } else {
                    entry.access_micros = now_micros;
                    let stale = self.config.refresh_after_write.is_some_and(|window| {
                        now_micros.saturating_sub(entry.write_micros) >= window
                    });
                    Lookup::Live {
                        value: entry.value.clone(),
                        stale,
                    }
                }
            }
            None => Lookup::Absent,
        }
    }

    fn get_if_present(&self, key: &K) -> Option<V> {
        let now_micros = self.config.clock.now_micros();
        let mut pending = Vec::new();
        let found = {
            let mut segment = self.segment_for(key).lock();
            match self.lookup(&mut segment, key, now_micros) {
                Lookup::Live { value, .. } => Some(value),
                Lookup::Expired => {
                    Self::remove_entry(&mut segment, key, RemovalCause::Expired, &mut pending);
                    None
                }
                Lookup::Absent => None,
            }
        };
        self.deliver(pending);
        match &found {
            Some(_) => self.config.stats.record_hits(1),
            None => self.config.stats.record_misses(1),
        }
        found
    }

    fn put(&self, key: K, value: V) {
        let now_micros = self.config.clock.now_micros();
        let mut pending = Vec::new();
        {
            let mut segment = self.segment_for(&key).lock();
            self.insert_locked(&mut segment, key, value, now_micros, &mut pending);
        }
        self.deliver(pending);
    }

    /// Looks `key` up, loading it on a miss and refreshing it when the
    /// refresh window elapsed. The load runs under the segment lock, which
    /// keeps concurrent loads of one key down to a single run.
    fn get_or_load(
        &self,
        key: K,
        loader: &dyn CacheLoader<K, V>,
        refresh_eligible: bool,
    ) -> Result<V, LoadError> {
        let now_micros = self.config.clock.now_micros();
        let mut pending = Vec::new();
        let outcome = {
            let mut segment = self.segment_for(&key).lock();
            let lookup = self.lookup(&mut segment, &key, now_micros);
            if matches!(lookup, Lookup::Expired) {
                Self::remove_entry(&mut segment, &key, RemovalCause::Expired, &mut pending);
            }
            match lookup {
                Lookup::Live { value, stale } if !(stale && refresh_eligible) => {
                    self.config.stats.record_hits(1);
                    Ok(value)
                }
                Lookup::Live {
                    value: old_value, ..
                } => {
                    self.config.stats.record_hits(1);
                    // a failed reload keeps serving the old value
                    match self.run_loader(|| loader.reload(&key, &old_value)) {
                        Ok(new_value) => {
                            self.insert_locked(
                                &mut segment,
                                key,
                                new_value.clone(),
                                now_micros,
                                &mut pending,
                            );
                            Ok(new_value)
                        }
                        Err(_) => Ok(old_value),
                    }
                }
                Lookup::Expired | Lookup::Absent => {
                    self.config.stats.record_misses(1);
                    match self.run_loader(|| loader.load(&key)) {
                        Ok(value) => {
                            self.insert_locked(
                                &mut segment,
                                key,
                                value.clone(),
                                now_micros,
                                &mut pending,
                            );
                            Ok(value)
                        }
                        Err(cause) => Err(LoadError { cause }),
                    }
                }
            }
        };
        self.deliver(pending);
        outcome
    }

    fn run_loader(
        &self,
        load: impl FnOnce() -> Result<V, crate::error::BoxError>,
    ) -> Result<V, crate::error::BoxError> {
        let started = self.config.clock.now_micros();
        let result = load();
        let elapsed = self.config.clock.now_micros().saturating_sub(started);
        match &result {
            Ok(_) => self.config.stats.record_load_success(elapsed),
            Err(_) => self.config.stats.record_load_exception(elapsed),
        }
        result
    }

    fn refresh(&self, key: K, loader: &dyn CacheLoader<K, V>) {
        let now_micros = self.config.clock.now_micros();
        let mut pending = Vec::new();
        {
            let mut segment = self.segment_for(&key).lock();
            let old_value = segment
                .map
                .get(&key)
                .filter(|entry| !self.is_expired(entry, now_micros))
                .map(|entry| entry.value.clone());
            let reloaded = self.run_loader(|| match &old_value {
                Some(old) => loader.reload(&key, old),
                None => loader.load(&key),
            });
            if let Ok(value) = reloaded {
                self.insert_locked(&mut segment, key, value, now_micros, &mut pending);
            }
        }
        self.deliver(pending);
    }

    fn invalidate(&self, key: &K) {
        let mut pending = Vec::new();
        {
            let mut segment = self.segment_for(key).lock();
            Self::remove_entry(&mut segment, key, RemovalCause::Explicit, &mut pending);
        }
        self.deliver(pending);
    }

    fn invalidate_all(&self) {
        let mut pending = Vec::new();
        for segment in self.segments.iter() {
            let mut segment = segment.lock();
            segment.total_weight = 0;
            for (key, entry) in segment.map.drain() {
                pending.push(RemovalNotification::new(
                    key,
                    entry.value,
                    RemovalCause::Explicit,
                ));
            }
        }
        self.deliver(pending);
    }

    fn size(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.lock().map.len() as u64)
            .sum()
    }

    fn cleanup(&self) {
        let now_micros = self.config.clock.now_micros();
        let mut pending = Vec::new();
        for segment in self.segments.iter() {
            let mut segment = segment.lock();
            let expired: Vec<K> = segment
                .map
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now_micros))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                Self::remove_entry(&mut segment, &key, RemovalCause::Expired, &mut pending);
            }
        }
        self.deliver(pending);
    }
}

impl<K, V> Cache<K, V> for StripedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn get_if_present(&self, key: &K) -> Option<V> {
        self.inner.get_if_present(key)
    }

    fn get_with(&self, key: K, loader: &dyn CacheLoader<K, V>) -> Result<V, LoadError> {
        self.inner.get_or_load(key, loader, false)
    }

    fn put(&self, key: K, value: V) {
        self.inner.put(key, value);
    }

    fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn cleanup(&self) {
        self.inner.cleanup();
    }

    fn stats(&self) -> CacheStats {
        self.inner.config.stats.snapshot()
    }
}

/// Loading cache built by
/// [`CacheBuilder::build_with`](crate::cache::CacheBuilder::build_with):
/// a [`StripedCache`] bound to its loader.
pub struct StripedLoadingCache<K: 'static, V: 'static> {
    cache: StripedCache<K, V>,
    loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K, V> Clone for StripedLoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V> StripedLoadingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(config: CacheConfig<K, V>, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        Self {
            cache: StripedCache::new(config),
            loader,
        }
    }
}

impl<K, V> Cache<K, V> for StripedLoadingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn get_if_present(&self, key: &K) -> Option<V> {
        self.cache.get_if_present(key)
    }

    fn get_with(&self, key: K, loader: &dyn CacheLoader<K, V>) -> Result<V, LoadError> {
        self.cache.inner.get_or_load(key, loader, false)
    }

    fn put(&self, key: K, value: V) {
        self.cache.put(key, value);
    }

    fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }

    fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    fn size(&self) -> u64 {
        self.cache.size()
    }

    fn cleanup(&self) {
        self.cache.cleanup();
    }

    fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<K, V> LoadingCache<K, V> for StripedLoadingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn get(&self, key: K) -> Result<V, LoadError> {
        self.cache
            .inner
            .get_or_load(key, self.loader.as_ref(), true)
    }

    fn refresh(&self, key: K) {
        self.cache.inner.refresh(key, self.loader.as_ref());
    }
}

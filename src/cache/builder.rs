use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::local::{CacheConfig, StripedCache, StripedLoadingCache};
use crate::cache::stats::{NoopStatsCounter, SimpleStatsCounter, StatsCounter};
use crate::cache::{CacheLoader, RemovalListener, Weigher};
use crate::clock::{Clock, StdClock};

const DEFAULT_INITIAL_CAPACITY: usize = 16;
const DEFAULT_CONCURRENCY_LEVEL: usize = 4;

/// Reference strength for cached keys or values.
///
/// Weak and soft strengths are accepted as configuration hints: without a
/// tracing collector there is nothing to reclaim them, so the engine stores
/// every entry strongly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Strong,
    Weak,
    Soft,
}

/// Equality used for cached keys or values.
///
/// Strong references default to structural equality, weak and soft ones to
/// identity. The engine compares keys through their `Eq`/`Hash`
/// implementations; the configured equivalence is validated and retained as
/// a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equivalence {
    Equals,
    Identity,
}

/// Builder of manual and loading caches with any combination of capacity
/// pre-sizing, lock striping, size- or weight-based eviction, expiration,
/// refresh, removal notification and statistics.
///
/// Every option may be set at most once and validates its argument when set;
/// misuse panics, the same way an out-of-range argument to a standard
/// library constructor does.
///
/// ```rust
/// use std::time::Duration;
/// use sluice::cache::CacheBuilder;
///
/// let cache = CacheBuilder::new()
///     .maximum_size(10_000)
///     .expire_after_write(Duration::from_secs(600))
///     .build_with(|name: &String| format!("graph of {name}"));
/// # let _ = cache;
/// ```
pub struct CacheBuilder<K: 'static, V: 'static> {
    initial_capacity: Option<usize>,
    concurrency_level: Option<usize>,
    maximum_size: Option<u64>,
    maximum_weight: Option<u64>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    refresh_after_write: Option<Duration>,
    key_strength: Option<Strength>,
    value_strength: Option<Strength>,
    key_equivalence: Option<Equivalence>,
    value_equivalence: Option<Equivalence>,
    removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    record_stats: bool,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            initial_capacity: None,
            concurrency_level: None,
            maximum_size: None,
            maximum_weight: None,
            weigher: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            key_strength: None,
            value_strength: None,
            key_equivalence: None,
            value_equivalence: None,
            removal_listener: None,
            clock: None,
            record_stats: false,
        }
    }

    /// Pre-sizing hint for the hash tables. Defaults to 16.
    pub fn initial_capacity(mut self, initial_capacity: usize) -> Self {
        assert!(
            self.initial_capacity.is_none(),
            "initial capacity was already set to {}",
            self.initial_capacity.unwrap()
        );
        self.initial_capacity = Some(initial_capacity);
        self
    }

    /// Number of independently locked segments. Defaults to 4.
    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        assert!(
            self.concurrency_level.is_none(),
            "concurrency level was already set to {}",
            self.concurrency_level.unwrap()
        );
        assert!(concurrency_level > 0, "concurrency level must be positive");
        self.concurrency_level = Some(concurrency_level);
        self
    }

    /// Bounds the number of entries; the least recently accessed entries are
    /// evicted when the bound is exceeded. Mutually exclusive with
    /// [`maximum_weight`](Self::maximum_weight) and
    /// [`weigher`](Self::weigher).
    pub fn maximum_size(mut self, maximum_size: u64) -> Self {
        assert!(
            self.maximum_size.is_none(),
            "maximum size was already set to {}",
            self.maximum_size.unwrap()
        );
        assert!(
            self.maximum_weight.is_none(),
            "maximum size can not be combined with maximum weight"
        );
        assert!(
            self.weigher.is_none(),
            "maximum size can not be combined with weigher"
        );
        self.maximum_size = Some(maximum_size);
        self
    }

    /// Bounds the total weight of entries as computed by the
    /// [`weigher`](Self::weigher); the two must be configured together.
    pub fn maximum_weight(mut self, maximum_weight: u64) -> Self {
        assert!(
            self.maximum_weight.is_none(),
            "maximum weight was already set to {}",
            self.maximum_weight.unwrap()
        );
        assert!(
            self.maximum_size.is_none(),
            "maximum weight can not be combined with maximum size"
        );
        self.maximum_weight = Some(maximum_weight);
        self
    }

    /// The weigher used for weight-based eviction. Requires
    /// [`maximum_weight`](Self::maximum_weight) by build time.
    pub fn weigher(mut self, weigher: impl Weigher<K, V> + 'static) -> Self {
        assert!(self.weigher.is_none(), "weigher was already set");
        assert!(
            self.maximum_size.is_none(),
            "weigher can not be combined with maximum size"
        );
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Entries expire this long after their value was written.
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        assert!(
            self.expire_after_write.is_none(),
            "expire_after_write was already set to {:?}",
            self.expire_after_write.unwrap()
        );
        self.expire_after_write = Some(duration);
        self
    }

    /// Entries expire this long after they were last read or written.
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        assert!(
            self.expire_after_access.is_none(),
            "expire_after_access was already set to {:?}",
            self.expire_after_access.unwrap()
        );
        self.expire_after_access = Some(duration);
        self
    }

    /// Entries become eligible for reload this long after their value was
    /// written. Only a loading cache can honour this, so
    /// [`build`](Self::build) refuses it.
    pub fn refresh_after_write(mut self, duration: Duration) -> Self {
        assert!(
            self.refresh_after_write.is_none(),
            "refresh_after_write was already set to {:?}",
            self.refresh_after_write.unwrap()
        );
        assert!(
            duration > Duration::ZERO,
            "refresh duration must be positive"
        );
        self.refresh_after_write = Some(duration);
        self
    }

    /// Stores keys weakly. A reference-strength hint; see [`Strength`].
    pub fn weak_keys(self) -> Self {
        self.set_key_strength(Strength::Weak)
    }

    /// Stores values weakly. A reference-strength hint; see [`Strength`].
    pub fn weak_values(self) -> Self {
        self.set_value_strength(Strength::Weak)
    }

    /// Stores values softly. A reference-strength hint; see [`Strength`].
    pub fn soft_values(self) -> Self {
        self.set_value_strength(Strength::Soft)
    }

    fn set_key_strength(mut self, strength: Strength) -> Self {
        assert!(
            self.key_strength.is_none(),
            "key strength was already set to {:?}",
            self.key_strength.unwrap()
        );
        self.key_strength = Some(strength);
        self
    }

    fn set_value_strength(mut self, strength: Strength) -> Self {
        assert!(
            self.value_strength.is_none(),
            "value strength was already set to {:?}",
            self.value_strength.unwrap()
        );
        self.value_strength = Some(strength);
        self
    }

    /// Custom key equality. Defaults to structural equality for strong keys
    /// and identity for weak ones.
    pub fn key_equivalence(mut self, equivalence: Equivalence) -> Self {
        assert!(
            self.key_equivalence.is_none(),
            "key equivalence was already set to {:?}",
            self.key_equivalence.unwrap()
        );
        self.key_equivalence = Some(equivalence);
        self
    }

    /// Custom value equality. Defaults to structural equality for strong
    /// values and identity for weak and soft ones.
    pub fn value_equivalence(mut self, equivalence: Equivalence) -> Self {
        assert!(
            self.value_equivalence.is_none(),
            "value equivalence was already set to {:?}",
            self.value_equivalence.unwrap()
        );
        self.value_equivalence = Some(equivalence);
        self
    }

    /// The configured key equivalence, falling back to the key strength's
    /// default.
    pub fn effective_key_equivalence(&self) -> Equivalence {
        self.key_equivalence
            .unwrap_or_else(|| default_equivalence(self.key_strength))
    }

    /// The configured value equivalence, falling back to the value
    /// strength's default.
    pub fn effective_value_equivalence(&self) -> Equivalence {
        self.value_equivalence
            .unwrap_or_else(|| default_equivalence(self.value_strength))
    }

    /// Notifies `listener` of every removal, with its cause.
    pub fn removal_listener(mut self, listener: impl RemovalListener<K, V> + 'static) -> Self {
        assert!(
            self.removal_listener.is_none(),
            "removal listener was already set"
        );
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// The clock used for expiration and refresh. Defaults to the system
    /// clock; tests inject a [`ManualClock`](crate::ManualClock).
    pub fn ticker(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        assert!(self.clock.is_none(), "ticker was already set");
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Installs a counting statistics collector, exposed through
    /// [`Cache::stats`](crate::cache::Cache::stats).
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }

    fn check_weight_with_weigher(&self) {
        if self.weigher.is_none() {
            assert!(
                self.maximum_weight.is_none(),
                "maximum weight requires a weigher"
            );
        } else {
            assert!(
                self.maximum_weight.is_some(),
                "weigher requires a maximum weight"
            );
        }
    }

    fn into_config(self) -> CacheConfig<K, V> {
        let segment_count = self.concurrency_level.unwrap_or(DEFAULT_CONCURRENCY_LEVEL);
        let per_segment = |bound: Option<u64>| bound.map(|b| b.div_ceil(segment_count as u64));
        let stats: Arc<dyn StatsCounter> = if self.record_stats {
            Arc::new(SimpleStatsCounter::default())
        } else {
            Arc::new(NoopStatsCounter)
        };
        CacheConfig {
            initial_capacity: self.initial_capacity.unwrap_or(DEFAULT_INITIAL_CAPACITY),
            segment_count,
            max_segment_size: per_segment(self.maximum_size),
            max_segment_weight: per_segment(self.maximum_weight),
            weigher: self.weigher,
            expire_after_write: self.expire_after_write.map(|d| d.as_micros() as u64),
            expire_after_access: self.expire_after_access.map(|d| d.as_micros() as u64),
            refresh_after_write: self.refresh_after_write.map(|d| d.as_micros() as u64),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(StdClock::default())),
            removal_listener: self.removal_listener,
            stats,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a manual cache: entries enter only through
    /// [`put`](crate::cache::Cache::put) and
    /// [`get_with`](crate::cache::Cache::get_with).
    ///
    /// # Panics
    ///
    /// Panics if [`refresh_after_write`](Self::refresh_after_write) was set
    /// (refresh requires a loader) or if a weigher and maximum weight were
    /// not configured together.
    pub fn build(self) -> StripedCache<K, V> {
        self.check_weight_with_weigher();
        assert!(
            self.refresh_after_write.is_none(),
            "refresh_after_write requires a loading cache"
        );
        StripedCache::new(self.into_config())
    }

    /// Builds a loading cache around `loader`.
    ///
    /// # Panics
    ///
    /// Panics if a weigher and maximum weight were not configured together.
    pub fn build_with(self, loader: impl CacheLoader<K, V> + 'static) -> StripedLoadingCache<K, V> {
        self.check_weight_with_weigher();
        StripedLoadingCache::new(self.into_config(), Arc::new(loader))
    }
}

fn default_equivalence(strength: Option<Strength>) -> Equivalence {
    match strength.unwrap_or(Strength::Strong) {
        Strength::Strong => Equivalence::Equals,
        Strength::Weak | Strength::Soft => Equivalence::Identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;

    #[test]
    fn defaults_build_an_empty_cache() {
        let cache: StripedCache<String, u32> = CacheBuilder::new().build();
        assert_eq!(0, cache.size());
        assert_eq!(None, cache.get_if_present(&"missing".to_string()));
    }

    #[test]
    #[should_panic(expected = "initial capacity was already set")]
    fn initial_capacity_is_set_once() {
        let _ = CacheBuilder::<String, u32>::new()
            .initial_capacity(8)
            .initial_capacity(16);
    }

    #[test]
    #[should_panic(expected = "concurrency level must be positive")]
    fn concurrency_level_must_be_positive() {
        let _ = CacheBuilder::<String, u32>::new().concurrency_level(0);
    }

    #[test]
    #[should_panic(expected = "maximum size can not be combined with maximum weight")]
    fn size_and_weight_are_exclusive() {
        let _ = CacheBuilder::<String, u32>::new()
            .maximum_weight(100)
            .maximum_size(10);
    }

    #[test]
    #[should_panic(expected = "maximum size can not be combined with weigher")]
    fn size_and_weigher_are_exclusive() {
        let _ = CacheBuilder::<String, u32>::new()
            .weigher(|_key: &String, value: &u32| *value)
            .maximum_size(10);
    }

    #[test]
    #[should_panic(expected = "weigher requires a maximum weight")]
    fn weigher_without_weight_is_rejected_at_build() {
        let _ = CacheBuilder::new()
            .weigher(|_key: &String, value: &u32| *value)
            .build();
    }

    #[test]
    #[should_panic(expected = "maximum weight requires a weigher")]
    fn weight_without_weigher_is_rejected_at_build() {
        let _ = CacheBuilder::<String, u32>::new().maximum_weight(100).build();
    }

    #[test]
    #[should_panic(expected = "refresh_after_write requires a loading cache")]
    fn manual_build_refuses_refresh() {
        let _ = CacheBuilder::<String, u32>::new()
            .refresh_after_write(Duration::from_secs(1))
            .build();
    }

    #[test]
    #[should_panic(expected = "refresh duration must be positive")]
    fn zero_refresh_is_rejected() {
        let _ = CacheBuilder::<String, u32>::new().refresh_after_write(Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "ticker was already set")]
    fn ticker_is_set_once() {
        let _ = CacheBuilder::<String, u32>::new()
            .ticker(crate::ManualClock::default())
            .ticker(crate::ManualClock::default());
    }

    #[test]
    fn equivalence_defaults_follow_strength() {
        let strong = CacheBuilder::<String, u32>::new();
        assert_eq!(Equivalence::Equals, strong.effective_key_equivalence());
        assert_eq!(Equivalence::Equals, strong.effective_value_equivalence());
        let weak = CacheBuilder::<String, u32>::new().weak_keys().soft_values();
        assert_eq!(Equivalence::Identity, weak.effective_key_equivalence());
        assert_eq!(Equivalence::Identity, weak.effective_value_equivalence());
    }

    #[test]
    #[should_panic(expected = "key strength was already set")]
    fn key_strength_is_set_once() {
        let _ = CacheBuilder::<String, u32>::new().weak_keys().weak_keys();
    }

    #[test]
    fn strength_hints_do_not_change_storage() {
        let cache = CacheBuilder::new().weak_keys().weak_values().build();
        cache.put("k".to_string(), 1u32);
        assert_eq!(Some(1), cache.get_if_present(&"k".to_string()));
    }
}

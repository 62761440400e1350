//! Size- and age-bounded LRU cache.
//!
//! This is the leaf that keeps every workspace index from growing without
//! bound. Two limits apply:
//! - `max_size`: inserting a new key into a full cache first purges every
//!   expired entry, then evicts in strict least-recently-used order.
//! - `max_age`: an entry older than this is treated as absent. It is removed
//!   lazily when looked up, or eagerly by [`BoundedCache::force_cleanup`].
//!
//! There is deliberately no background timer per cache.

use crate::clock::SharedClock;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Limits for a [`BoundedCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_size: usize,
    /// Maximum age of an entry before it is treated as absent.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_age: Duration::from_secs(30 * 60),
        }
    }
}

/// A cached value plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When the value was last written.
    pub timestamp: Instant,
    /// How many times the value was read through `get`.
    pub access_count: u64,
    /// Insertion order of the key. Updates keep the original sequence.
    pub sequence: u64,
}

/// Point-in-time statistics for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// Approximation: `size / cumulative accesses`, or 0 with no accesses.
    pub hit_rate: f64,
    /// Entries past their TTL that haven't been purged yet.
    pub expired: usize,
}

/// LRU cache bounded by entry count and entry age.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    max_size: usize,
    max_age: Duration,
    clock: SharedClock,
    total_accesses: u64,
    next_sequence: u64,
}

impl<K: Hash + Eq + Clone, V> BoundedCache<K, V> {
    /// Creates an empty cache. A `max_size` of zero is treated as one.
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_size: config.max_size.max(1),
            max_age: config.max_age,
            clock,
            total_accesses: 0,
            next_sequence: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Physical number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when another new key would trigger eviction.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Changes the capacity, evicting least-recently-used entries if the
    /// cache is now over it.
    pub fn set_max_size(&mut self, max_size: usize) -> usize {
        self.max_size = max_size.max(1);
        let mut evicted = 0;
        while self.entries.len() > self.max_size {
            if self.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn expired_at(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.timestamp) > self.max_age
    }

    /// Looks up a value, refreshing its recency.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let expired = match self.entries.peek(key) {
            Some(entry) => self.expired_at(entry, now),
            None => return None,
        };
        if expired {
            self.entries.pop(key);
            return None;
        }

        self.total_accesses += 1;
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        Some(&entry.value)
    }

    /// Reads a value without touching recency, access counts or expiry.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.entries
            .peek(key)
            .filter(|entry| !self.expired_at(entry, now))
            .map(|entry| &entry.value)
    }

    /// Inserts or updates a value.
    ///
    /// Updating an existing key moves it to most-recently-used and never
    /// evicts. Inserting a new key into a full cache purges expired entries
    /// first, then evicts least-recently-used entries until there is room.
    /// Returns the number of entries removed to make room.
    pub fn set(&mut self, key: K, value: V) -> usize {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.timestamp = now;
            return 0;
        }

        let removed = if self.entries.len() >= self.max_size {
            self.make_room(now)
        } else {
            0
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.put(
            key,
            CacheEntry {
                value,
                timestamp: now,
                access_count: 0,
                sequence,
            },
        );
        removed
    }

    fn make_room(&mut self, now: Instant) -> usize {
        let mut removed = self.purge_expired(now);
        while self.entries.len() >= self.max_size {
            if self.entries.pop_lru().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Removes a key. Returns the value if it was present and not expired.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let entry = self.entries.pop(key)?;
        if self.expired_at(&entry, now) {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Membership test with the same expiry rule as `get`.
    ///
    /// Does not refresh recency.
    pub fn has<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let expired = match self.entries.peek(key) {
            Some(entry) => self.expired_at(entry, now),
            None => return false,
        };
        if expired {
            self.entries.pop(key);
            return false;
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Live entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries().map(|(key, entry)| (key, &entry.value))
    }

    /// Live entries with their bookkeeping, least recently used first.
    pub fn entries(&self) -> impl Iterator<Item = (&K, &CacheEntry<V>)> + '_ {
        let now = self.clock.now();
        self.entries
            .iter()
            .rev()
            .filter(move |(_, entry)| !self.expired_at(entry, now))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.entries().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.entries().map(|(_, entry)| &entry.value)
    }

    /// Live entries in insertion order.
    pub fn entries_by_insertion(&self) -> Vec<(&K, &CacheEntry<V>)> {
        let mut entries: Vec<_> = self.entries().collect();
        entries.sort_by_key(|(_, entry)| entry.sequence);
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let size = self.entries.len();
        let expired = self
            .entries
            .iter()
            .filter(|(_, entry)| self.expired_at(entry, now))
            .count();
        let hit_rate = if self.total_accesses == 0 {
            0.0
        } else {
            size as f64 / self.total_accesses as f64
        };

        CacheStats {
            size,
            max_size: self.max_size,
            hit_rate,
            expired,
        }
    }

    /// Eagerly purges every expired entry. Returns how many were removed.
    pub fn force_cleanup(&mut self) -> usize {
        let now = self.clock.now();
        self.purge_expired(now)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.expired_at(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    /// Rebuilds the cache keeping at most `keep` entries.
    ///
    /// Entries for which `preferred` returns true are kept first; the rest
    /// are filled in insertion order. Survivors keep their relative recency.
    /// Returns the number of discarded entries.
    pub fn shrink_to(&mut self, keep: usize, mut preferred: impl FnMut(&K, &V) -> bool) -> usize {
        if self.entries.len() <= keep {
            return 0;
        }

        let mut ranked: Vec<(bool, u64)> = self
            .entries
            .iter()
            .map(|(key, entry)| (preferred(key, &entry.value), entry.sequence))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let survivors: HashSet<u64> = ranked.iter().take(keep).map(|(_, seq)| *seq).collect();

        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(item) = self.entries.pop_lru() {
            drained.push(item);
        }

        let mut discarded = 0;
        for (key, entry) in drained {
            if survivors.contains(&entry.sequence) {
                self.entries.put(key, entry);
            } else {
                discarded += 1;
            }
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn cache_with(max_size: usize, max_age: Duration) -> (BoundedCache<&'static str, u32>, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let cache = BoundedCache::new(CacheConfig { max_size, max_age }, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let (mut cache, _clock) = cache_with(3, Duration::from_secs(60));
        cache.set("A", 1);
        cache.set("B", 2);
        cache.set("C", 3);

        assert_eq!(cache.get("A"), Some(&1));
        cache.set("D", 4);

        assert_eq!(cache.len(), 3);
        assert!(!cache.has("B"));
        let mut keys: Vec<_> = cache.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec!["A", "C", "D"]);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let (mut cache, _clock) = cache_with(5, Duration::from_secs(60));
        for i in 0..100u32 {
            let key: &'static str = Box::leak(format!("k{}", i).into_boxed_str());
            cache.set(key, i);
            assert!(cache.len() <= 5);
        }
        let keys: Vec<_> = cache.keys().copied().collect();
        assert_eq!(keys, vec!["k95", "k96", "k97", "k98", "k99"]);
    }

    #[test]
    fn test_update_refreshes_recency_without_evicting() {
        let (mut cache, _clock) = cache_with(2, Duration::from_secs(60));
        cache.set("A", 1);
        cache.set("B", 2);
        assert_eq!(cache.set("A", 10), 0);
        assert_eq!(cache.len(), 2);

        cache.set("C", 3);
        assert!(cache.has("A"));
        assert!(!cache.has("B"));
        assert_eq!(cache.get("A"), Some(&10));
    }

    #[test]
    fn test_expired_entries_are_absent() {
        let (mut cache, clock) = cache_with(10, Duration::from_secs(30));
        cache.set("A", 1);
        clock.advance(Duration::from_secs(31));

        assert_eq!(cache.stats().expired, 1);
        assert!(!cache.has("A"));
        assert_eq!(cache.len(), 0);

        cache.set("B", 2);
        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.get("B"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_exactly_at_max_age_is_live() {
        let (mut cache, clock) = cache_with(10, Duration::from_secs(30));
        cache.set("A", 1);
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get("A"), Some(&1));
    }

    #[test]
    fn test_full_cache_purges_expired_before_lru() {
        let (mut cache, clock) = cache_with(3, Duration::from_secs(30));
        cache.set("old", 1);
        clock.advance(Duration::from_secs(20));
        cache.set("B", 2);
        cache.set("C", 3);
        clock.advance(Duration::from_secs(15));

        assert_eq!(cache.set("D", 4), 1);
        assert!(cache.has("B"));
        assert!(cache.has("C"));
        assert!(cache.has("D"));
    }

    #[test]
    fn test_force_cleanup_counts_removed() {
        let (mut cache, clock) = cache_with(10, Duration::from_secs(30));
        cache.set("A", 1);
        cache.set("B", 2);
        clock.advance(Duration::from_secs(31));
        cache.set("C", 3);

        assert_eq!(cache.force_cleanup(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.force_cleanup(), 0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let (mut cache, _clock) = cache_with(10, Duration::from_secs(30));
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("A", 1);
        cache.set("B", 2);
        cache.get("A");
        cache.get("A");
        cache.get("B");
        cache.get("B");

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 10);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shrink_to_prefers_then_insertion_order() {
        let (mut cache, _clock) = cache_with(10, Duration::from_secs(30));
        for (key, value) in [("a", 1), ("b", 2), ("config", 3), ("c", 4), ("d", 5)] {
            cache.set(key, value);
        }

        let discarded = cache.shrink_to(3, |key, _| *key == "config");
        assert_eq!(discarded, 2);

        let mut keys: Vec<_> = cache.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "config"]);
    }

    #[test]
    fn test_set_max_size_evicts_down() {
        let (mut cache, _clock) = cache_with(10, Duration::from_secs(30));
        for key in ["a", "b", "c", "d"] {
            cache.set(key, 0);
        }
        assert_eq!(cache.set_max_size(2), 2);
        let keys: Vec<_> = cache.keys().copied().collect();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[test]
    fn test_entries_by_insertion_ignores_recency() {
        let (mut cache, _clock) = cache_with(10, Duration::from_secs(30));
        cache.set("first", 1);
        cache.set("second", 2);
        cache.get("first");

        let order: Vec<_> = cache
            .entries_by_insertion()
            .into_iter()
            .map(|(key, _)| *key)
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }
}

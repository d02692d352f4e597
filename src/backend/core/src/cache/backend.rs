//! Cache storage backends.
//!
//! The tiered cache owns freshness and single-flight; a backend only stores
//! entries and removes them on request. [`InMemoryBackend`] is the only
//! implementation shipped; a shared backend would implement the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::key::TtlClass;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored value with its freshness window.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized value
    pub data: Arc<[u8]>,
    pub ttl_class: TtlClass,
    pub stored_at: Instant,
    /// Served as a plain hit until this instant
    pub fresh_until: Instant,
    /// Served stale (with a refresh) until this instant, then dropped
    pub stale_until: Instant,
}

impl CacheEntry {
    pub fn new(data: Arc<[u8]>, ttl_class: TtlClass, now: Instant, ttl: Duration, grace: Duration) -> Self {
        Self {
            data,
            ttl_class,
            stored_at: now,
            fresh_until: now + ttl,
            stale_until: now + ttl + grace,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    /// Past TTL but inside the grace window.
    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.fresh_until && now < self.stale_until
    }

    /// Past the grace window; must not be served.
    pub fn is_dead(&self, now: Instant) -> bool {
        now >= self.stale_until
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub compute_failures: u64,
    pub invalidated: u64,
    pub entries: u64,
    pub evictions: u64,
    /// Fresh and stale hits over all lookups (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn calculate_hit_rate(&mut self) {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        self.hit_rate = if total > 0 {
            served as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get an entry. Dead entries are never returned.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key the regex matches. Returns the number removed.
    async fn delete_matching(&self, pattern: &Regex) -> Result<u64>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<u64>;

    async fn evictions(&self) -> Result<u64>;

    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Shard count for concurrent access (power of 2)
    pub shard_count: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            shard_count: 16,
        }
    }
}

/// Process-local backend on a sharded `DashMap`.
///
/// When full, dead entries are dropped first, then the oldest tenth by store time.
pub struct InMemoryBackend {
    entries: DashMap<String, CacheEntry>,
    config: InMemoryConfig,
    evictions: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            entries: DashMap::with_shard_amount(config.shard_count),
            config,
            evictions: AtomicU64::new(0),
        }
    }

    fn maybe_evict(&self) {
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_dead(now));
        let mut evicted = before - self.entries.len();

        if (self.entries.len() as u64) >= self.config.max_capacity {
            let to_evict = (self.config.max_capacity / 10).max(1) as usize;
            let mut by_age: Vec<(Instant, String)> = self
                .entries
                .iter()
                .map(|e| (e.value().stored_at, e.key().clone()))
                .collect();
            by_age.sort();
            for (_, key) in by_age.into_iter().take(to_evict) {
                if self.entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        counter!("waypoint_cache_evictions_total", "backend" => "in_memory").increment(evicted as u64);
        debug!(evicted, "Evicted cache entries");
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = Instant::now();
        let entry = match self.entries.get(key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        if entry.is_dead(now) {
            self.entries.remove_if(key, |_, e| e.is_dead(now));
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        if !self.entries.contains_key(key) {
            self.maybe_evict();
        }
        histogram!("waypoint_cache_entry_size_bytes", "backend" => "in_memory").record(entry.data.len() as f64);
        self.entries.insert(key.to_string(), entry);
        gauge!("waypoint_cache_entries", "backend" => "in_memory").set(self.entries.len() as f64);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &Regex) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.is_match(key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    async fn evictions(&self) -> Result<u64> {
        Ok(self.evictions.load(Ordering::Relaxed))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

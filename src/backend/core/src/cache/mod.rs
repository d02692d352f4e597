//! Tiered read-through cache.
//!
//! - **TTL classes**: short / medium / long freshness, each with a grace window
//! - **Stale-while-revalidate**: entries past TTL but inside grace are served
//!   while exactly one refresh runs
//! - **Single-flight**: concurrent misses on a key share one computation
//! - **Tenant-scoped keys**: [`CacheKey`] always namespaces by tenant
//! - **Invalidation**: glob patterns, plus the [`InvalidationBus`] that maps
//!   directory changes onto tenant patterns
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         TieredCache                            │
//! │   get_or_compute ──► backend.get ──► fresh ─────────► value    │
//! │                          │        └► stale ─► flight ► value   │
//! │                          └► miss ──► flight (awaited)          │
//! │                                        │                       │
//! │        in-flight map (one spawned task per key) ◄──────┘       │
//! │                                        │                       │
//! │   invalidate(pattern) ── gate + slots ─┴─► CacheBackend        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use waypoint_core::cache::{CacheConfig, CacheKey, TieredCache};
//!
//! let cache = TieredCache::new(CacheConfig::default());
//! let key = CacheKey::entitlement(&tenant_id);
//! let entitlement = cache
//!     .get_or_compute(&key, move || async move { resolver.resolve(&tenant_id).await })
//!     .await?;
//!
//! cache.invalidate_tenant(&tenant_id).await?;
//! ```

pub mod backend;
pub mod invalidation;
pub mod key;

pub use backend::{CacheBackend, CacheEntry, CacheStats, InMemoryBackend, InMemoryConfig};
pub use invalidation::{glob_to_regex, ChangeEvent, InvalidationBus};
pub use key::{CacheKey, KeyKind, TtlClass};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WaypointError};
use crate::rbac::TenantId;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// TTL and grace window per class, plus backend capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub short_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub medium_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub long_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub short_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub medium_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub long_grace: Duration,
    /// Maximum number of entries held by the in-memory backend
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: TtlClass::Short.default_ttl(),
            medium_ttl: TtlClass::Medium.default_ttl(),
            long_ttl: TtlClass::Long.default_ttl(),
            short_grace: TtlClass::Short.default_grace(),
            medium_grace: TtlClass::Medium.default_grace(),
            long_grace: TtlClass::Long.default_grace(),
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short_ttl,
            TtlClass::Medium => self.medium_ttl,
            TtlClass::Long => self.long_ttl,
        }
    }

    pub fn grace_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Short => self.short_grace,
            TtlClass::Medium => self.medium_grace,
            TtlClass::Long => self.long_grace,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tiered Cache
// ═══════════════════════════════════════════════════════════════════════════════

type FlightResult = std::result::Result<Arc<[u8]>, Arc<WaypointError>>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    compute_failures: AtomicU64,
    invalidated: AtomicU64,
}

struct Inner {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    /// At most one running computation per storage key. A result is stored
    /// only while its flight still owns the slot.
    inflight: DashMap<String, (u64, Flight)>,
    next_flight: AtomicU64,
    /// Held shared by result writes, exclusively by invalidation
    gate: RwLock<()>,
    counters: Counters,
}

/// Read-through cache with stale-while-revalidate and single-flight computes.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

impl TieredCache {
    /// Cache over an in-memory backend sized by `config.max_capacity`.
    pub fn new(config: CacheConfig) -> Self {
        let backend = Arc::new(InMemoryBackend::new(InMemoryConfig {
            max_capacity: config.max_capacity,
            ..Default::default()
        }));
        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                inflight: DashMap::new(),
                next_flight: AtomicU64::new(1),
                gate: RwLock::new(()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached value for `key`, computing it on a miss.
    ///
    /// The compute runs on its own task, shared by every concurrent caller of
    /// the same key; dropping a caller does not cancel it. Errors go to the
    /// callers waiting on that computation and are never cached.
    #[instrument(skip(self, compute), fields(key = %key))]
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let storage_key = key.build();
        let class = key.ttl_class();
        let now = Instant::now();

        let cached = match self.inner.backend.get(&storage_key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Cache backend read failed, computing");
                None
            }
        };

        match cached {
            Some(entry) if entry.is_fresh(now) => {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                counter!("waypoint_cache_requests_total", "outcome" => "hit", "ttl_class" => class.as_str())
                    .increment(1);
                debug!("Cache hit");
                decode(&entry.data)
            }
            Some(entry) => {
                self.inner.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                counter!("waypoint_cache_requests_total", "outcome" => "stale", "ttl_class" => class.as_str())
                    .increment(1);
                debug!("Serving stale entry, refreshing in background");
                // The refresh task runs whether or not anyone awaits it.
                let _refresh = self.start_flight(storage_key, class, compute);
                decode(&entry.data)
            }
            None => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                counter!("waypoint_cache_requests_total", "outcome" => "miss", "ttl_class" => class.as_str())
                    .increment(1);
                debug!("Cache miss");
                let data = self
                    .start_flight(storage_key, class, compute)
                    .await
                    .map_err(|e| e.duplicate())?;
                decode(&data)
            }
        }
    }

    /// Join the running computation for `storage_key`, or spawn one.
    fn start_flight<T, F, Fut>(&self, storage_key: String, class: TtlClass, compute: F) -> Flight
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.inner.inflight.entry(storage_key.clone()) {
            Entry::Occupied(running) => {
                debug!(key = %storage_key, "Joining in-flight computation");
                running.get().1.clone()
            }
            Entry::Vacant(slot) => {
                let flight_id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let inner = self.inner.clone();
                let task_key = storage_key.clone();

                let handle = tokio::spawn(async move {
                    let _guard = FlightGuard {
                        inner: inner.clone(),
                        key: task_key.clone(),
                        flight_id,
                    };
                    inner.run(&task_key, class, flight_id, compute).await
                });

                let flight = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(join_err) => Err(Arc::new(WaypointError::cache_compute(
                            storage_key,
                            format!("compute task aborted: {}", join_err),
                        ))),
                    }
                }
                .boxed()
                .shared();

                slot.insert((flight_id, flight.clone()));
                flight
            }
        }
    }

    /// Remove every entry whose storage key matches a glob pattern.
    ///
    /// Matching in-flight computations are detached, and nothing computed
    /// before this call is written back afterwards. Returns the number of
    /// entries removed.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, pattern: &str) -> Result<u64> {
        let regex = glob_to_regex(pattern)?;
        if !pattern.starts_with("tenant:") {
            warn!(pattern, "Invalidating with a pattern that is not tenant scoped");
        }

        let _gate = self.inner.gate.write().await;
        self.inner.inflight.retain(|key, _| !regex.is_match(key));
        let removed = self.inner.backend.delete_matching(&regex).await?;

        self.inner.counters.invalidated.fetch_add(removed, Ordering::Relaxed);
        counter!("waypoint_cache_invalidations_total").increment(1);
        info!(pattern, removed, "Cache entries invalidated");
        Ok(removed)
    }

    /// Drop everything cached for a tenant.
    pub async fn invalidate_tenant(&self, tenant: &TenantId) -> Result<u64> {
        self.invalidate(&CacheKey::tenant_pattern(tenant)).await
    }

    /// Drop one key.
    pub async fn invalidate_key(&self, key: &CacheKey) -> Result<bool> {
        let storage_key = key.build();
        let _gate = self.inner.gate.write().await;
        self.inner.inflight.remove(&storage_key);
        self.inner.backend.delete(&storage_key).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        info!("Clearing all cache entries");
        let _gate = self.inner.gate.write().await;
        self.inner.inflight.clear();
        self.inner.backend.clear().await
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let counters = &self.inner.counters;
        let mut stats = CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            computes: counters.computes.load(Ordering::Relaxed),
            compute_failures: counters.compute_failures.load(Ordering::Relaxed),
            invalidated: counters.invalidated.load(Ordering::Relaxed),
            entries: self.inner.backend.len().await?,
            evictions: self.inner.backend.evictions().await?,
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        Ok(stats)
    }
}

impl Inner {
    async fn run<T, F, Fut>(&self, key: &str, class: TtlClass, flight_id: u64, compute: F) -> FlightResult
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        counter!("waypoint_cache_computes_total", "ttl_class" => class.as_str()).increment(1);

        let encoded = compute()
            .await
            .and_then(|value| serde_json::to_vec(&value).map_err(WaypointError::from));

        match encoded {
            Ok(bytes) => {
                let data: Arc<[u8]> = Arc::from(bytes);
                self.store(key, &data, class, flight_id).await;
                Ok(data)
            }
            Err(err) => {
                self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                counter!("waypoint_cache_compute_failures_total", "ttl_class" => class.as_str()).increment(1);
                warn!(key, error = %err, "Cache compute failed, nothing stored");
                Err(Arc::new(err))
            }
        }
    }

    async fn store(&self, key: &str, data: &Arc<[u8]>, class: TtlClass, flight_id: u64) {
        let _gate = self.gate.read().await;
        // Invalidation removes matching slots under the write gate.
        let owns_slot = self.inflight.get(key).is_some_and(|slot| slot.0 == flight_id);
        if !owns_slot {
            debug!(key, "Invalidated during compute, result not stored");
            return;
        }
        let entry = CacheEntry::new(
            data.clone(),
            class,
            Instant::now(),
            self.config.ttl_for(class),
            self.config.grace_for(class),
        );
        if let Err(e) = self.backend.set(key, entry).await {
            warn!(key, error = %e, "Cache backend write failed");
        }
    }
}

/// Clears the in-flight slot when the compute task ends, panics included.
struct FlightGuard {
    inner: Arc<Inner>,
    key: String,
    flight_id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let flight_id = self.flight_id;
        self.inner
            .inflight
            .remove_if(&self.key, |_, (id, _)| *id == flight_id);
    }
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| {
        WaypointError::with_internal(
            crate::error::ErrorCode::DeserializationError,
            "Failed to read cached value",
            e.to_string(),
        )
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

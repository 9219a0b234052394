//! Query, schema and metadata caches with hit statistics.

mod ttl;

#[cfg(test)]
mod mod_test;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use ttl::TtlCache;

/// Cache sizes and default TTLs (seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub query_cache_size: usize,
    pub query_cache_ttl: u64,
    pub schema_cache_size: usize,
    pub schema_cache_ttl: u64,
    pub metadata_cache_size: usize,
    pub metadata_cache_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_cache_size: 1000,
            query_cache_ttl: 300,
            schema_cache_size: 100,
            schema_cache_ttl: 3600,
            metadata_cache_size: 500,
            metadata_cache_ttl: 1800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Query,
    Schema,
    Metadata,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheKind::Query => "query",
            CacheKind::Schema => "schema",
            CacheKind::Metadata => "metadata",
        })
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSizes {
    pub query: usize,
    pub schema: usize,
    pub metadata: usize,
}

/// Counters reported by the `cache_stats` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub query_hits: u64,
    pub query_misses: u64,
    pub schema_hits: u64,
    pub schema_misses: u64,
    pub metadata_hits: u64,
    pub metadata_misses: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_requests: u64,
    /// Percentage rounded to two decimals.
    pub hit_rate_percent: f64,
    pub cache_sizes: CacheSizes,
}

/// The three caches a server keeps, plus their counters.
pub struct CacheManager {
    query: TtlCache<Value>,
    schema: TtlCache<Value>,
    metadata: TtlCache<Value>,
    query_stats: Counters,
    schema_stats: Counters,
    metadata_stats: Counters,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            query: TtlCache::new(
                config.query_cache_size,
                Duration::from_secs(config.query_cache_ttl),
            ),
            schema: TtlCache::new(
                config.schema_cache_size,
                Duration::from_secs(config.schema_cache_ttl),
            ),
            metadata: TtlCache::new(
                config.metadata_cache_size,
                Duration::from_secs(config.metadata_cache_ttl),
            ),
            query_stats: Counters::default(),
            schema_stats: Counters::default(),
            metadata_stats: Counters::default(),
        }
    }

    fn parts(&self, kind: CacheKind) -> (&TtlCache<Value>, &Counters) {
        match kind {
            CacheKind::Query => (&self.query, &self.query_stats),
            CacheKind::Schema => (&self.schema, &self.schema_stats),
            CacheKind::Metadata => (&self.metadata, &self.metadata_stats),
        }
    }

    /// Look up a key, counting the hit or miss.
    pub fn get(&self, kind: CacheKind, key: &str) -> Option<Value> {
        let (cache, counters) = self.parts(kind);
        let value = cache.get(key);
        counters.record(value.is_some());
        value
    }

    /// Store a value; `ttl` falls back to the cache default.
    pub fn set(&self, kind: CacheKind, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let (cache, _) = self.parts(kind);
        match ttl {
            Some(ttl) => cache.insert_with_ttl(key, value, ttl),
            None => cache.insert(key, value),
        }
    }

    pub fn delete(&self, kind: CacheKind, key: &str) -> bool {
        self.parts(kind).0.remove(key)
    }

    /// Drop every entry of `kind` whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, kind: CacheKind, prefix: &str) -> usize {
        self.parts(kind).0.remove_where(|key| key.starts_with(prefix))
    }

    /// Clear one cache, or all of them.
    pub fn clear(&self, kind: Option<CacheKind>) {
        match kind {
            Some(kind) => self.parts(kind).0.clear(),
            None => {
                self.query.clear();
                self.schema.clear();
                self.metadata.clear();
            }
        }
    }

    pub fn reset_stats(&self) {
        self.query_stats.reset();
        self.schema_stats.reset();
        self.metadata_stats.reset();
    }

    pub fn stats(&self) -> CacheStats {
        let (query_hits, query_misses) = self.query_stats.snapshot();
        let (schema_hits, schema_misses) = self.schema_stats.snapshot();
        let (metadata_hits, metadata_misses) = self.metadata_stats.snapshot();
        let total_hits = query_hits + schema_hits + metadata_hits;
        let total_misses = query_misses + schema_misses + metadata_misses;
        let total_requests = total_hits + total_misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            total_hits as f64 / total_requests as f64 * 100.0
        };

        CacheStats {
            query_hits,
            query_misses,
            schema_hits,
            schema_misses,
            metadata_hits,
            metadata_misses,
            total_hits,
            total_misses,
            total_requests,
            hit_rate_percent: (hit_rate * 100.0).round() / 100.0,
            cache_sizes: CacheSizes {
                query: self.query.len(),
                schema: self.schema.len(),
                metadata: self.metadata.len(),
            },
        }
    }
}

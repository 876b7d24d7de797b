use metrics::counter;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::models::{Fingerprint, SearchSummary};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit, 0 to 100.
    pub hit_rate: f64,
}

/// Completed aggregates keyed by query fingerprint.
#[derive(Clone)]
pub struct SearchCache {
    cache: Cache<Fingerprint, Arc<SearchSummary>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl SearchCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl())
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<SearchSummary>> {
        let result = self.cache.get(fingerprint).await;
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("search_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("search_cache_misses_total").increment(1);
        }
        result
    }

    /// Stores a completed aggregate. Empty aggregates are not cached; returns
    /// whether the entry was stored.
    pub async fn set(&self, fingerprint: Fingerprint, summary: SearchSummary) -> bool {
        if summary.results.is_empty() {
            tracing::debug!(%fingerprint, "Not caching empty result set");
            return false;
        }

        self.cache.insert(fingerprint, Arc::new(summary)).await;
        true
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.cache.invalidate(fingerprint).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub async fn sweep(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.cache.entry_count(),
            hits,
            misses,
            hit_rate,
        }
    }

    /// Runs [`sweep`](Self::sweep) every `period` until the handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                cache.sweep().await;
                tracing::trace!(entries = cache.cache.entry_count(), "Cache sweep");
            }
        })
    }
}

//! Compiled-handler cache.
//!
//! Keys are `"{primitive_id}:{source_hash}"`. Invalidating a primitive
//! drops every compilation ever cached for it, whatever the hash. The
//! cache only saves compile work; a miss always recompiles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::future::Cache;
use tracing::{debug, warn};

use crate::compiler::{CompiledHandler, SandboxMode};

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hits={} misses={}", self.hits(), self.misses())
    }
}

/// Build the cache key for one compilation.
///
/// The mode is part of the key so flipping a primitive's `sandbox` flag
/// never serves a handler compiled for the other mode.
pub fn cache_key(primitive_id: &str, hash: &str, mode: SandboxMode) -> String {
    match mode {
        SandboxMode::Isolated => format!("{primitive_id}:{hash}"),
        SandboxMode::Trusted => format!("{primitive_id}:{hash}:trusted"),
    }
}

/// Concurrent cache of compiled handlers, shared by clone.
#[derive(Clone)]
pub struct HandlerCache {
    inner: Cache<String, Arc<CompiledHandler>>,
    stats: Arc<CacheStats>,
}

impl HandlerCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .support_invalidation_closures()
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CompiledHandler>> {
        match self.inner.get(key).await {
            Some(handler) => {
                self.stats.record_hit();
                debug!(key, "handler cache hit");
                Some(handler)
            }
            None => {
                self.stats.record_miss();
                debug!(key, "handler cache miss");
                None
            }
        }
    }

    pub async fn insert(&self, key: String, handler: Arc<CompiledHandler>) {
        self.inner.insert(key, handler).await;
    }

    /// Drop every cached compilation for `primitive_id`.
    pub fn invalidate_primitive(&self, primitive_id: &str) {
        let prefix = format!("{primitive_id}:");
        let result = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix));
        match result {
            Ok(_) => debug!(primitive_id, "handler cache invalidated"),
            Err(err) => {
                // Only possible if closures were not enabled at build time.
                warn!(primitive_id, %err, "prefix invalidation unavailable, clearing cache");
                self.inner.invalidate_all();
            }
        }
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate entry count; pending maintenance may lag.
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl fmt::Debug for HandlerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCache")
            .field("entries", &self.inner.entry_count())
            .field("stats", &self.stats)
            .finish()
    }
}

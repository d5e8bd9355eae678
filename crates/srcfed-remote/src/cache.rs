//! Remote response cache using moka
//!
//! Successful read responses are cached by `(remote, path, query)`. Concurrent
//! misses on one key are coalesced into a single fetch; different keys never
//! wait on each other.

use crate::config::CacheConfig;
use crate::deadline::Deadline;
use crate::error::RemoteError;
use bytes::Bytes;
use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Key of one cached response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub remote: String,
    pub path: String,
    /// Sorted query parameters
    pub query: Vec<(String, String)>,
}

impl CacheKey {
    /// Key with query parameters sorted
    #[must_use]
    pub fn new(remote: impl Into<String>, path: impl Into<String>, query: &[(String, String)]) -> Self {
        let mut query = query.to_vec();
        query.sort();
        Self {
            remote: remote.into(),
            path: path.into(),
            query,
        }
    }

    fn under(&self, remote: &str, prefix: &str) -> bool {
        self.remote == remote
            && self
                .path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Bounded, time-limited cache of remote response bodies
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: Cache<CacheKey, Bytes>,
    counters: Arc<Counters>,
}

impl ResponseCache {
    /// Create cache from configuration
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl())
                .support_invalidation_closures()
                .build(),
            counters: Arc::default(),
        }
    }

    /// Cached body for `key`, or the result of `fetch`
    ///
    /// Errors are returned to every coalesced caller and never cached. The
    /// deadline bounds this caller's wait, including time spent joined to a
    /// fetch another caller started.
    ///
    /// # Errors
    /// Returns the error produced by `fetch`, or [`RemoteError::Timeout`]
    pub async fn get_or_fetch<F>(
        &self,
        key: CacheKey,
        deadline: &Deadline,
        fetch: F,
    ) -> Result<Bytes, RemoteError>
    where
        F: Future<Output = Result<Bytes, RemoteError>>,
    {
        let fetched = AtomicBool::new(false);
        let result = deadline
            .run(&key.remote, async {
                self.inner
                    .try_get_with(key.clone(), async {
                        fetched.store(true, Ordering::Relaxed);
                        fetch.await
                    })
                    .await
                    .map_err(|e| (*e).clone())
            })
            .await;

        if fetched.load(Ordering::Relaxed) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(remote = %key.remote, path = %key.path, "remote cache miss");
        } else {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(remote = %key.remote, path = %key.path, "remote cache hit");
        }
        result
    }

    /// Drop every entry under `/source/{project}[/{package}]` and
    /// `/build/{project}` of `remote`
    ///
    /// The project listing and project metadata are dropped as well, since a
    /// package change can add or remove listing entries.
    pub fn invalidate_package(&self, remote: &str, project: &str, package: Option<&str>) {
        let listing = format!("/source/{project}");
        let meta = format!("{listing}/_meta");
        let source = match package {
            Some(package) => format!("{listing}/{package}"),
            None => listing.clone(),
        };
        let build = format!("/build/{project}");
        let remote = remote.to_string();
        let result = self.inner.invalidate_entries_if(move |key, _| {
            key.under(&remote, &source)
                || key.under(&remote, &build)
                || (key.remote == remote && (key.path == listing || key.path == meta))
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "selective invalidation failed, clearing cache");
            self.inner.invalidate_all();
        }
    }

    /// Drop every entry
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Whether `key` is currently cached
    #[must_use]
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.inner.get(key).await.is_some()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

//! TTL-governed response cache with conditional revalidation.
//!
//! Each entry owns a freshness timer: a spawned task that sleeps for
//! `max-age` seconds and then flips `stale` to `true`. Re-arming the timer
//! (on revalidation) aborts the previous task before spawning a new one, so
//! only the most recently armed deadline is ever observable - satisfying the
//! "fires exactly once per arming" invariant without a generation counter.

use crate::wire::Response;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }
}

/// A stored response plus the bookkeeping needed for staleness and metrics.
pub struct CacheEntry {
    pub response_bytes: Bytes,
    stale: AtomicBool,
    pub uncached_response_time: Duration,
    pub uncached_bandwidth: usize,
    timer: Mutex<Option<AbortHandle>>,
}

impl CacheEntry {
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<CacheKey, Arc<CacheEntry>>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if any. A missing key is simply `None`.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Inserts `response` under `key` unless it is uncacheable
    /// (`Cache-Control: no-store` or status 304), arming a freshness timer
    /// from its `max-age`. Returns whether the entry was stored.
    pub async fn insert(&self, key: CacheKey, response: &Response, elapsed: Duration) -> bool {
        if response.headers.has_no_store() || response.status == 304 {
            return false;
        }

        let response_bytes = response.to_bytes();
        let max_age = response.headers.max_age().unwrap_or(0);
        let entry = Arc::new(CacheEntry {
            uncached_bandwidth: response_bytes.len(),
            response_bytes,
            stale: AtomicBool::new(false),
            uncached_response_time: elapsed,
            timer: Mutex::new(None),
        });

        self.arm(&entry, key.clone(), max_age).await;
        self.entries.lock().await.insert(key, entry);
        true
    }

    /// Re-arms `key`'s freshness timer from a revalidation response's
    /// `Cache-Control` directives and clears `stale` back to `false`. A
    /// no-op if the key isn't present (the entry must have been evicted
    /// concurrently).
    pub async fn reset_timer(&self, key: &CacheKey, cache_control: &[String]) {
        let entry = match self.entries.lock().await.get(key).cloned() {
            Some(entry) => entry,
            None => return,
        };
        let max_age = cache_control
            .iter()
            .find_map(|d| d.strip_prefix("max-age=").and_then(|n| n.parse().ok()))
            .unwrap_or(0);
        self.arm(&entry, key.clone(), max_age).await;
        entry.stale.store(false, Ordering::Release);
    }

    async fn arm(&self, entry: &Arc<CacheEntry>, key: CacheKey, max_age_secs: u64) {
        let duration = Duration::from_secs(max_age_secs);
        let entry_for_task = entry.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            entry_for_task.stale.store(true, Ordering::Release);
            tracing::debug!(host = %key.host, path = %key.path, "cache entry stale");
        });

        let mut timer = entry.timer.lock().await;
        if let Some(old) = timer.take() {
            old.abort();
        }
        *timer = Some(join.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HeaderMap;

    fn response(status: u16, cache_control: Option<&str>, body: &str) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(cc) = cache_control {
            headers.insert("Cache-Control", cc);
        }
        headers.insert("Content-Length", body.len().to_string());
        Response {
            version: "HTTP/1.1".into(),
            status,
            reason: "OK".into(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn miss_then_hit_not_stale() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        assert!(cache.lookup(&key).await.is_none());

        let resp = response(200, Some("max-age=60"), "hi");
        assert!(cache.insert(key.clone(), &resp, Duration::from_millis(5)).await);

        let entry = cache.lookup(&key).await.unwrap();
        assert!(!entry.is_stale());
        assert_eq!(&entry.response_bytes[..], &resp.to_bytes()[..]);
    }

    #[tokio::test]
    async fn no_store_is_never_inserted() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        let resp = response(200, Some("no-store"), "hi");
        assert!(!cache.insert(key.clone(), &resp, Duration::from_millis(1)).await);
        assert!(cache.lookup(&key).await.is_none());
    }

    #[tokio::test]
    async fn status_304_is_never_inserted() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        let resp = response(304, Some("max-age=60"), "");
        assert!(!cache.insert(key.clone(), &resp, Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn max_age_zero_goes_stale_promptly() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        let resp = response(200, None, "hi");
        assert!(cache.insert(key.clone(), &resp, Duration::from_millis(1)).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let entry = cache.lookup(&key).await.unwrap();
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn revalidation_clears_stale_and_rearms() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        let resp = response(200, None, "hi");
        cache.insert(key.clone(), &resp, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.lookup(&key).await.unwrap().is_stale());

        cache
            .reset_timer(&key, &["max-age=60".to_string()])
            .await;
        let entry = cache.lookup(&key).await.unwrap();
        assert!(!entry.is_stale());
    }

    #[tokio::test]
    async fn reset_timer_cancels_prior_pending_fire() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("example.test", "/a");
        let resp = response(200, None, "hi");
        // Arms a near-immediate stale timer.
        cache.insert(key.clone(), &resp, Duration::from_millis(1)).await;
        // Immediately re-arm with a long max-age before the first timer fires.
        cache
            .reset_timer(&key, &["max-age=60".to_string()])
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let entry = cache.lookup(&key).await.unwrap();
        assert!(!entry.is_stale());
    }
}

//! Metrics registry: per-URL accumulators of time and bandwidth "saved" by
//! cache hits. Negative deltas are stored verbatim - they cancel out under
//! accumulation rather than being clamped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    time_saved_ns: Arc<Mutex<HashMap<String, i64>>>,
    bandwidth_saved_bytes: Arc<Mutex<HashMap<String, i64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the time and bandwidth saved by a cache hit on `url`:
    /// `uncached_response_time - elapsed_this_request` and
    /// `uncached_bandwidth - bytes_served_this_request`.
    pub async fn record_hit(
        &self,
        url: &str,
        uncached_response_time: Duration,
        elapsed_this_request: Duration,
        uncached_bandwidth: usize,
        bytes_served_this_request: usize,
    ) {
        let delta_time_ns =
            uncached_response_time.as_nanos() as i64 - elapsed_this_request.as_nanos() as i64;
        let delta_bytes = uncached_bandwidth as i64 - bytes_served_this_request as i64;

        *self
            .time_saved_ns
            .lock()
            .await
            .entry(url.to_string())
            .or_insert(0) += delta_time_ns;
        *self
            .bandwidth_saved_bytes
            .lock()
            .await
            .entry(url.to_string())
            .or_insert(0) += delta_bytes;
    }

    /// A human-readable snapshot for the operator REPL's `metrics` command.
    pub async fn snapshot(&self) -> String {
        let time_saved = self.time_saved_ns.lock().await;
        let bandwidth_saved = self.bandwidth_saved_bytes.lock().await;

        let mut out = String::from("metrics:\n   time saved:\n");
        for (url, ns) in time_saved.iter() {
            out.push_str(&format!("    - {url:?}: {}ns\n", ns));
        }
        out.push_str("   bandwidth saved:\n");
        for (url, bytes) in bandwidth_saved.iter() {
            out.push_str(&format!("    - {url:?}: {bytes} bytes\n"));
        }
        out.trim_end().to_string()
    }
}

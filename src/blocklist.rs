//! Block list: the set of host authorities the proxy refuses to serve.
//! Read on every request's hot path, written rarely by the operator REPL.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct BlockList {
    hosts: Arc<Mutex<HashSet<String>>>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match test against the request's `Host` header value.
    pub async fn contains(&self, host: &str) -> bool {
        self.hosts.lock().await.contains(host)
    }

    /// Adds `host`. Returns `true` if it was not already present.
    pub async fn insert(&self, host: &str) -> bool {
        self.hosts.lock().await.insert(host.to_string())
    }

    /// Removes `host`. Returns `true` if it was present.
    pub async fn remove(&self, host: &str) -> bool {
        self.hosts.lock().await.remove(host)
    }
}

//! A forward HTTP proxy with RFC 7234-flavored response caching, HTTPS
//! CONNECT tunneling, host block-listing, and saved-bandwidth/time metrics.

pub mod blocklist;
pub mod cache;
pub mod commandline;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod origin;
pub mod wire;

pub use blocklist::BlockList;
pub use cache::{CacheEntry, CacheKey, ResponseCache};
pub use error::ProxyError;
pub use handler::handle_connection;
pub use metrics::MetricsRegistry;

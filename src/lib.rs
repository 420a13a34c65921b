//! # freshcache
//!
//! An async read-through cache that serves stale values while refreshing them
//! in the background.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use freshcache::{Cache, CacheConfig, cache_get, fetch::HttpFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let origin = HttpFetcher::new("127.0.0.1:9000").path_prefix("/objects");
//!     let cache = Cache::new(origin, CacheConfig::from_file("cache.json")?)?;
//!
//!     let mut body = bytes::Bytes::new();
//!     if cache_get(&cache, &"logo.png".to_string(), &mut body).await {
//!         println!("{} bytes", body.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, CacheError, CacheStats, Freshness, Lookup, cache_get};
pub use config::{CacheConfig, ConfigError, RefreshConfig};
pub use fetch::{FetchError, Fetcher};

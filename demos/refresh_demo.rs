//! Watches entries move from fresh to stale to refreshed against an
//! in-process origin.
//!
//! ```text
//! RUST_LOG=freshcache=debug cargo run --example refresh_demo
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use freshcache::fetch::FetchError;
use freshcache::{Cache, CacheConfig, Lookup, RefreshConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Stands in for a slow remote service: every answer carries a new revision.
    let revision = Arc::new(AtomicU64::new(0));
    let origin = {
        let revision = Arc::clone(&revision);
        move |key: String| {
            let revision = Arc::clone(&revision);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if key == "unknown" {
                    return Err(FetchError::NotFound);
                }
                let rev = revision.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, FetchError>(format!("{key}@rev{rev}"))
            }
        }
    };

    let config = CacheConfig::default()
        .with_capacity(128)
        .with_fresh_ttl(Duration::from_millis(300))
        .with_stale_ttl(Duration::from_secs(2))
        .with_refresh(RefreshConfig {
            workers: 2,
            ..RefreshConfig::default()
        });
    let cache = Cache::new(origin, config)?;

    for round in 0..6 {
        for key in ["config", "unknown"] {
            let outcome = match cache.get(&key.to_string()).await? {
                Lookup::Fresh(v) => format!("fresh   {v}"),
                Lookup::Stale(v) => format!("stale   {v} (refresh queued)"),
                Lookup::Loaded(v) => format!("loaded  {v}"),
                Lookup::Absent => "absent".to_string(),
            };
            println!("round {round}: {key:<8} {outcome}");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    println!("{}", serde_json::to_string_pretty(&cache.queue_stats())?);
    cache.shutdown().await;
    Ok(())
}

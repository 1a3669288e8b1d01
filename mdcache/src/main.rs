//! Runs the market data cache against the configured feed.
//!
//! Configure with `MDCACHE_ENDPOINT`, `MDCACHE_SECRET` and friends; set
//! `RUST_LOG=info` to see the periodic summary.

use anyhow::Context;
use mdcache::{CacheConfig, MarketDataCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CacheConfig::from_env().context("invalid configuration")?;
    tracing::info!("Starting market data cache: {:?}", config);

    let cache = MarketDataCache::new(config)?;
    cache.start()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        () = cache.finished() => {
            tracing::warn!("Feed stopped on its own");
        }
    }

    cache.stop().await?;
    let stats = cache.statistics();
    tracing::info!(
        "Processed {} events across {} instruments ({} reconnects)",
        stats.events_received,
        stats.instruments,
        stats.reconnects
    );
    Ok(())
}

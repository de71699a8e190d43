//! EXPIREMAP Demo Binary
//!
//! Fills a map on a schedule and reports what gets evicted and expired.

use anyhow::Context;
use clap::Parser;
use expiremap::{ExpiringMap, MapConfig, StrategyKind};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// EXPIREMAP Demo - self-expiring ordered map
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Maximum number of entries (unlimited when omitted)
    #[arg(long)]
    capacity: Option<usize>,

    /// Age in milliseconds after which the sweep removes an entry
    #[arg(long)]
    expire_after_ms: Option<u64>,

    /// Sweep interval in milliseconds (enables the periodic sweep)
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Per-entry TTL in milliseconds, used when no sweep is configured
    #[arg(long, default_value_t = 250)]
    ttl_ms: u64,

    /// Number of keys to insert
    #[arg(long, default_value_t = 20)]
    keys: usize,

    /// Delay between inserts in milliseconds
    #[arg(long, default_value_t = 25)]
    insert_every_ms: u64,

    /// Total run time in milliseconds
    #[arg(long, default_value_t = 1500)]
    run_ms: u64,
}

/// Time the insert schedule takes: `keys` inserts, `step` apart
fn insert_span(step: Duration, keys: usize) -> anyhow::Result<Duration> {
    let keys = u32::try_from(keys).context("too many keys for the insert schedule")?;
    step.checked_mul(keys).context("insert schedule overflows")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("expiremap=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = MapConfig::new().with_on_expire(|key: &String, value: &usize| {
        info!(key = %key, value = value, "Entry expired");
    });
    if let Some(capacity) = args.capacity {
        config = config.with_capacity_limit(capacity);
    }
    if let Some(ms) = args.expire_after_ms {
        config = config.with_expire_after(Duration::from_millis(ms));
    }
    if let Some(ms) = args.sweep_interval_ms {
        config = config.with_sweep_interval(Duration::from_millis(ms));
    }

    let map = ExpiringMap::new(config)?;
    info!(strategy = ?map.strategy(), "Starting EXPIREMAP demo with {} keys", args.keys);

    let ttl = Duration::from_millis(args.ttl_ms);
    let step = Duration::from_millis(args.insert_every_ms);
    let elapsed = insert_span(step, args.keys)?;
    for i in 0..args.keys {
        let key = format!("key-{}", i);
        if map.strategy() == StrategyKind::PerEntryTimer {
            map.insert_with_ttl(key, i, ttl);
        } else {
            map.insert(key, i);
        }
        sleep(step).await;
    }

    let remaining = Duration::from_millis(args.run_ms).saturating_sub(elapsed);
    sleep(remaining).await;

    info!(
        "Surviving keys: {:?}",
        map.keys()
    );
    info!("{}", map.metrics().summary());

    Ok(())
}

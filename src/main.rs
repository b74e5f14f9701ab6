//! Provider update entrypoint.
//! Syncs configured providers into the store, then polls every due provider
//! once (cron style) or forever when `PULSE_LOOP_SECS` is set.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_aggregator::config::{load_providers_default, loop_secs_default, state_path_default};
use pulse_aggregator::registry::sync_from_config;
use pulse_aggregator::scheduler::spawn_poll_loop;
use pulse_aggregator::{MemoryStore, PollContext, Scheduler, Sources, Store};

/// Compact logs by default; `PULSE_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pulse_aggregator=info,update_providers=info,warn"));
    let json = std::env::var("PULSE_LOG_JSON").ok().is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let state_path = state_path_default();
    let store: Arc<dyn Store> = Arc::new(
        MemoryStore::open(&state_path).with_context(|| format!("opening store at {}", state_path.display()))?,
    );
    let sources = Sources::http().context("building http client")?;

    let configs = load_providers_default()?;
    let ctx = PollContext::system();
    let synced = sync_from_config(&ctx, store.as_ref(), &sources, &configs)
        .await
        .context("syncing providers from config")?;
    for (slug, e) in &synced.failed {
        tracing::warn!(provider = %slug, error = %e, "provider not synced");
    }

    let scheduler = Arc::new(Scheduler::new(store, sources));
    match loop_secs_default() {
        Some(secs) => {
            tracing::info!(interval_secs = secs, "polling until interrupted");
            let handle = spawn_poll_loop(Arc::clone(&scheduler), PollContext::system, secs);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
                res = handle => res.context("poll loop stopped")?,
            }
        }
        None => {
            scheduler.run_cycle(&ctx).await.context("running poll cycle")?;
        }
    }
    Ok(())
}

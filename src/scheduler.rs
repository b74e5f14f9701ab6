//! Poll scheduler and per-provider rate limiter.
//!
//! - A provider is due once `update_frequency` minutes have elapsed since its
//!   last successful poll; earlier calls are skips that touch nothing.
//! - The gate check, fetch and commit for one provider run under that
//!   provider's async lock, so concurrent pollers cannot both pass the gate.
//! - A failing provider never stops the cycle.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::aggregator;
use crate::context::PollContext;
use crate::error::{PulseError, Result};
use crate::ingest::{self, transport::Sources};
use crate::model::{BlipSetId, ProviderId};
use crate::provider::Provider;
use crate::registry;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not due yet; nothing was fetched or written.
    Skipped { next_due: DateTime<Utc> },
    /// Fetched, nothing new; `last_update` advanced.
    NoNewData,
    Committed { blip_set: BlipSetId, count: usize },
}

/// Earliest time the provider may be polled again.
pub fn next_due(provider: &Provider) -> DateTime<Utc> {
    provider
        .last_update
        .checked_add_signed(ChronoDuration::minutes(i64::from(provider.update_frequency)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn is_due(provider: &Provider, now: DateTime<Utc>) -> bool {
    now >= next_due(provider)
}

#[derive(Debug)]
pub struct ProviderReport {
    pub slug: String,
    pub outcome: std::result::Result<PollOutcome, PulseError>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub providers: Vec<ProviderReport>,
}

impl CycleReport {
    pub fn committed(&self) -> usize {
        self.count(|o| matches!(o, Ok(PollOutcome::Committed { .. })))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Ok(PollOutcome::Skipped { .. })))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| o.is_err())
    }

    fn count<F: Fn(&std::result::Result<PollOutcome, PulseError>) -> bool>(&self, f: F) -> usize {
        self.providers.iter().filter(|r| f(&r.outcome)).count()
    }
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    sources: Sources,
    locks: Mutex<HashMap<ProviderId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, sources: Sources) -> Self {
        Self {
            store,
            sources,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn lock_for(&self, id: ProviderId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(map.entry(id).or_default())
    }

    /// Poll one provider if it is due.
    pub async fn update(&self, ctx: &PollContext, id: ProviderId) -> Result<PollOutcome> {
        ingest::ensure_metrics_described();
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let provider = self
            .store
            .get_provider(id)
            .await?
            .ok_or_else(|| PulseError::NotFound(id.to_string()))?;
        let span = ctx.provider_span(&provider.slug, provider.kind.label());

        let res = self.update_locked(ctx, &provider).instrument(span.clone()).await;
        if let Err(e) = &res {
            counter!("pulse_provider_errors_total").increment(1);
            span.in_scope(|| {
                tracing::warn!(
                    run_id = ctx.run_id(),
                    provider = %provider.slug,
                    kind = e.kind(),
                    error = %e,
                    "provider poll aborted; last_update unchanged"
                )
            });
        }
        res
    }

    async fn update_locked(&self, ctx: &PollContext, provider: &Provider) -> Result<PollOutcome> {
        let now = ctx.now();
        if !is_due(provider, now) {
            counter!("pulse_poll_skipped_total").increment(1);
            let next = next_due(provider);
            tracing::debug!(
                run_id = ctx.run_id(),
                provider = %provider.slug,
                next_due = %next,
                "not due; skipping"
            );
            return Ok(PollOutcome::Skipped { next_due: next });
        }

        counter!("pulse_polls_total").increment(1);
        let events = ingest::fetch_new_events(ctx, &self.sources, provider).await?;
        let count = events.len();
        match aggregator::commit_poll(ctx, self.store.as_ref(), provider, events).await? {
            Some(blip_set) => Ok(PollOutcome::Committed { blip_set, count }),
            None => Ok(PollOutcome::NoNewData),
        }
    }

    /// Snapshot and remove a provider without racing an in-flight poll of it.
    pub async fn delete_provider(&self, id: ProviderId) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        registry::delete_provider(self.store.as_ref(), id).await?;
        if let Ok(mut map) = self.locks.lock() {
            map.remove(&id);
        }
        Ok(())
    }

    /// Poll every registered provider in turn.
    pub async fn run_cycle(&self, ctx: &PollContext) -> Result<CycleReport> {
        let providers = self.store.list_providers().await?;
        let mut report = CycleReport::default();
        for p in providers {
            let outcome = self.update(ctx, p.id).await;
            report.providers.push(ProviderReport { slug: p.slug, outcome });
        }
        finish_cycle(ctx, &report);
        Ok(report)
    }

    /// Poll every registered provider in its own task.
    pub async fn run_cycle_concurrent(self: &Arc<Self>, ctx: &PollContext) -> Result<CycleReport> {
        let providers = self.store.list_providers().await?;
        let mut set = JoinSet::new();
        for p in providers {
            let this = Arc::clone(self);
            let ctx = ctx.clone();
            set.spawn(async move {
                let outcome = this.update(&ctx, p.id).await;
                ProviderReport { slug: p.slug, outcome }
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => report.providers.push(r),
                Err(e) => tracing::warn!(error = ?e, "provider poll task failed"),
            }
        }
        report.providers.sort_by(|a, b| a.slug.cmp(&b.slug));
        finish_cycle(ctx, &report);
        Ok(report)
    }
}

fn finish_cycle(ctx: &PollContext, report: &CycleReport) {
    gauge!("pulse_cycle_last_run_ts").set(ctx.now().timestamp() as f64);
    ctx.span().in_scope(|| {
        tracing::info!(
            run_id = ctx.run_id(),
            providers = report.providers.len(),
            committed = report.committed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "poll cycle finished"
        )
    });
}

/// Run a poll cycle every `interval_secs`, forever.
pub fn spawn_poll_loop(scheduler: Arc<Scheduler>, ctx_factory: fn() -> PollContext, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let ctx = ctx_factory();
            if let Err(e) = scheduler.run_cycle(&ctx).await {
                tracing::warn!(error = %e, "poll cycle could not list providers");
            }
        }
    })
}

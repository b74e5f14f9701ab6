//! Per-run observability context and clock.
//!
//! A [`PollContext`] is created by whoever starts a poll run and passed down
//! explicitly; nothing in the crate logs through ambient module state.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Span;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = t;
    }

    pub fn advance(&self, d: chrono::Duration) {
        let mut g = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *g += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

static RUN_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct PollContext {
    run_id: u64,
    span: Span,
    clock: Arc<dyn Clock>,
}

impl PollContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let run_id = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("poll_run", run_id);
        Self { run_id, span, clock }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Child span for one provider within this run.
    pub fn provider_span(&self, slug: &str, kind: &str) -> Span {
        tracing::debug_span!(parent: &self.span, "provider", slug, kind)
    }
}

impl std::fmt::Debug for PollContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollContext").field("run_id", &self.run_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_moves_only_on_request() {
        let t0 = Utc.with_ymd_and_hms(2012, 5, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let ctx = PollContext::new(clock.clone());
        assert_eq!(ctx.now(), t0);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(ctx.now(), t0 + chrono::Duration::minutes(5));
    }

    #[test]
    fn run_ids_are_unique() {
        let a = PollContext::system();
        let b = PollContext::system();
        assert_ne!(a.run_id(), b.run_id());
    }
}

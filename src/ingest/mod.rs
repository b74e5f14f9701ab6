// src/ingest/mod.rs
pub mod providers;
pub mod transport;
pub mod types;

use crate::context::PollContext;
use crate::error::{PulseError, Result};
use crate::ingest::providers::{
    changelog::ChangeLogSource,
    documents::RevisionSource,
    feed::{FeedSource, FeedVariant},
};
use crate::ingest::transport::Sources;
use crate::ingest::types::EventSource;
use crate::model::NewBlip;
use crate::provider::{Provider, ProviderKind};
use metrics::{describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pulse_polls_total", "Provider polls that passed the rate-limit gate.");
        describe_counter!(
            "pulse_poll_skipped_total",
            "Provider polls skipped because update_frequency had not elapsed."
        );
        describe_counter!(
            "pulse_provider_errors_total",
            "Provider polls aborted by a fetch, parse or commit error."
        );
        describe_counter!("pulse_blips_committed_total", "Blips committed into blip sets.");
        describe_counter!("pulse_blip_sets_total", "Blip sets created by polls.");
        describe_histogram!("pulse_fetch_ms", "Adapter fetch+parse time in milliseconds.");
        describe_gauge!("pulse_cycle_last_run_ts", "Unix ts when a poll cycle last ran.");
    });
}

/// Decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("valid tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("valid whitespace regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Titles are plain text: decode entities and collapse whitespace only.
pub fn normalize_title(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Sources {
    /// Adapter for a provider's kind.
    pub fn source_for(&self, provider: &Provider) -> Result<Box<dyn EventSource>> {
        if let Some(variant) = FeedVariant::for_kind(&provider.kind) {
            let url = provider
                .kind
                .feed_url()
                .ok_or_else(|| PulseError::Config(format!("{} has no feed url", provider.slug)))?;
            if url.trim().is_empty() {
                return Err(PulseError::Config(format!("{} has an empty feed url", provider.slug)));
            }
            return Ok(Box::new(FeedSource::new(url, &provider.name, variant, self.feeds.clone())));
        }
        match &provider.kind {
            ProviderKind::FileSystemChange { path } => {
                if path.trim().is_empty() {
                    return Err(PulseError::Config(format!("{} has an empty log path", provider.slug)));
                }
                Ok(Box::new(ChangeLogSource::new(path, &provider.name)))
            }
            ProviderKind::DocumentRevision { api_base, account, token } => {
                let token = token.clone().ok_or_else(|| {
                    PulseError::Config(format!("{} has no stored token; register a password first", provider.slug))
                })?;
                Ok(Box::new(RevisionSource::new(
                    self.documents.service_for(api_base),
                    account,
                    token,
                    &provider.name,
                )))
            }
            _ => Err(PulseError::Config(format!(
                "no adapter for {} kind {}",
                provider.slug,
                provider.kind.label()
            ))),
        }
    }
}

/// Fetch everything newer than `provider.last_update`. No store access.
pub async fn fetch_new_events(ctx: &PollContext, sources: &Sources, provider: &Provider) -> Result<Vec<NewBlip>> {
    ensure_metrics_described();
    let source = sources.source_for(provider)?;
    let since = provider.last_update;

    let t0 = std::time::Instant::now();
    let mut events = source.fetch_new_events(since).await?;
    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("pulse_fetch_ms").record(ms);

    let before = events.len();
    events.retain(|e| e.timestamp > since);
    if events.len() != before {
        tracing::warn!(
            run_id = ctx.run_id(),
            provider = %provider.slug,
            dropped = before - events.len(),
            "adapter returned events at or before last_update"
        );
    }
    Ok(events)
}

//! Provider registration, config sync and snapshot-on-delete.

use crate::config::{KindConfig, ProviderConfig};
use crate::context::PollContext;
use crate::error::{PulseError, Result};
use crate::ingest::providers::{documents::exchange_secret, feed::fetch_feed_title};
use crate::ingest::transport::Sources;
use crate::model::ProviderId;
use crate::provider::{NewProvider, Provider, ProviderKind, Token};
use crate::store::Store;

/// Display name for a provider registered without one: the feed's own title
/// for feed kinds (the URL when the feed cannot be read), the slug otherwise.
pub async fn derive_name(ctx: &PollContext, sources: &Sources, slug: &str, kind: &ProviderKind) -> String {
    let Some(url) = kind.feed_url() else {
        return slug.to_string();
    };
    match fetch_feed_title(&sources.feeds, url).await {
        Ok(Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
        Ok(_) => url.to_string(),
        Err(e) => {
            tracing::warn!(run_id = ctx.run_id(), provider = slug, error = %e, "feed title unavailable; naming provider by url");
            url.to_string()
        }
    }
}

pub async fn register_provider(
    ctx: &PollContext,
    store: &dyn Store,
    sources: &Sources,
    mut new: NewProvider,
) -> Result<Provider> {
    new.slug = new.slug.trim().to_string();
    if new.slug.is_empty() {
        return Err(PulseError::Invalid("provider needs a slug".into()));
    }
    if new.name.trim().is_empty() {
        new.name = derive_name(ctx, sources, &new.slug, &new.kind).await;
    }
    let p = store.insert_provider(new).await?;
    tracing::info!(run_id = ctx.run_id(), provider = %p.slug, kind = p.kind.label(), name = %p.name, "provider registered");
    Ok(p)
}

/// Freeze every attached set's current summary, then remove the provider.
/// Views render the same text before and after.
pub async fn delete_provider(store: &dyn Store, id: ProviderId) -> Result<()> {
    let (provider, frozen) = store.delete_provider(id).await?;
    tracing::info!(provider = %provider.slug, frozen_sets = frozen, "provider deleted");
    Ok(())
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub registered: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<(String, PulseError)>,
}

/// Register new config entries and refresh the settings of known ones.
/// `last_update` and stored tokens survive a refresh.
pub async fn sync_from_config(
    ctx: &PollContext,
    store: &dyn Store,
    sources: &Sources,
    configs: &[ProviderConfig],
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for cfg in configs {
        let slug = cfg.slug.trim().to_string();
        match sync_one(ctx, store, sources, cfg).await {
            Ok(true) => report.registered.push(slug),
            Ok(false) => report.updated.push(slug),
            // Store failures are not per-provider.
            Err(e @ (PulseError::Store(_) | PulseError::Io(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(run_id = ctx.run_id(), provider = %slug, error = %e, "provider config skipped");
                report.failed.push((slug, e));
            }
        }
    }
    tracing::info!(
        run_id = ctx.run_id(),
        registered = report.registered.len(),
        updated = report.updated.len(),
        failed = report.failed.len(),
        "provider config synced"
    );
    Ok(report)
}

/// `Ok(true)` when a new provider was registered.
async fn sync_one(ctx: &PollContext, store: &dyn Store, sources: &Sources, cfg: &ProviderConfig) -> Result<bool> {
    let existing = store.provider_by_slug(cfg.slug.trim()).await?;
    let stored_token = existing.as_ref().and_then(|p| match &p.kind {
        ProviderKind::DocumentRevision { token, .. } => token.clone(),
        _ => None,
    });
    let token = resolve_token(ctx, sources, cfg, stored_token).await?;
    let new = cfg.to_new_provider(token);

    match existing {
        None => {
            register_provider(ctx, store, sources, new).await?;
            Ok(true)
        }
        Some(mut p) => {
            if !new.name.is_empty() {
                p.name = new.name;
            }
            p.update_frequency = new.update_frequency;
            p.summary_format = new.summary_format;
            p.tags = new.tags;
            p.kind = new.kind;
            store.update_provider(&p).await?;
            Ok(false)
        }
    }
}

/// A configured password is only exchanged when no token is stored yet.
async fn resolve_token(
    ctx: &PollContext,
    sources: &Sources,
    cfg: &ProviderConfig,
    stored: Option<Token>,
) -> Result<Option<Token>> {
    let KindConfig::DocumentRevision { api_base, account, .. } = &cfg.kind else {
        return Ok(None);
    };
    if stored.is_some() {
        if cfg.kind.password().is_some() {
            tracing::warn!(provider = %cfg.slug, "token already stored; remove the plaintext password from config");
        }
        return Ok(stored);
    }
    let Some(password) = cfg.kind.password() else {
        return Ok(None);
    };
    tracing::warn!(
        run_id = ctx.run_id(),
        provider = %cfg.slug,
        "exchanging plaintext password from config; remove it once the token is stored"
    );
    let service = sources.documents.service_for(api_base);
    let token = exchange_secret(service.as_ref(), account, password.to_string()).await?;
    Ok(Some(token))
}

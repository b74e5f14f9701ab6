//! Groups one poll's events into a single blip set and commits it.

use metrics::counter;

use crate::context::PollContext;
use crate::error::Result;
use crate::model::{BlipSetId, NewBlip};
use crate::provider::Provider;
use crate::store::{PollCommit, Store};

/// Commit the outcome of a poll that completed its fetch.
///
/// With events: one blip set timestamped at the newest event, every event
/// attached, the provider's tags copied onto the set, `last_update` moved to
/// now. Without events: no set, but `last_update` still advances since the
/// poll itself succeeded. The store applies all of it as one unit.
pub async fn commit_poll(
    ctx: &PollContext,
    store: &dyn Store,
    provider: &Provider,
    events: Vec<NewBlip>,
) -> Result<Option<BlipSetId>> {
    let count = events.len();
    let commit = PollCommit {
        provider: provider.id,
        expected_last_update: provider.last_update,
        polled_at: ctx.now(),
        events,
    };
    let created = store.commit_poll(commit).await?;

    match created {
        Some(id) => {
            counter!("pulse_blip_sets_total").increment(1);
            counter!("pulse_blips_committed_total").increment(count as u64);
            tracing::info!(
                run_id = ctx.run_id(),
                provider = %provider.slug,
                blip_set = %id,
                count,
                "blip set committed"
            );
        }
        None => {
            tracing::debug!(run_id = ctx.run_id(), provider = %provider.slug, "no new events");
        }
    }
    Ok(created)
}

//! Manually authored "what I'm up to" posts.

use crate::context::PollContext;
use crate::error::{PulseError, Result};
use crate::model::{BlipDetail, BlipSetId, NewBlip};
use crate::store::Store;
use crate::tags::extract_tags;

pub const MANUAL_TITLE: &str = "What I'm up to";

/// Store a single-blip set for a manual post. Hashtags in `text` become the
/// blip's tags; the set carries a fixed summary and no provider.
pub async fn post_status(ctx: &PollContext, store: &dyn Store, who: &str, text: &str) -> Result<BlipSetId> {
    let who = who.trim();
    let text = text.trim();
    if who.is_empty() {
        return Err(PulseError::Invalid("post needs an author".into()));
    }
    if text.is_empty() {
        return Err(PulseError::Invalid("post needs some text".into()));
    }

    let mut blip = NewBlip::new("", MANUAL_TITLE, ctx.now());
    blip.summary = Some(text.to_string());
    blip.who = Some(who.to_string());
    blip.tags = extract_tags(text);
    blip.detail = BlipDetail::Manual;

    let id = store.insert_manual(blip, format!("Manual update from {who}")).await?;
    tracing::info!(run_id = ctx.run_id(), blip_set = %id, who, "manual post stored");
    Ok(id)
}

//! # Event model
//!
//! A [`Blip`] is one discovered activity item; a [`BlipSet`] groups the blips
//! found by one poll of one provider (or a single manual post).
//!
//! A blip set is attributed either to a live provider, in which case its
//! summary is rendered on demand from the provider's `summary_format`, or it
//! carries a frozen summary captured when the provider was deleted. The two
//! states are a closed enum so a set can never hold both or neither.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tag labels. Ordered so rendering and comparisons are stable.
pub type TagSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlipSetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlipId(pub u64);

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}

impl std::fmt::Display for BlipSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blipset#{}", self.0)
    }
}

/// Kind-specific payload of a blip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlipDetail {
    /// Entry of a syndication feed (any feed variant).
    FeedEntry,
    /// Line (or MOVED_FROM/MOVED_TO pair) of a filesystem change log.
    FileChange { path: String, is_dir: bool },
    /// One revision of a document in a document store.
    Revision { document_id: String },
    /// Manually authored "what I'm up to" post.
    Manual,
}

/// An event produced by a source adapter, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlip {
    pub source_url: String,
    pub title: String,
    pub summary: Option<String>,
    pub who: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: TagSet,
    pub detail: BlipDetail,
}

impl NewBlip {
    pub fn new(source_url: impl Into<String>, title: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
            summary: None,
            who: None,
            timestamp,
            tags: TagSet::new(),
            detail: BlipDetail::FeedEntry,
        }
    }
}

/// A committed blip. Immutable except for tag additions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blip {
    pub id: BlipId,
    pub blip_set: Option<BlipSetId>,
    pub source_url: String,
    pub title: String,
    pub summary: Option<String>,
    pub who: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub tags: TagSet,
    pub detail: BlipDetail,
}

impl Blip {
    pub fn from_new(id: BlipId, blip_set: BlipSetId, nb: NewBlip) -> Self {
        Self {
            id,
            blip_set: Some(blip_set),
            source_url: nb.source_url,
            title: nb.title,
            summary: nb.summary,
            who: nb.who,
            timestamp: nb.timestamp,
            tags: nb.tags,
            detail: nb.detail,
        }
    }
}

/// Who a blip set belongs to, and therefore where its summary comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Attribution {
    /// Summary is rendered on demand from the provider's live state.
    Live { provider: ProviderId },
    /// Provider gone (or never existed); summary is a permanent snapshot.
    Frozen { summary: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlipSet {
    pub id: BlipSetId,
    /// Newest constituent blip's timestamp, not the poll time.
    pub timestamp: DateTime<Utc>,
    pub tags: TagSet,
    pub attribution: Attribution,
}

impl BlipSet {
    pub fn provider(&self) -> Option<ProviderId> {
        match &self.attribution {
            Attribution::Live { provider } => Some(*provider),
            Attribution::Frozen { .. } => None,
        }
    }

    pub fn frozen_summary(&self) -> Option<&str> {
        match &self.attribution {
            Attribution::Live { .. } => None,
            Attribution::Frozen { summary } => Some(summary.as_str()),
        }
    }
}

/// Newest-first ordering used by every listing.
pub fn sort_newest_first<T, F>(items: &mut [T], ts: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by(|a, b| ts(b).cmp(&ts(a)));
}

/// Maximum timestamp over a batch of events; `None` for an empty batch.
pub fn newest_timestamp(events: &[NewBlip]) -> Option<DateTime<Utc>> {
    events.iter().map(|e| e.timestamp).max()
}

//! Provider records: one per polled source, closed over the supported kinds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ProviderId, TagSet};

pub const DEFAULT_UPDATE_FREQUENCY_MINS: u32 = 30;
pub const DEFAULT_SUMMARY_FORMAT: &str = "{count} new items from {source}";

/// `last_update` of a provider that has never been polled.
pub fn never_updated() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Durable bearer token. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub String);

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(len={})", self.0.len())
    }
}

/// Source kind plus its kind-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    /// Plain syndication feed.
    Rss { url: String },
    /// Photo/media feed; summary is the entry's long-form description.
    Media { url: String },
    /// Build-server feed; entry summaries are dropped.
    BuildSystem { url: String },
    /// Forum feed whose titles read `<forum>: <excerpt>...: <poster>`.
    Forum { url: String },
    /// Feed whose categories become tags and author becomes `who`.
    Timeline { url: String },
    /// Pipe-delimited filesystem change log on local disk.
    #[serde(rename = "filesystem_change")]
    FileSystemChange { path: String },
    /// Revision history of every document in a remote document store.
    DocumentRevision {
        api_base: String,
        account: String,
        #[serde(default)]
        token: Option<Token>,
    },
}

impl ProviderKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Rss { .. } => "rss",
            ProviderKind::Media { .. } => "media",
            ProviderKind::BuildSystem { .. } => "build_system",
            ProviderKind::Forum { .. } => "forum",
            ProviderKind::Timeline { .. } => "timeline",
            ProviderKind::FileSystemChange { .. } => "filesystem_change",
            ProviderKind::DocumentRevision { .. } => "document_revision",
        }
    }

    /// Feed URL for the feed-backed kinds.
    pub fn feed_url(&self) -> Option<&str> {
        match self {
            ProviderKind::Rss { url }
            | ProviderKind::Media { url }
            | ProviderKind::BuildSystem { url }
            | ProviderKind::Forum { url }
            | ProviderKind::Timeline { url } => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    /// Stable key used to match configuration entries to stored providers.
    pub slug: String,
    pub name: String,
    /// Minimum minutes between polls.
    pub update_frequency: u32,
    pub last_update: DateTime<Utc>,
    pub summary_format: String,
    pub tags: TagSet,
    pub kind: ProviderKind,
}

/// A provider before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProvider {
    pub slug: String,
    /// Empty means "derive from the source" for feed-backed kinds.
    pub name: String,
    pub update_frequency: u32,
    pub summary_format: String,
    pub tags: TagSet,
    pub kind: ProviderKind,
}

impl NewProvider {
    pub fn new(slug: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            slug: slug.into(),
            name: String::new(),
            update_frequency: DEFAULT_UPDATE_FREQUENCY_MINS,
            summary_format: DEFAULT_SUMMARY_FORMAT.to_string(),
            tags: TagSet::new(),
            kind,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn every(mut self, minutes: u32) -> Self {
        self.update_frequency = minutes;
        self
    }

    pub fn tagged<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_summary_format(mut self, fmt: impl Into<String>) -> Self {
        self.summary_format = fmt.into();
        self
    }

    pub fn into_provider(self, id: ProviderId) -> Provider {
        Provider {
            id,
            slug: self.slug,
            name: self.name,
            update_frequency: self.update_frequency,
            last_update: never_updated(),
            summary_format: self.summary_format,
            tags: self.tags,
            kind: self.kind,
        }
    }
}

impl Provider {
    /// Render the human summary of a blip set holding `count` blips.
    ///
    /// Recognized placeholders are `{count}` and `{source}`; anything else is
    /// left as typed.
    pub fn render_summary(&self, count: usize) -> String {
        render_summary_format(&self.summary_format, count, &self.name)
    }
}

pub fn render_summary_format(format: &str, count: usize, source: &str) -> String {
    format
        .replace("{count}", &count.to_string())
        .replace("{source}", source)
}

// src/ingest/providers/feed.rs
//! Syndication feeds (RSS 2.0 and Atom) and their per-kind post-processing.
//!
//! Documents are read with a pull parser keyed on qualified element names,
//! since real feeds mix `description` with `media:description` and `link`
//! with `atom:link` inside one item.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::error::{PulseError, Result};
use crate::ingest::transport::FeedTransport;
use crate::ingest::types::EventSource;
use crate::ingest::{normalize_text, normalize_title};
use crate::model::{BlipDetail, NewBlip};
use crate::provider::ProviderKind;

/// Format-independent view of a parsed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDoc {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// Short summary (RSS `description`, Atom `summary`).
    pub summary: Option<String>,
    /// Long-form body (RSS `media:description`/`content:encoded`, Atom `content`).
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub author: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn to_chrono(odt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// RFC 2822 (`pubDate`) with a chrono fallback for zone spellings `time` rejects.
pub fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(to_chrono)
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339).ok().and_then(to_chrono)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFormat {
    Rss,
    Atom,
}

impl FeedFormat {
    fn from_root(e: &BytesStart<'_>) -> Result<Self> {
        match e.local_name().as_ref() {
            b"rss" => Ok(FeedFormat::Rss),
            b"feed" => Ok(FeedFormat::Atom),
            other => Err(malformed(format!(
                "unsupported feed root <{}>",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Element holding one entry.
    fn entry_element(self) -> &'static str {
        match self {
            FeedFormat::Rss => "item",
            FeedFormat::Atom => "entry",
        }
    }

    /// Parent of the feed-level `<title>`.
    fn title_parent(self) -> &'static str {
        match self {
            FeedFormat::Rss => "channel",
            FeedFormat::Atom => "feed",
        }
    }
}

/// Entry fields as found, keyed by qualified element name. Prefixed
/// extension elements (`media:description`, `dc:creator`, `atom:link`) never
/// land in the plain field of the same local name.
#[derive(Debug, Default)]
struct RawEntry {
    title: Option<String>,
    link: Option<String>,
    atom_links: Vec<(String, Option<String>)>,
    pub_date: Option<String>,
    dc_date: Option<String>,
    updated: Option<String>,
    published: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    media_description: Option<String>,
    categories: Vec<String>,
    author: Option<String>,
    creator: Option<String>,
}

fn set_once(slot: &mut Option<String>, text: String) {
    if slot.is_none() {
        *slot = non_empty(Some(text));
    }
}

impl RawEntry {
    fn assign(&mut self, format: FeedFormat, name: &str, parent: &str, text: String) {
        match name {
            "media:description" => return set_once(&mut self.media_description, text),
            "content:encoded" => return set_once(&mut self.content, text),
            "dc:creator" => return set_once(&mut self.creator, text),
            "dc:date" => return set_once(&mut self.dc_date, text),
            "name" if format == FeedFormat::Atom && parent == "author" => return set_once(&mut self.author, text),
            _ => {}
        }
        if parent != format.entry_element() {
            return;
        }
        match (format, name) {
            (_, "title") => set_once(&mut self.title, text),
            (FeedFormat::Rss, "link") => set_once(&mut self.link, text),
            (FeedFormat::Rss, "pubDate") => set_once(&mut self.pub_date, text),
            (FeedFormat::Rss, "description") | (FeedFormat::Atom, "summary") => set_once(&mut self.summary, text),
            (FeedFormat::Rss, "category") => {
                if let Some(c) = non_empty(Some(text)) {
                    self.categories.push(c);
                }
            }
            (FeedFormat::Rss, "author") => set_once(&mut self.author, text),
            (FeedFormat::Atom, "updated") => set_once(&mut self.updated, text),
            (FeedFormat::Atom, "published") => set_once(&mut self.published, text),
            (FeedFormat::Atom, "content") => set_once(&mut self.content, text),
            _ => {}
        }
    }

    /// Attribute-carried Atom fields: `<link href rel>` and `<category term>`.
    fn attributes(&mut self, format: FeedFormat, name: &str, parent: &str, e: &BytesStart<'_>) {
        if format != FeedFormat::Atom || parent != format.entry_element() {
            return;
        }
        match name {
            "link" => {
                if let Some(href) = attr(e, b"href") {
                    self.atom_links.push((href, attr(e, b"rel")));
                }
            }
            "category" => {
                if let Some(term) = non_empty(attr(e, b"term")) {
                    self.categories.push(term);
                }
            }
            _ => {}
        }
    }

    fn into_entry(self, format: FeedFormat) -> FeedEntry {
        let link = match format {
            FeedFormat::Rss => self.link.unwrap_or_default(),
            FeedFormat::Atom => self
                .atom_links
                .iter()
                .find(|(_, rel)| rel.as_deref().map_or(true, |r| r == "alternate"))
                .or_else(|| self.atom_links.first())
                .map(|(href, _)| href.trim().to_string())
                .unwrap_or_default(),
        };
        let updated = match format {
            FeedFormat::Rss => self
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .or_else(|| self.dc_date.as_deref().and_then(parse_rfc3339)),
            FeedFormat::Atom => self
                .updated
                .as_deref()
                .and_then(parse_rfc3339)
                .or_else(|| self.published.as_deref().and_then(parse_rfc3339)),
        };
        FeedEntry {
            title: self.title.as_deref().map(normalize_title).unwrap_or_default(),
            link,
            summary: self.summary,
            description: self.media_description.or(self.content),
            categories: self.categories,
            author: self.creator.or(self.author),
            updated,
        }
    }
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Element names whose text is collected.
fn collects_text(format: FeedFormat, name: &str, in_entry: bool) -> bool {
    if !in_entry {
        return name == "title";
    }
    match name {
        "title" | "media:description" | "content:encoded" | "dc:creator" | "dc:date" => true,
        "link" | "pubDate" | "description" | "category" | "author" => format == FeedFormat::Rss,
        "updated" | "published" | "summary" | "content" | "name" => format == FeedFormat::Atom,
        _ => false,
    }
}

struct Capture {
    depth: usize,
    name: String,
    parent: String,
    buf: String,
}

fn malformed(reason: impl Into<String>) -> PulseError {
    PulseError::Malformed {
        line: 0,
        reason: reason.into(),
    }
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_feed(xml: &str) -> Result<FeedDoc> {
    let xml = scrub_html_entities_for_xml(xml);
    let mut reader = Reader::from_str(&xml);

    let mut format: Option<FeedFormat> = None;
    let mut stack: Vec<String> = Vec::new();
    let mut title: Option<String> = None;
    let mut current: Option<(usize, RawEntry)> = None;
    let mut capture: Option<Capture> = None;
    let mut entries = Vec::new();

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => {
                return Err(malformed(format!(
                    "feed is not XML (byte {}): {e}",
                    reader.buffer_position()
                )))
            }
        };
        match event {
            Event::Start(e) => {
                let fmt = match format {
                    Some(f) => f,
                    None => *format.insert(FeedFormat::from_root(&e)?),
                };
                let name = qualified_name(&e);
                let parent = stack.last().cloned().unwrap_or_default();
                stack.push(name.clone());
                if capture.is_some() {
                    continue;
                }
                if current.is_none() && name == fmt.entry_element() {
                    current = Some((stack.len(), RawEntry::default()));
                    continue;
                }
                if let Some((_, entry)) = current.as_mut() {
                    entry.attributes(fmt, &name, &parent, &e);
                }
                let wanted = match current {
                    Some(_) => collects_text(fmt, &name, true),
                    None => title.is_none() && parent == fmt.title_parent() && collects_text(fmt, &name, false),
                };
                if wanted {
                    capture = Some(Capture {
                        depth: stack.len(),
                        name,
                        parent,
                        buf: String::new(),
                    });
                }
            }
            Event::Empty(e) => {
                let fmt = match format {
                    Some(f) => f,
                    None => *format.insert(FeedFormat::from_root(&e)?),
                };
                if capture.is_none() {
                    if let Some((_, entry)) = current.as_mut() {
                        let parent = stack.last().map(String::as_str).unwrap_or_default();
                        entry.attributes(fmt, &qualified_name(&e), parent, &e);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(c) = capture.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| malformed(format!("bad text in <{}>: {e}", c.name)))?;
                    c.buf.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(c) = capture.as_mut() {
                    c.buf.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(_) => {
                let depth = stack.len();
                stack.pop();
                let Some(fmt) = format else { continue };
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(c) = capture.take() {
                        match current.as_mut() {
                            Some((_, entry)) => entry.assign(fmt, &c.name, &c.parent, c.buf),
                            None => title = non_empty(Some(c.buf)),
                        }
                    }
                } else if capture.is_none() && current.as_ref().is_some_and(|(d, _)| *d == depth) {
                    if let Some((_, entry)) = current.take() {
                        entries.push(entry.into_entry(fmt));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if format.is_none() {
        return Err(malformed("empty feed document"));
    }
    Ok(FeedDoc {
        title: title.map(|t| normalize_title(&t)),
        entries,
    })
}

/// HTML named entities that are not valid XML; feeds embed them anyway.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Per-kind treatment of a feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedVariant {
    Generic,
    Media,
    BuildSystem,
    Forum,
    Timeline,
}

impl FeedVariant {
    pub fn for_kind(kind: &ProviderKind) -> Option<Self> {
        match kind {
            ProviderKind::Rss { .. } => Some(FeedVariant::Generic),
            ProviderKind::Media { .. } => Some(FeedVariant::Media),
            ProviderKind::BuildSystem { .. } => Some(FeedVariant::BuildSystem),
            ProviderKind::Forum { .. } => Some(FeedVariant::Forum),
            ProviderKind::Timeline { .. } => Some(FeedVariant::Timeline),
            _ => None,
        }
    }

    /// Turn one entry into a blip. `provider_name` is used by the forum title.
    pub fn to_blip(self, entry: FeedEntry, timestamp: DateTime<Utc>, provider_name: &str) -> Result<NewBlip> {
        let mut blip = NewBlip::new(entry.link, entry.title, timestamp);
        blip.detail = BlipDetail::FeedEntry;
        match self {
            FeedVariant::Generic => {
                blip.summary = entry.summary.as_deref().map(normalize_text);
            }
            FeedVariant::Media => {
                blip.summary = entry
                    .description
                    .or(entry.summary)
                    .as_deref()
                    .map(normalize_text);
            }
            FeedVariant::BuildSystem => {
                blip.summary = None;
            }
            FeedVariant::Forum => {
                let post = split_forum_title(&blip.title)?;
                blip.title = format!("{} posted to {}", post.poster, provider_name);
                blip.summary = Some(post.excerpt);
            }
            FeedVariant::Timeline => {
                blip.summary = entry.summary.as_deref().map(normalize_text);
                blip.tags = entry.categories.into_iter().collect();
                blip.who = entry.author;
            }
        }
        Ok(blip)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumPost {
    pub forum: String,
    pub excerpt: String,
    pub poster: String,
}

/// Split `<forum>: <excerpt>...: <poster>`.
///
/// The excerpt may itself contain `": "`; forum is the first part and poster
/// the last. The last four characters of the excerpt are the source's
/// truncation marker and are dropped.
pub fn split_forum_title(title: &str) -> Result<ForumPost> {
    let parts: Vec<&str> = title.split(": ").collect();
    if parts.len() < 3 {
        return Err(PulseError::Malformed {
            line: 0,
            reason: format!("forum title without '<forum>: <excerpt>: <poster>' shape: {title:?}"),
        });
    }
    let excerpt = parts[1..parts.len() - 1].join(": ");
    let keep = excerpt.chars().count().saturating_sub(4);
    Ok(ForumPost {
        forum: parts[0].to_string(),
        excerpt: excerpt.chars().take(keep).collect(),
        poster: parts[parts.len() - 1].to_string(),
    })
}

/// Fetch a feed and return its title, for naming a provider on registration.
pub async fn fetch_feed_title(transport: &FeedTransport, url: &str) -> Result<Option<String>> {
    let body = transport.get(url).await?;
    Ok(parse_feed(&body)?.title)
}

pub struct FeedSource {
    url: String,
    provider_name: String,
    variant: FeedVariant,
    transport: FeedTransport,
}

impl FeedSource {
    pub fn new(url: &str, provider_name: &str, variant: FeedVariant, transport: FeedTransport) -> Self {
        Self {
            url: url.to_string(),
            provider_name: provider_name.to_string(),
            variant,
            transport,
        }
    }

    /// Blips for every entry newer than `since`; entries without a usable
    /// timestamp are skipped with a warning.
    pub fn events_from_str(&self, xml: &str, since: DateTime<Utc>) -> Result<Vec<NewBlip>> {
        let doc = parse_feed(xml)?;
        let mut out = Vec::with_capacity(doc.entries.len());
        for entry in doc.entries {
            let Some(ts) = entry.updated else {
                tracing::warn!(url = %self.url, title = %entry.title, "feed entry without timestamp skipped");
                continue;
            };
            if ts <= since {
                continue;
            }
            out.push(self.variant.to_blip(entry, ts, &self.provider_name)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl EventSource for FeedSource {
    async fn fetch_new_events(&self, since: DateTime<Utc>) -> Result<Vec<NewBlip>> {
        let body = self.transport.get(&self.url).await?;
        self.events_from_str(&body, since)
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

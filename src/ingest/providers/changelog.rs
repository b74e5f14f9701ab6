// src/ingest/providers/changelog.rs
//! Filesystem change log written by an inotify watcher.
//!
//! One record per line:
//!
//! ```text
//! HH:MM:SS DD:MM:YYYY|path|ACTION[:ISDIR]|filename
//! ```
//!
//! Log order matters: a `MOVED_FROM` is completed by the next `MOVED_TO`,
//! so any unparseable line aborts the whole read instead of being skipped.
//! Timestamps carry no zone and are read as UTC.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;

use crate::error::{PulseError, Result};
use crate::ingest::types::EventSource;
use crate::model::{BlipDetail, NewBlip};

const STAMP_FORMAT: &str = "%H:%M:%S %d:%m:%Y";
const DIR_SUFFIX: &str = ":ISDIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Modify,
    Create,
    Delete,
    MovedFrom,
    MovedTo,
}

impl FileAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "MODIFY" => Some(FileAction::Modify),
            "CREATE" => Some(FileAction::Create),
            "DELETE" => Some(FileAction::Delete),
            "MOVED_FROM" => Some(FileAction::MovedFrom),
            "MOVED_TO" => Some(FileAction::MovedTo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub action: FileAction,
    pub is_dir: bool,
    pub filename: String,
}

impl ChangeRecord {
    fn full_path(&self) -> String {
        Path::new(&self.path).join(&self.filename).display().to_string()
    }
}

/// Parse one non-empty log line. `line` is 1-based, for error messages.
pub fn parse_record(raw: &str, line: usize) -> Result<ChangeRecord> {
    let malformed = |reason: String| PulseError::Malformed { line, reason };

    let fields: Vec<&str> = raw.split('|').collect();
    let [stamp, path, action, filename] = fields.as_slice() else {
        return Err(malformed(format!("expected 4 '|'-separated fields, got {}", fields.len())));
    };

    let naive = NaiveDateTime::parse_from_str(stamp.trim(), STAMP_FORMAT)
        .map_err(|e| malformed(format!("bad timestamp {stamp:?}: {e}")))?;

    let (action, is_dir) = match action.strip_suffix(DIR_SUFFIX) {
        Some(a) => (a, true),
        None => (*action, false),
    };
    let action = FileAction::parse(action).ok_or_else(|| malformed(format!("unknown action {action:?}")))?;

    Ok(ChangeRecord {
        line,
        timestamp: naive.and_utc(),
        path: path.to_string(),
        action,
        is_dir,
        filename: filename.to_string(),
    })
}

fn title(is_dir: bool, name: &str, verb: &str) -> String {
    let prefix = if is_dir { "Directory " } else { "" };
    format!("{prefix}{name} {verb}")
}

fn event(rec: &ChangeRecord, verb: &str, summary: Option<String>) -> NewBlip {
    let full = rec.full_path();
    let mut blip = NewBlip::new(format!("file://{full}"), title(rec.is_dir, &rec.filename, verb), rec.timestamp);
    blip.summary = summary;
    blip.detail = BlipDetail::FileChange {
        path: full,
        is_dir: rec.is_dir,
    };
    blip
}

fn paired_move(from: &ChangeRecord, to: &ChangeRecord) -> NewBlip {
    let verb = if from.filename == to.filename {
        "moved".to_string()
    } else {
        format!("renamed from {} to {}", from.filename, to.filename)
    };
    let mut to = to.clone();
    to.is_dir |= from.is_dir;
    event(&to, &verb, Some(format!("{} -> {}", from.full_path(), to.full_path())))
}

/// Turn a whole log into events, pairing moves. Only events newer than
/// `since` are returned, but every line is validated.
pub fn parse_log(content: &str, since: DateTime<Utc>) -> Result<Vec<NewBlip>> {
    let mut out = Vec::new();
    let mut pending: VecDeque<ChangeRecord> = VecDeque::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let rec = parse_record(raw, line)?;
        match rec.action {
            FileAction::Modify => out.push(event(&rec, "modified", None)),
            FileAction::Create => out.push(event(&rec, "created", None)),
            FileAction::Delete => out.push(event(&rec, "deleted", None)),
            FileAction::MovedFrom => pending.push_back(rec),
            FileAction::MovedTo => {
                let from = pending.pop_front().ok_or(PulseError::Ordering { line })?;
                out.push(paired_move(&from, &rec));
            }
        }
    }

    for from in pending {
        let verb = format!("moved from {}", from.full_path());
        out.push(event(&from, &verb, None));
    }

    out.retain(|e| e.timestamp > since);
    Ok(out)
}

pub struct ChangeLogSource {
    path: String,
    name: String,
}

impl ChangeLogSource {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl EventSource for ChangeLogSource {
    async fn fetch_new_events(&self, since: DateTime<Utc>) -> Result<Vec<NewBlip>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PulseError::Config(format!("change log {} does not exist", self.path)))
            }
            Err(e) => return Err(e.into()),
        };
        parse_log(&content, since)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        crate::provider::never_updated()
    }

    #[test]
    fn parses_record_fields() {
        let r = parse_record("14:03:59 02:05:2012|/srv/share|CREATE:ISDIR|photos", 1).unwrap();
        assert_eq!(r.timestamp, Utc.with_ymd_and_hms(2012, 5, 2, 14, 3, 59).unwrap());
        assert_eq!(r.path, "/srv/share");
        assert_eq!(r.action, FileAction::Create);
        assert!(r.is_dir);
        assert_eq!(r.filename, "photos");
    }

    #[test]
    fn simple_actions_map_to_verbs() {
        let log = "\
10:00:00 01:05:2012|/srv|MODIFY|a.txt
10:00:01 01:05:2012|/srv|CREATE|b.txt
10:00:02 01:05:2012|/srv|DELETE:ISDIR|old
";
        let evs = parse_log(log, epoch()).unwrap();
        let titles: Vec<&str> = evs.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a.txt modified", "b.txt created", "Directory old deleted"]);
        assert_eq!(evs[0].source_url, "file:///srv/a.txt");
    }

    #[test]
    fn move_pair_with_new_name_is_one_rename() {
        let log = "\
10:00:00 01:05:2012|/srv|MOVED_FROM|tmp.x
10:00:05 01:05:2012|/srv|MODIFY|other
10:00:09 01:05:2012|/srv|MOVED_TO|final.y
";
        let evs = parse_log(log, epoch()).unwrap();
        assert_eq!(evs.len(), 2);
        let rename = evs.iter().find(|e| e.title.contains("renamed")).unwrap();
        assert_eq!(rename.title, "final.y renamed from tmp.x to final.y");
        assert_eq!(rename.timestamp, Utc.with_ymd_and_hms(2012, 5, 1, 10, 0, 9).unwrap());
    }

    #[test]
    fn move_pair_with_same_name_is_moved() {
        let log = "\
10:00:00 01:05:2012|/a|MOVED_FROM:ISDIR|docs
10:00:00 01:05:2012|/b|MOVED_TO:ISDIR|docs
";
        let evs = parse_log(log, epoch()).unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].title, "Directory docs moved");
        assert_eq!(evs[0].summary.as_deref(), Some("/a/docs -> /b/docs"));
    }

    #[test]
    fn moved_to_without_from_is_fatal() {
        let log = "\
10:00:00 01:05:2012|/srv|MODIFY|a.txt
10:00:01 01:05:2012|/srv|MOVED_TO|b.txt
";
        let err = parse_log(log, epoch()).unwrap_err();
        assert!(matches!(err, PulseError::Ordering { line: 2 }));
    }

    #[test]
    fn trailing_moved_from_still_surfaces() {
        let log = "10:00:00 01:05:2012|/srv|MOVED_FROM|gone.txt\n";
        let evs = parse_log(log, epoch()).unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].title, "gone.txt moved from /srv/gone.txt");
    }

    #[test]
    fn bad_lines_abort_with_line_number() {
        let log = "10:00:00 01:05:2012|/srv|MODIFY|a.txt\nnot a record\n";
        assert!(matches!(parse_log(log, epoch()), Err(PulseError::Malformed { line: 2, .. })));

        let log = "10:00:00 01:05:2012|/srv|CHMOD|a.txt\n";
        assert!(matches!(parse_log(log, epoch()), Err(PulseError::Malformed { line: 1, .. })));

        let log = "2012-05-01 10:00|/srv|MODIFY|a.txt\n";
        assert!(matches!(parse_log(log, epoch()), Err(PulseError::Malformed { line: 1, .. })));
    }

    #[test]
    fn only_records_after_since_are_emitted() {
        let log = "\
09:00:00 01:05:2012|/srv|MODIFY|old.txt
11:00:00 01:05:2012|/srv|MODIFY|new.txt
";
        let since = Utc.with_ymd_and_hms(2012, 5, 1, 9, 0, 0).unwrap();
        let evs = parse_log(log, since).unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].title, "new.txt modified");
    }

    #[tokio::test]
    async fn missing_log_file_is_config_error() {
        let src = ChangeLogSource::new("/nonexistent/pulse/changes.log", "share");
        let err = src.fetch_new_events(epoch()).await.unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }
}

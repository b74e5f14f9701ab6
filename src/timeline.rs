//! Read surface consumed by timeline and detail views.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};
use crate::model::{Attribution, Blip, BlipSet, BlipSetId, TagSet};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlipSetView {
    pub id: BlipSetId,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub tags: TagSet,
    pub blip_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlipSetDetail {
    pub set: BlipSetView,
    /// Newest first.
    pub blips: Vec<Blip>,
}

/// The summary a view shows for `set`: frozen text, or a live rendering from
/// the owning provider's current `summary_format` and name.
pub async fn render_summary(store: &dyn Store, set: &BlipSet, blip_count: usize) -> Result<String> {
    match &set.attribution {
        Attribution::Frozen { summary } => Ok(summary.clone()),
        Attribution::Live { provider } => {
            let p = store
                .get_provider(*provider)
                .await?
                .ok_or_else(|| PulseError::NotFound(format!("{provider} of {}", set.id)))?;
            Ok(p.render_summary(blip_count))
        }
    }
}

pub async fn view(store: &dyn Store, set: &BlipSet) -> Result<BlipSetView> {
    let blip_count = store.blip_count(set.id).await?;
    Ok(BlipSetView {
        id: set.id,
        summary: render_summary(store, set, blip_count).await?,
        timestamp: set.timestamp,
        tags: set.tags.clone(),
        blip_count,
    })
}

/// Calendar window on a set's timestamp, evaluated in UTC against `now`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    Any,
    Today,
    /// The seven days before today, plus today.
    PastSevenDays,
    ThisMonth,
    ThisYear,
}

impl DateRange {
    pub fn contains(self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (day, today) = (ts.date_naive(), now.date_naive());
        match self {
            DateRange::Any => true,
            DateRange::Today => day == today,
            DateRange::PastSevenDays => day >= today - Duration::days(7) && day <= today,
            DateRange::ThisMonth => day.year() == today.year() && day.month() == today.month(),
            DateRange::ThisYear => day.year() == today.year(),
        }
    }
}

/// Blip sets newest first. A non-empty `tags` filter keeps sets carrying
/// any of the given tags.
pub async fn timeline(store: &dyn Store, tags: &TagSet) -> Result<Vec<BlipSetView>> {
    filtered_timeline(store, tags, DateRange::Any, Utc::now()).await
}

/// [`timeline`] narrowed to sets whose timestamp falls in `range`. Both
/// filters must hold.
pub async fn filtered_timeline(
    store: &dyn Store,
    tags: &TagSet,
    range: DateRange,
    now: DateTime<Utc>,
) -> Result<Vec<BlipSetView>> {
    let sets = if tags.is_empty() {
        store.list_blip_sets().await?
    } else {
        store.blip_sets_with_any_tag(tags).await?
    };
    let mut out = Vec::with_capacity(sets.len());
    for set in sets.iter().filter(|s| range.contains(s.timestamp, now)) {
        out.push(view(store, set).await?);
    }
    Ok(out)
}

pub async fn blip_set_detail(store: &dyn Store, id: BlipSetId) -> Result<BlipSetDetail> {
    let set = store
        .blip_set(id)
        .await?
        .ok_or_else(|| PulseError::NotFound(id.to_string()))?;
    Ok(BlipSetDetail {
        set: view(store, &set).await?,
        blips: store.blips_for_set(id).await?,
    })
}

/// Group a newest-first timeline under one header per calendar day.
pub fn day_headers(views: Vec<BlipSetView>) -> Vec<(NaiveDate, Vec<BlipSetView>)> {
    let mut out: Vec<(NaiveDate, Vec<BlipSetView>)> = Vec::new();
    for v in views {
        let day = v.timestamp.date_naive();
        match out.last_mut() {
            Some((d, group)) if *d == day => group.push(v),
            _ => out.push((day, vec![v])),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn v(id: u64, day: u32, hour: u32) -> BlipSetView {
        BlipSetView {
            id: BlipSetId(id),
            summary: String::new(),
            timestamp: Utc.with_ymd_and_hms(1900, 1, day, hour, 0, 0).unwrap(),
            tags: TagSet::new(),
            blip_count: 1,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn today_is_the_utc_calendar_day() {
        let now = utc(2012, 3, 6, 8, 0);
        assert!(DateRange::Today.contains(utc(2012, 3, 6, 0, 0), now));
        assert!(DateRange::Today.contains(utc(2012, 3, 6, 23, 59), now));
        assert!(!DateRange::Today.contains(utc(2012, 3, 5, 23, 59), now));
        assert!(!DateRange::Today.contains(utc(2012, 3, 7, 0, 0), now));
    }

    #[test]
    fn past_seven_days_starts_at_midnight_a_week_ago() {
        let now = utc(2012, 3, 6, 8, 0);
        assert!(DateRange::PastSevenDays.contains(utc(2012, 2, 28, 0, 0), now));
        assert!(!DateRange::PastSevenDays.contains(utc(2012, 2, 27, 23, 59), now));
        assert!(DateRange::PastSevenDays.contains(utc(2012, 3, 6, 23, 59), now));
        assert!(!DateRange::PastSevenDays.contains(utc(2012, 3, 7, 0, 0), now));
    }

    #[test]
    fn month_and_year_follow_the_calendar() {
        let now = utc(2012, 3, 1, 0, 30);
        assert!(DateRange::ThisMonth.contains(utc(2012, 3, 31, 23, 59), now));
        assert!(!DateRange::ThisMonth.contains(utc(2012, 2, 29, 23, 59), now));
        assert!(!DateRange::ThisMonth.contains(utc(2011, 3, 15, 12, 0), now));
        assert!(DateRange::ThisYear.contains(utc(2012, 1, 1, 0, 0), now));
        assert!(!DateRange::ThisYear.contains(utc(2011, 12, 31, 23, 59), now));
        assert!(DateRange::Any.contains(utc(1970, 1, 1, 0, 0), now));
    }

    #[test]
    fn ranges_use_snake_case_names() {
        let r: DateRange = serde_json::from_str("\"past_seven_days\"").unwrap();
        assert_eq!(r, DateRange::PastSevenDays);
        assert_eq!(DateRange::default(), DateRange::Any);
    }

    #[test]
    fn headers_only_when_day_changes() {
        let groups = day_headers(vec![v(3, 2, 18), v(2, 2, 9), v(1, 1, 23)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.format("%A, %b %d").to_string(), "Tuesday, Jan 02");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.format("%A, %b %d").to_string(), "Monday, Jan 01");
    }
}

//! Persisted daily aggregates and the merge step that updates them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

use crate::tracker::Millis;

pub const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
pub const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStats {
    #[serde(default)]
    pub productive_time: u64,
    #[serde(default)]
    pub distracting_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Millis>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub duration: u64,
    /// Fixed at the first observation of this hostname on this day.
    pub is_distracting: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    #[serde(default)]
    pub sites: BTreeMap<String, SiteRecord>,
}

/// `YYYY-MM-DD` -> day record. Never evicted.
pub type DailyStats = BTreeMap<String, DayRecord>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub today: TodayStats,
    pub daily: DailyStats,
}

pub fn normalize_tz_offset_minutes(v: Option<i32>) -> i32 {
    v.unwrap_or(0)
        .clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

pub fn tz_offset_from_minutes(minutes: i32) -> UtcOffset {
    UtcOffset::from_whole_seconds(minutes.saturating_mul(60)).unwrap_or(UtcOffset::UTC)
}

pub fn now_ms() -> Millis {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Millis
}

fn datetime_of(at: Millis) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(at) * 1_000_000)
        .ok()
        // Leaves room for any UTC offset without leaving `time`'s range.
        .filter(|dt| dt.year().abs() < 9_999)
}

/// Whether `at` maps to a calendar day in every supported offset.
pub fn is_representable(at: Millis) -> bool {
    datetime_of(at).is_some()
}

fn calendar_day(at: Millis, offset: UtcOffset) -> Date {
    let dt = datetime_of(at).unwrap_or_else(|| {
        warn!("timestamp {at} ms is out of range, keyed to the epoch");
        OffsetDateTime::UNIX_EPOCH
    });
    dt.to_offset(offset).date()
}

/// Calendar date of `at` in `offset`, as `YYYY-MM-DD`.
pub fn calendar_date(at: Millis, offset: UtcOffset) -> String {
    calendar_day(at, offset).to_string()
}

/// Merges one attributed interval into the snapshot.
///
/// `today` is reset first when its `last_update` is missing or falls on an
/// earlier calendar day. An interval that ended on a day before `last_update`
/// arrived late: it only goes to its own day in `daily`, and `last_update`
/// never moves backwards. A hostname's `is_distracting` flag is taken from
/// the first interval recorded for it that day and is not revisited
/// afterwards, even if the block list changes.
pub fn record_duration(
    state: &mut StatsSnapshot,
    hostname: &str,
    duration_ms: u64,
    is_distracting: bool,
    now: Millis,
    offset: UtcOffset,
) {
    let day = calendar_day(now, offset);
    let last_day = state.today.last_update.map(|ts| calendar_day(ts, offset));

    match last_day {
        Some(last) if day < last => {
            debug!("late interval for {day} ({duration_ms} ms on {hostname}) kept out of today");
        }
        _ => {
            if last_day != Some(day) {
                state.today.productive_time = 0;
                state.today.distracting_time = 0;
            }
            let total = if is_distracting {
                &mut state.today.distracting_time
            } else {
                &mut state.today.productive_time
            };
            *total = total.saturating_add(duration_ms);
            state.today.last_update = Some(state.today.last_update.map_or(now, |ts| ts.max(now)));
        }
    }

    let site = state
        .daily
        .entry(day.to_string())
        .or_default()
        .sites
        .entry(hostname.to_string())
        .or_insert(SiteRecord {
            duration: 0,
            is_distracting,
        });
    site.duration = site.duration.saturating_add(duration_ms);
}

/// Read-side view of `today`: totals read as zero once the day has rolled
/// over, without writing anything back.
pub fn today_view(today: TodayStats, now: Millis, offset: UtcOffset) -> TodayStats {
    let current = today
        .last_update
        .map(|ts| calendar_day(ts, offset) == calendar_day(now, offset))
        .unwrap_or(false);
    if current {
        today
    } else {
        TodayStats {
            productive_time: 0,
            distracting_time: 0,
            last_update: today.last_update,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SiteUsage {
    pub hostname: String,
    pub duration: u64,
    pub is_distracting: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DayReport {
    pub date: String,
    pub productive_ms: u64,
    pub distracting_ms: u64,
    pub sites: Vec<SiteUsage>,
}

/// Sites of one day, longest first (ties by hostname).
pub fn day_report(daily: &DailyStats, date: &str) -> DayReport {
    let mut sites: Vec<SiteUsage> = daily
        .get(date)
        .map(|day| {
            day.sites
                .iter()
                .map(|(host, rec)| SiteUsage {
                    hostname: host.clone(),
                    duration: rec.duration,
                    is_distracting: rec.is_distracting,
                })
                .collect()
        })
        .unwrap_or_default();
    sites.sort_by(|a, b| {
        b.duration
            .cmp(&a.duration)
            .then_with(|| a.hostname.cmp(&b.hostname))
    });

    let (mut productive_ms, mut distracting_ms) = (0u64, 0u64);
    for s in &sites {
        if s.is_distracting {
            distracting_ms = distracting_ms.saturating_add(s.duration);
        } else {
            productive_ms = productive_ms.saturating_add(s.duration);
        }
    }

    DayReport {
        date: date.to_string(),
        productive_ms,
        distracting_ms,
        sites,
    }
}

pub fn export_csv(report: &DayReport) -> String {
    let mut out = String::from("date,hostname,duration_ms,duration,is_distracting\n");
    for s in &report.sites {
        let row = [
            csv_escape(&report.date),
            csv_escape(&s.hostname),
            s.duration.to_string(),
            fmt_duration(s.duration),
            s.is_distracting.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn csv_escape(s: &str) -> String {
    let needs_quote = s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r');
    if !needs_quote {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Rounds to the nearest minute: `0m`, `12m`, `2h`, `1h 5m`.
pub fn fmt_duration(ms: u64) -> String {
    let m = ms.saturating_add(30_000) / 60_000;
    if m == 0 {
        return "0m".to_string();
    }
    if m < 60 {
        return format!("{m}m");
    }
    let h = m / 60;
    let rm = m % 60;
    if rm == 0 {
        format!("{h}h")
    } else {
        format!("{h}h {rm}m")
    }
}

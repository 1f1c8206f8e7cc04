//! Event handlers tying the tracker, classifier and aggregator together.
//!
//! Handlers never return errors: a bad event (closed tab, unparsable URL,
//! failing store) is logged and dropped so the host keeps running.

use serde::Serialize;
use time::UtcOffset;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::blocklist::{self, AddOutcome};
use crate::browser::{Redirector, TabResolver};
use crate::classifier::{hostname_of, is_blocked};
use crate::error::{CoreError, CoreResult};
use crate::stats::{
    calendar_date, day_report, record_duration, today_view, DailyStats, DayReport,
    StatsSnapshot, TodayStats,
};
use crate::store::{KvStore, SharedState, BLOCKED_SITES, DAILY_STATS, TODAY_STATS};
use crate::tracker::{ActivityTracker, Attribution, FocusState, Millis, TabId, WindowId};

pub const DEFAULT_BLOCKED_PAGE_URL: &str = "chrome-extension://focus-guard/blocked.html";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Offset used to cut calendar days.
    pub tz_offset: UtcOffset,
    pub blocked_page_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tz_offset: UtcOffset::UTC,
            blocked_page_url: DEFAULT_BLOCKED_PAGE_URL.to_string(),
        }
    }
}

/// One interval merged into the persisted stats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recorded {
    pub hostname: String,
    pub duration_ms: u64,
    pub is_distracting: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum NavigationDecision {
    Allow,
    Redirect(String),
    /// Not checked: sub-frame, not a URL change, no hostname or unreadable
    /// block list.
    Skipped,
}

pub struct Engine<S, T, R> {
    state: SharedState<S>,
    tabs: T,
    redirector: R,
    tracker: Mutex<ActivityTracker>,
    config: EngineConfig,
}

impl<S, T, R> Engine<S, T, R>
where
    S: KvStore,
    T: TabResolver,
    R: Redirector,
{
    pub fn new(store: S, tabs: T, redirector: R, config: EngineConfig, now: Millis) -> Self {
        Self {
            state: SharedState::new(store),
            tabs,
            redirector,
            tracker: Mutex::new(ActivityTracker::new(now)),
            config,
        }
    }

    pub fn today_key(&self, now: Millis) -> String {
        calendar_date(now, self.config.tz_offset)
    }

    pub async fn focus_state(&self) -> FocusState {
        self.tracker.lock().await.state()
    }

    /// Seeds any missing top-level key with its empty value. Existing data is
    /// left alone so a reinstall does not wipe history.
    pub async fn initialize(&self, now: Millis) -> CoreResult<()> {
        let seeded = self
            .state
            .update(&[BLOCKED_SITES, TODAY_STATS, DAILY_STATS], |txn| {
                let mut seeded = Vec::new();
                if !txn.contains(BLOCKED_SITES) {
                    txn.put(BLOCKED_SITES, &Vec::<String>::new())?;
                    seeded.push(BLOCKED_SITES);
                }
                if !txn.contains(TODAY_STATS) {
                    let today = TodayStats {
                        last_update: Some(now),
                        ..TodayStats::default()
                    };
                    txn.put(TODAY_STATS, &today)?;
                    seeded.push(TODAY_STATS);
                }
                if !txn.contains(DAILY_STATS) {
                    txn.put(DAILY_STATS, &DailyStats::new())?;
                    seeded.push(DAILY_STATS);
                }
                Ok(seeded)
            })
            .await?;
        if !seeded.is_empty() {
            info!("initialized storage keys: {}", seeded.join(", "));
        }
        Ok(())
    }

    pub async fn on_tab_activated(&self, tab_id: TabId, now: Millis) -> Option<Recorded> {
        let mut tracker = self.tracker.lock().await;
        let flushed = tracker.on_focus_gained(tab_id, now);
        // Held until the interval is stored so intervals land in the order
        // they ended.
        self.attribute(flushed).await
    }

    /// `window_id = None` means no browser window has focus. When a window
    /// gains focus, `active_tab` is the tab shown in it; without one the
    /// event is ignored and tracking carries on unchanged.
    pub async fn on_window_focus_changed(
        &self,
        window_id: Option<WindowId>,
        active_tab: Option<TabId>,
        now: Millis,
    ) -> Option<Recorded> {
        let mut tracker = self.tracker.lock().await;
        let flushed = match (window_id, active_tab) {
            (None, _) => tracker.on_focus_lost(now),
            (Some(_), Some(tab_id)) => tracker.on_focus_gained(tab_id, now),
            (Some(window_id), None) => {
                debug!("window {window_id} focused without an active tab");
                None
            }
        };
        self.attribute(flushed).await
    }

    /// Guard for a tab URL change; only URL changes seen while loading count.
    pub async fn on_tab_url_updated(
        &self,
        tab_id: TabId,
        url: &str,
        status: Option<&str>,
    ) -> NavigationDecision {
        match status {
            None | Some("loading") => self.check_navigation(tab_id, url).await,
            Some(_) => NavigationDecision::Skipped,
        }
    }

    /// Guard before navigation starts; sub-frames are ignored.
    pub async fn on_before_navigate(
        &self,
        tab_id: TabId,
        url: &str,
        frame_id: i64,
    ) -> NavigationDecision {
        if frame_id != 0 {
            return NavigationDecision::Skipped;
        }
        self.check_navigation(tab_id, url).await
    }

    /// Redirects `tab_id` to the blocked page when `url`'s host is on the
    /// block list. Navigations to the blocked page itself always pass, so a
    /// repeated check cannot loop.
    pub async fn check_navigation(&self, tab_id: TabId, url: &str) -> NavigationDecision {
        let target = self.config.blocked_page_url.as_str();
        if url.starts_with(target) {
            return NavigationDecision::Allow;
        }
        let hostname = match hostname_of(url) {
            Ok(h) => h,
            Err(err) => {
                debug!("navigation check skipped: {err}");
                return NavigationDecision::Skipped;
            }
        };
        let blocked = match self.blocked_sites().await {
            Ok(list) => is_blocked(&hostname, &list),
            Err(err) => {
                error!("navigation check could not read block list: {err}");
                return NavigationDecision::Skipped;
            }
        };
        if !blocked {
            return NavigationDecision::Allow;
        }
        info!("blocking {hostname} in tab {tab_id}");
        if let Err(err) = self.redirector.redirect_tab(tab_id, target).await {
            error!("redirect of tab {tab_id} failed: {err}");
        }
        NavigationDecision::Redirect(target.to_string())
    }

    pub async fn add_site(&self, raw: &str) -> CoreResult<AddOutcome> {
        let outcome = self
            .state
            .update(&[BLOCKED_SITES], |txn| {
                let mut list: Vec<String> = txn.get(BLOCKED_SITES)?;
                let outcome = blocklist::add_site(&mut list, raw)?;
                if matches!(outcome, AddOutcome::Added(_)) {
                    txn.put(BLOCKED_SITES, &list)?;
                }
                Ok(outcome)
            })
            .await?;
        if let AddOutcome::Added(site) = &outcome {
            info!("block list: added {site}");
        }
        Ok(outcome)
    }

    pub async fn remove_site(&self, site: &str) -> CoreResult<bool> {
        let removed = self
            .state
            .update(&[BLOCKED_SITES], |txn| {
                let mut list: Vec<String> = txn.get(BLOCKED_SITES)?;
                let removed = blocklist::remove_site(&mut list, site);
                if removed {
                    txn.put(BLOCKED_SITES, &list)?;
                }
                Ok(removed)
            })
            .await?;
        if removed {
            info!("block list: removed {site}");
        }
        Ok(removed)
    }

    pub async fn blocked_sites(&self) -> CoreResult<Vec<String>> {
        self.state
            .read(&[BLOCKED_SITES], |txn| txn.get(BLOCKED_SITES))
            .await
    }

    /// `todayStats` as the dashboard should show it at `now`.
    pub async fn today_stats(&self, now: Millis) -> CoreResult<TodayStats> {
        let today: TodayStats = self
            .state
            .read(&[TODAY_STATS], |txn| txn.get(TODAY_STATS))
            .await?;
        Ok(today_view(today, now, self.config.tz_offset))
    }

    pub async fn day_report(&self, date: &str) -> CoreResult<DayReport> {
        let daily: DailyStats = self
            .state
            .read(&[DAILY_STATS], |txn| txn.get(DAILY_STATS))
            .await?;
        Ok(day_report(&daily, date))
    }

    async fn attribute(&self, flushed: Option<Attribution>) -> Option<Recorded> {
        let a = flushed?;
        match self.try_attribute(a).await {
            Ok(recorded) => {
                debug!(
                    "recorded {} ms on {} (distracting: {})",
                    recorded.duration_ms, recorded.hostname, recorded.is_distracting
                );
                Some(recorded)
            }
            Err(err @ (CoreError::TabResolution { .. } | CoreError::MalformedUrl { .. })) => {
                debug!("discarding {} ms interval: {err}", a.duration_ms);
                None
            }
            Err(err) => {
                error!("updating time tracking failed: {err}");
                None
            }
        }
    }

    async fn try_attribute(&self, a: Attribution) -> CoreResult<Recorded> {
        let tab = self.tabs.get_tab(a.tab_id).await?;
        let url = match tab.url {
            Some(url) => url,
            None => {
                warn!("tab {} has no url", a.tab_id);
                return Err(CoreError::TabResolution { tab_id: a.tab_id });
            }
        };
        let hostname = hostname_of(&url)?;
        let offset = self.config.tz_offset;

        self.state
            .update(&[BLOCKED_SITES, TODAY_STATS, DAILY_STATS], |txn| {
                let list: Vec<String> = txn.get(BLOCKED_SITES)?;
                let is_distracting = is_blocked(&hostname, &list);
                let mut snapshot = StatsSnapshot {
                    today: txn.get(TODAY_STATS)?,
                    daily: txn.get(DAILY_STATS)?,
                };
                record_duration(
                    &mut snapshot,
                    &hostname,
                    a.duration_ms,
                    is_distracting,
                    a.ended_at,
                    offset,
                );
                txn.put(TODAY_STATS, &snapshot.today)?;
                txn.put(DAILY_STATS, &snapshot.daily)?;
                Ok(Recorded {
                    hostname: hostname.clone(),
                    duration_ms: a.duration_ms,
                    is_distracting,
                })
            })
            .await
    }
}

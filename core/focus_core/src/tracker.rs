//! In-memory focus pointer.
//!
//! The tracker only decides *which* interval ended and how long it was; the
//! engine resolves the tab and attributes the interval. State is never
//! persisted: on restart the tracker begins Idle and any in-flight interval
//! is lost.

use serde::Serialize;

pub type TabId = i64;
pub type WindowId = i64;

/// Epoch milliseconds.
pub type Millis = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "tab_id", rename_all = "snake_case")]
pub enum FocusState {
    Idle,
    Tracking(TabId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveFocus {
    pub tab_id: Option<TabId>,
    pub since: Millis,
}

/// An interval that ended on `tab_id` at `ended_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribution {
    pub tab_id: TabId,
    pub duration_ms: u64,
    pub ended_at: Millis,
}

#[derive(Debug)]
pub struct ActivityTracker {
    focus: ActiveFocus,
}

impl ActivityTracker {
    pub fn new(now: Millis) -> Self {
        Self {
            focus: ActiveFocus {
                tab_id: None,
                since: now,
            },
        }
    }

    pub fn state(&self) -> FocusState {
        match self.focus.tab_id {
            Some(id) => FocusState::Tracking(id),
            None => FocusState::Idle,
        }
    }

    pub fn focus(&self) -> ActiveFocus {
        self.focus
    }

    /// A tab received focus. Re-activating the tab already being tracked
    /// still flushes the elapsed interval and restarts the clock.
    pub fn on_focus_gained(&mut self, tab_id: TabId, now: Millis) -> Option<Attribution> {
        let flushed = self.flush(now);
        self.focus = ActiveFocus {
            tab_id: Some(tab_id),
            since: now,
        };
        flushed
    }

    /// No tab has focus any more (browser window lost focus).
    pub fn on_focus_lost(&mut self, now: Millis) -> Option<Attribution> {
        let flushed = self.flush(now);
        if flushed.is_some() {
            self.focus = ActiveFocus {
                tab_id: None,
                since: now,
            };
        }
        flushed
    }

    fn flush(&self, now: Millis) -> Option<Attribution> {
        let tab_id = self.focus.tab_id?;
        // Clock skew must never subtract time.
        let duration_ms = now.saturating_sub(self.focus.since).max(0) as u64;
        Some(Attribution {
            tab_id,
            duration_ms,
            ended_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_ignores_focus_lost() {
        let mut t = ActivityTracker::new(1_000);
        assert_eq!(t.state(), FocusState::Idle);
        assert_eq!(t.on_focus_lost(2_000), None);
        assert_eq!(t.state(), FocusState::Idle);
    }

    #[test]
    fn first_focus_emits_nothing() {
        let mut t = ActivityTracker::new(1_000);
        assert_eq!(t.on_focus_gained(7, 5_000), None);
        assert_eq!(t.state(), FocusState::Tracking(7));
        assert_eq!(t.focus().since, 5_000);
    }

    #[test]
    fn switching_tabs_flushes_outgoing_tab() {
        let mut t = ActivityTracker::new(0);
        t.on_focus_gained(1, 1_000);
        let a = t.on_focus_gained(2, 6_000).unwrap();
        assert_eq!(
            a,
            Attribution {
                tab_id: 1,
                duration_ms: 5_000,
                ended_at: 6_000
            }
        );
        assert_eq!(t.state(), FocusState::Tracking(2));
    }

    #[test]
    fn reactivating_same_tab_restarts_clock() {
        let mut t = ActivityTracker::new(0);
        t.on_focus_gained(3, 1_000);
        assert_eq!(t.on_focus_gained(3, 1_500).unwrap().duration_ms, 500);
        assert_eq!(t.on_focus_gained(3, 2_000).unwrap().duration_ms, 500);
        assert_eq!(t.focus().since, 2_000);
    }

    #[test]
    fn focus_lost_flushes_and_goes_idle() {
        let mut t = ActivityTracker::new(0);
        t.on_focus_gained(4, 1_000);
        let a = t.on_focus_lost(4_000).unwrap();
        assert_eq!(a.tab_id, 4);
        assert_eq!(a.duration_ms, 3_000);
        assert_eq!(t.state(), FocusState::Idle);
        assert_eq!(t.on_focus_lost(9_000), None);
    }

    #[test]
    fn negative_elapsed_is_clamped_to_zero() {
        let mut t = ActivityTracker::new(0);
        t.on_focus_gained(1, 10_000);
        let a = t.on_focus_gained(2, 9_000).unwrap();
        assert_eq!(a.duration_ms, 0);
    }

    #[test]
    fn consecutive_intervals_sum_to_total_span() {
        let mut t = ActivityTracker::new(0);
        let stamps = [100, 250, 900, 1_000, 4_321];
        let mut total = 0;
        for (i, ts) in stamps.iter().enumerate() {
            if let Some(a) = t.on_focus_gained(i as TabId, *ts) {
                total += a.duration_ms;
            }
        }
        assert_eq!(total, (4_321 - 100) as u64);
    }
}

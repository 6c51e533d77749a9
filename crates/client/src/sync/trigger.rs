//! Why a sync pass is requested, and which page signals qualify.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectionRestored,
    PageVisible,
    PageFocus,
    UserActivity,
    Periodic,
    StaleContent,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::ConnectionRestored => "connection_restored",
            SyncTrigger::PageVisible => "page_visible",
            SyncTrigger::PageFocus => "page_focus",
            SyncTrigger::UserActivity => "user_activity",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::StaleContent => "stale_content",
        }
    }
}

/// Raw signals from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSignal {
    Online,
    Offline,
    Visible,
    Hidden,
    Focus,
    /// A click, touch or key press.
    Interaction,
}

/// Whether nothing has been synced within `threshold`. Never synced counts as stale.
pub fn is_content_stale(last_sync_ms: Option<i64>, now_ms: i64, threshold: Duration) -> bool {
    elapsed_since(last_sync_ms, now_ms) > threshold
}

fn elapsed_since(last_sync_ms: Option<i64>, now_ms: i64) -> Duration {
    match last_sync_ms {
        Some(last) => Duration::from_millis(now_ms.saturating_sub(last).max(0) as u64),
        None => Duration::MAX,
    }
}

/// What the coordinator knows about the page it serves.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub path: String,
    pub online: bool,
    pub visible: bool,
    /// Interaction counts once per page load.
    interaction_armed: bool,
}

impl PageContext {
    pub fn new(path: impl Into<String>, online: bool) -> Self {
        Self { path: path.into(), online, visible: true, interaction_armed: true }
    }

    /// A new page load.
    pub fn navigate(&mut self, path: impl Into<String>) {
        self.path = path.into();
        self.visible = true;
        self.interaction_armed = true;
    }

    /// Apply `signal` and return the trigger it produces, if any.
    pub fn on_signal(
        &mut self, signal: PageSignal, last_sync_ms: Option<i64>, now_ms: i64, activity_min: Duration,
    ) -> Option<SyncTrigger> {
        match signal {
            PageSignal::Online => {
                self.online = true;
                Some(SyncTrigger::ConnectionRestored)
            }
            PageSignal::Offline => {
                self.online = false;
                None
            }
            PageSignal::Visible => {
                self.visible = true;
                self.online.then_some(SyncTrigger::PageVisible)
            }
            PageSignal::Hidden => {
                self.visible = false;
                None
            }
            PageSignal::Focus => self.online.then_some(SyncTrigger::PageFocus),
            PageSignal::Interaction => {
                if !self.interaction_armed {
                    return None;
                }
                self.interaction_armed = false;
                let due = elapsed_since(last_sync_ms, now_ms) > activity_min;
                (self.online && due).then_some(SyncTrigger::UserActivity)
            }
        }
    }

    /// The periodic timer only counts for an online, visible page.
    pub fn on_tick(&self) -> Option<SyncTrigger> {
        (self.online && self.visible).then_some(SyncTrigger::Periodic)
    }
}

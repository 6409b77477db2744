//! Fullscreen detector
//!
//! Claims one inhibitor per fullscreen window. Windows of allowlisted
//! applications are left to the allowlist matcher so both sources never
//! own an inhibitor for the same window.

use std::collections::BTreeSet;
use tracing::debug;

use super::apps::AllowlistMatcher;
use super::{TriggerEvent, fullscreen_key};
use crate::inhibitor::Origin;
use crate::wm::{WindowEntry, WindowId};

#[derive(Debug)]
pub struct FullscreenDetector {
    enabled: bool,
    claimed: BTreeSet<WindowId>,
}

impl FullscreenDetector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            claimed: BTreeSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[cfg(test)]
    pub fn is_claimed(&self, id: WindowId) -> bool {
        self.claimed.contains(&id)
    }

    /// Compare the current windows with our claims
    pub fn evaluate(&mut self, windows: &[&WindowEntry], apps: &AllowlistMatcher) -> Vec<TriggerEvent> {
        let wanted: Vec<&WindowEntry> = if self.enabled {
            windows
                .iter()
                .copied()
                .filter(|entry| entry.info.fullscreen && !entry.info.hidden)
                .filter(|entry| !apps.covers(&entry.info))
                .collect()
        } else {
            Vec::new()
        };
        let wanted_ids: BTreeSet<WindowId> = wanted.iter().map(|entry| entry.id).collect();

        let mut events: Vec<TriggerEvent> = self
            .claimed
            .difference(&wanted_ids)
            .map(|id| TriggerEvent::Release { key: fullscreen_key(*id) })
            .collect();

        for entry in wanted {
            if self.claimed.contains(&entry.id) {
                continue;
            }
            debug!("Window {} ({}) is fullscreen", entry.id, entry.info.class);
            events.push(TriggerEvent::Want {
                key: fullscreen_key(entry.id),
                reason: format!("Inhibit by fullscreen {}", entry.info.class),
                pid: entry.info.pid,
                origin: Origin::AppFullscreen,
            });
        }

        self.claimed = wanted_ids;
        events
    }

    pub fn window_closed(&mut self, id: WindowId) -> Option<TriggerEvent> {
        self.claimed
            .remove(&id)
            .then(|| TriggerEvent::Release { key: fullscreen_key(id) })
    }

    /// Disabling releases every claim
    pub fn set_enabled(&mut self, enabled: bool) -> Vec<TriggerEvent> {
        self.enabled = enabled;
        if enabled {
            return Vec::new();
        }
        std::mem::take(&mut self.claimed)
            .into_iter()
            .map(|id| TriggerEvent::Release { key: fullscreen_key(id) })
            .collect()
    }

    pub fn forget_claims(&mut self) {
        self.claimed.clear();
    }
}

//! Allowlist matcher
//!
//! Applications listed in `inhibit_apps` inhibit for as long as they have at
//! least one window. The key belongs to the application, not to a window.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{TriggerEvent, app_key};
use crate::inhibitor::Origin;
use crate::wm::{WindowEntry, WindowId, WindowInfo};

#[derive(Debug, Default)]
pub struct AllowlistMatcher {
    /// Normalized application ids from the config
    apps: Vec<String>,
    /// Windows seen per listed application
    running: BTreeMap<String, BTreeSet<WindowId>>,
    /// Applications we currently hold an inhibitor for
    claimed: BTreeSet<String>,
}

/// Lowercase and strip a `.desktop` suffix
fn normalize(app: &str) -> String {
    let app = app.trim().to_lowercase();
    match app.strip_suffix(".desktop") {
        Some(stripped) => stripped.to_string(),
        None => app,
    }
}

impl AllowlistMatcher {
    pub fn new(apps: &[String]) -> Self {
        Self {
            apps: apps.iter().map(|app| normalize(app)).filter(|app| !app.is_empty()).collect(),
            ..Self::default()
        }
    }

    /// The configured application a window belongs to.
    ///
    /// Desktop ids like `org.gnome.Totem` also match on their last segment.
    pub fn app_for(&self, info: &WindowInfo) -> Option<&str> {
        let class = info.class.to_lowercase();
        let instance = info.instance.to_lowercase();

        self.apps
            .iter()
            .find(|app| {
                let short = app.rsplit('.').next().unwrap_or(app);
                [app.as_str(), short]
                    .iter()
                    .any(|name| !name.is_empty() && (*name == class || *name == instance))
            })
            .map(String::as_str)
    }

    pub fn covers(&self, info: &WindowInfo) -> bool {
        self.app_for(info).is_some()
    }

    /// Any listed application currently inhibiting
    pub fn any_active(&self) -> bool {
        !self.claimed.is_empty()
    }

    pub fn window_opened(&mut self, id: WindowId, info: &WindowInfo) -> Option<TriggerEvent> {
        let app = self.app_for(info)?.to_string();
        let windows = self.running.entry(app.clone()).or_default();
        windows.insert(id);

        // also re-claims for a running application after a release-all
        if self.claimed.insert(app.clone()) {
            debug!("Allowlisted application {} started", app);
            return Some(TriggerEvent::Want {
                key: app_key(&app),
                reason: format!("Inhibit by {app}"),
                pid: info.pid,
                origin: Origin::AppAllowlist,
            });
        }
        None
    }

    pub fn window_closed(&mut self, id: WindowId) -> Option<TriggerEvent> {
        let app = self
            .running
            .iter_mut()
            .find_map(|(app, windows)| windows.remove(&id).then(|| app.clone()))?;

        if self.running.get(&app).is_some_and(BTreeSet::is_empty) {
            self.running.remove(&app);
            if self.claimed.remove(&app) {
                debug!("Allowlisted application {} stopped", app);
                return Some(TriggerEvent::Release { key: app_key(&app) });
            }
        }
        None
    }

    /// Replace the allowlist and re-match the windows currently open
    pub fn set_allowlist(&mut self, apps: &[String], windows: &[&WindowEntry]) -> Vec<TriggerEvent> {
        let previous = std::mem::take(&mut self.claimed);
        *self = Self::new(apps);

        let mut events = Vec::new();
        for entry in windows {
            if let Some(TriggerEvent::Want { key, reason, pid, origin }) =
                self.window_opened(entry.id, &entry.info)
            {
                // still claimed from before, nothing to re-request
                if previous.iter().any(|app| app_key(app) == key) {
                    continue;
                }
                events.push(TriggerEvent::Want { key, reason, pid, origin });
            }
        }

        for app in previous.difference(&self.claimed) {
            events.push(TriggerEvent::Release { key: app_key(app) });
        }
        events
    }

    /// Forget claims after the registry dropped them wholesale
    pub fn forget_claims(&mut self) {
        self.claimed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::WindowTable;

    fn window(xid: u32, instance: &str, class: &str) -> WindowInfo {
        WindowInfo {
            xid,
            instance: instance.into(),
            class: class.into(),
            pid: 100 + xid,
            ..WindowInfo::default()
        }
    }

    #[test]
    fn test_matching_rules() {
        let matcher = AllowlistMatcher::new(&["Firefox.desktop".into(), "org.gnome.Totem".into()]);

        assert_eq!(matcher.app_for(&window(1, "Navigator", "firefox")), Some("firefox"));
        assert_eq!(matcher.app_for(&window(2, "totem", "Totem")), Some("org.gnome.totem"));
        assert_eq!(matcher.app_for(&window(3, "gedit", "Gedit")), None);
    }

    #[test]
    fn test_started_and_stopped_transitions() {
        let mut table = WindowTable::new();
        let mut matcher = AllowlistMatcher::new(&["mpv".into()]);

        let (first, _) = table.upsert(window(1, "gl", "mpv"));
        let (second, _) = table.upsert(window(2, "gl", "mpv"));

        let started = matcher.window_opened(first, &table.get(1).unwrap().info).unwrap();
        assert_eq!(started.key(), Some("mpv-UserApps"));
        assert!(matcher.window_opened(second, &table.get(2).unwrap().info).is_none());
        assert!(matcher.any_active());

        assert!(matcher.window_closed(first).is_none());
        assert_eq!(
            matcher.window_closed(second),
            Some(TriggerEvent::Release { key: "mpv-UserApps".into() })
        );
        assert!(!matcher.any_active());
    }

    #[test]
    fn test_new_window_reclaims_after_forget() {
        let mut table = WindowTable::new();
        let mut matcher = AllowlistMatcher::new(&["mpv".into()]);

        let (first, _) = table.upsert(window(1, "gl", "mpv"));
        assert!(matcher.window_opened(first, &table.get(1).unwrap().info).is_some());

        matcher.forget_claims();
        assert!(!matcher.any_active());

        let (second, _) = table.upsert(window(2, "gl", "mpv"));
        let reclaimed = matcher.window_opened(second, &table.get(2).unwrap().info).unwrap();
        assert_eq!(reclaimed.key(), Some("mpv-UserApps"));
        assert!(matcher.any_active());

        // the claim outlives the window that made it
        assert!(matcher.window_closed(second).is_none());
        assert_eq!(
            matcher.window_closed(first),
            Some(TriggerEvent::Release { key: "mpv-UserApps".into() })
        );
    }

    #[test]
    fn test_reconfigure_claims_and_releases() {
        let mut table = WindowTable::new();
        table.upsert(window(1, "gl", "mpv"));
        table.upsert(window(2, "Navigator", "firefox"));

        let mut matcher = AllowlistMatcher::new(&["mpv".into()]);
        let events = matcher.set_allowlist(&["mpv".into()], &table.entries());
        assert_eq!(events.len(), 1);

        let events = matcher.set_allowlist(&["mpv".into(), "firefox".into()], &table.entries());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), Some("firefox-UserApps"));

        let events = matcher.set_allowlist(&["firefox".into()], &table.entries());
        assert_eq!(events, vec![TriggerEvent::Release { key: "mpv-UserApps".into() }]);
    }
}

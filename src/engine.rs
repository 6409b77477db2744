//! Engine
//!
//! Owns the registry, the trigger sources and the status publisher. Every
//! input (remote completions, window changes, control requests, reloads) is
//! applied here on one task, and the registry's queued commands are handed to
//! the remote client afterwards.

use anyhow::Result;
use caffeine_ipc::{ControlReply, ControlRequest, StatusSnapshot, WindowSummary};
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, State};
use crate::inhibitor::{Registry, RemoteClient, RemoteEvent, WindowQuery};
use crate::reconciler::{StatusPublisher, icon_for};
use crate::triggers::{
    AllowlistMatcher, FullscreenDetector, TriggerEvent, UserToggle, app_key, fullscreen_key,
};
use crate::wm::{WindowEntry, WindowEvent, WindowTable};

pub struct Engine {
    config: Config,
    registry: Registry,
    remote: RemoteClient,
    publisher: StatusPublisher,
    user: UserToggle,
    fullscreen: FullscreenDetector,
    apps: AllowlistMatcher,
    windows: WindowTable,
    /// Pending fullscreen re-evaluation
    fullscreen_check: Option<Instant>,
    state_path: Option<PathBuf>,
}

impl Engine {
    pub fn new(
        config: Config,
        remote: RemoteClient,
        publisher: StatusPublisher,
        state_path: Option<PathBuf>,
    ) -> Self {
        publisher.configure(&config);
        Self {
            registry: Registry::new(config.address_inhibitor_by_heuristic),
            user: UserToggle::new(config.user_off_releases_all),
            fullscreen: FullscreenDetector::new(config.enable_fullscreen),
            apps: AllowlistMatcher::new(&config.inhibit_apps),
            windows: WindowTable::new(),
            fullscreen_check: None,
            config,
            remote,
            publisher,
            state_path,
        }
    }

    /// Subscribe to inhibitor signals, pick up existing inhibitors and
    /// restore the user toggle
    pub async fn start(&mut self) {
        match self.remote.watch().await {
            Ok(()) => self.remote.check_existing_inhibitors(self.registry.begin_observation()),
            Err(e) => warn!("Not watching foreign inhibitors: {}", e),
        }

        if self.config.restore_state_on_startup {
            if let Some(path) = &self.state_path {
                if State::load_from(path).user_enabled {
                    info!("Restoring user inhibition from last session");
                    let events = self.user.set(true);
                    self.apply(events);
                }
            }
        }

        self.flush();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn handle_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Granted { key, cookie } => {
                self.registry.granted(&key, cookie);
            }
            RemoteEvent::Failed { key, error } => {
                debug!("{} stays pending after failure: {}", key, error);
            }
            RemoteEvent::Added(object) => {
                debug!("Inhibitor added: {}", object);
                self.remote.observe(self.registry.begin_observation());
            }
            RemoteEvent::Observed(observed) => {
                for inhibitor in observed {
                    self.registry
                        .upsert_observed(inhibitor.object, &inhibitor.app_id, &inhibitor.reason, 0);
                }
                self.registry.end_observation();
            }
            RemoteEvent::Removed(object) => {
                self.registry.remove_by_object(&object);
            }
        }
        self.flush();
    }

    pub fn handle_window(&mut self, event: WindowEvent) {
        let mut events = Vec::new();

        match event {
            WindowEvent::Opened(info) | WindowEvent::Changed(info) => {
                let (id, new) = self.windows.upsert(info.clone());
                if new {
                    debug!("Tracking {} ({}) as {}", info.xid, info.class, id);
                    events.extend(self.apps.window_opened(id, &info));
                }
                self.schedule_fullscreen_check();
            }
            WindowEvent::Closed(xid) => {
                if let Some(entry) = self.windows.remove(xid) {
                    debug!("{} closed", entry.id);
                    events.extend(self.fullscreen.window_closed(entry.id));
                    events.extend(self.apps.window_closed(entry.id));
                }
            }
        }

        self.apply(events);
        self.flush();
    }

    /// Forget every window, used when the X connection is gone
    pub fn windows_lost(&mut self) {
        let mut events = Vec::new();
        for xid in self.windows.xids() {
            if let Some(entry) = self.windows.remove(xid) {
                events.extend(self.fullscreen.window_closed(entry.id));
                events.extend(self.apps.window_closed(entry.id));
            }
        }
        self.windows.clear();
        self.apply(events);
        self.flush();
    }

    pub fn fullscreen_deadline(&self) -> Option<Instant> {
        self.fullscreen_check
    }

    /// Restart the settle delay; the check runs once changes stop
    fn schedule_fullscreen_check(&mut self) {
        if self.fullscreen.is_enabled() {
            self.fullscreen_check = Some(Instant::now() + self.config.fullscreen_settle());
        }
    }

    pub fn run_fullscreen_check(&mut self) {
        self.fullscreen_check = None;
        let events = self.fullscreen.evaluate(&self.windows.entries(), &self.apps);
        self.apply(events);
        self.flush();
    }

    pub fn handle_control(&mut self, request: ControlRequest) -> ControlReply {
        debug!("Control request: {:?}", request);
        match request {
            ControlRequest::Status => {}
            ControlRequest::Toggle => self.set_user(!self.user.is_enabled()),
            ControlRequest::SetUser { enabled } => self.set_user(enabled),
            ControlRequest::Reload => {
                if let Err(e) = self.reload() {
                    return ControlReply::Error {
                        message: format!("{e:#}"),
                    };
                }
            }
        }
        ControlReply::Status(self.publisher.current())
    }

    pub fn set_user(&mut self, enabled: bool) {
        let events = self.user.set(enabled);
        if events.is_empty() {
            return;
        }
        self.save_state();
        self.apply(events);
        self.flush();
    }

    fn save_state(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = State {
            user_enabled: self.user.is_enabled(),
        };
        if let Err(e) = state.save_to(path) {
            warn!("Failed to save state: {:#}", e);
        }
    }

    /// Re-read the config file; a bad file keeps the current config
    pub fn reload(&mut self) -> Result<()> {
        let config = Config::load()?;
        self.apply_config(config);
        Ok(())
    }

    pub fn apply_config(&mut self, config: Config) {
        if config == self.config {
            debug!("Configuration unchanged");
            return;
        }
        info!("Applying new configuration");

        self.registry.set_heuristic(config.address_inhibitor_by_heuristic);
        self.user.set_release_all(config.user_off_releases_all);

        let mut events = Vec::new();
        if config.inhibit_apps != self.config.inhibit_apps {
            events.extend(self.apps.set_allowlist(&config.inhibit_apps, &self.windows.entries()));
        }
        if config.enable_fullscreen != self.fullscreen.is_enabled() {
            events.extend(self.fullscreen.set_enabled(config.enable_fullscreen));
        }

        self.publisher.configure(&config);
        self.config = config;

        // allowlist precedence may have moved windows between sources
        if self.fullscreen.is_enabled() {
            events.extend(self.fullscreen.evaluate(&self.windows.entries(), &self.apps));
        } else {
            self.fullscreen_check = None;
        }

        self.apply(events);
        self.flush();
    }

    fn apply(&mut self, events: Vec<TriggerEvent>) {
        for event in events {
            match event {
                TriggerEvent::Want {
                    key,
                    reason,
                    pid,
                    origin,
                } => {
                    self.registry.add(&key, &reason, pid, origin);
                }
                TriggerEvent::Release { key } => {
                    self.registry.remove(&key);
                }
                TriggerEvent::ReleaseAll => {
                    let released = self.registry.release_owned();
                    info!("Released {} inhibitor(s)", released.len());
                    self.fullscreen.forget_claims();
                    self.apps.forget_claims();
                }
            }
        }
    }

    /// Send queued remote commands and publish the new status
    fn flush(&mut self) {
        for command in self.registry.take_commands() {
            self.remote.dispatch(command);
        }
        let snapshot = self.snapshot();
        self.publisher.update(snapshot, self.apps.any_active());
    }

    fn snapshot(&self) -> StatusSnapshot {
        let inhibited = !self.registry.is_empty();
        StatusSnapshot {
            inhibited,
            user_enabled: self.user.is_enabled(),
            icon: icon_for(inhibited, self.config.show_indicator),
            entries: self.registry.list().iter().map(|entry| entry.summary()).collect(),
            windows: self
                .windows
                .entries()
                .into_iter()
                .map(|entry| self.window_summary(entry))
                .collect(),
        }
    }

    fn window_summary(&self, entry: &WindowEntry) -> WindowSummary {
        let mut keys = vec![fullscreen_key(entry.id)];
        if let Some(app) = self.apps.app_for(&entry.info) {
            keys.push(app_key(app));
        }
        let query = WindowQuery {
            keys,
            pid: entry.info.pid,
            instance: &entry.info.instance,
            class: &entry.info.class,
        };

        WindowSummary {
            id: entry.id.to_string(),
            class: entry.info.class.clone(),
            instance: entry.info.instance.clone(),
            fullscreen: entry.info.fullscreen,
            inhibited: self.registry.is_inhibited_for(&query),
        }
    }

    /// Release what we own and stop watching.
    ///
    /// Releases are awaited so the session manager sees them before exit.
    pub async fn shutdown(&mut self) {
        info!("Shutting down engine");
        self.fullscreen_check = None;
        self.remote.shutdown();

        self.registry.release_owned();
        let commands = self.registry.take_commands();
        self.remote.release_now(commands).await;
        self.publisher.clear();
    }
}

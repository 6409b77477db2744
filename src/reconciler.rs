//! Reconciler / Status Publisher
//!
//! Folds the registry into one inhibited/not-inhibited signal. Side effects
//! (notification, night light) run on the two edges only; the snapshot is
//! republished whenever anything visible changes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use caffeine_ipc::StatusSnapshot;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, NightLightMode};
use crate::dbus::notifications::NotificationService;

pub const ICON_ON: &str = "my-caffeine-on-symbolic";
pub const ICON_OFF: &str = "my-caffeine-off-symbolic";

/// Hooks fired on the 0→1 and 1→0 edges
pub trait StatusEffects: Send + Sync {
    /// `apps_active` is set when an allowlisted application holds an inhibitor
    fn status_changed(&self, inhibited: bool, apps_active: bool);

    fn configure(&self, _config: &Config) {}
}

pub struct StatusPublisher {
    inhibited: bool,
    effects: Arc<dyn StatusEffects>,
    status_tx: watch::Sender<StatusSnapshot>,
    /// Snapshot file for panels, `None` in tests
    status_path: Option<PathBuf>,
}

impl StatusPublisher {
    pub fn new(effects: Arc<dyn StatusEffects>, status_path: Option<PathBuf>) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            inhibited: false,
            effects,
            status_tx,
            status_path,
        }
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn current(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibited
    }

    /// Publish a new snapshot; returns `true` when the inhibited state flipped
    pub fn update(&mut self, snapshot: StatusSnapshot, apps_active: bool) -> bool {
        let edge = snapshot.inhibited != self.inhibited;
        if edge {
            self.inhibited = snapshot.inhibited;
            info!("Inhibition {}", if self.inhibited { "enabled" } else { "disabled" });
            self.effects.status_changed(self.inhibited, apps_active);
        }

        let changed = self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        if changed {
            if let Err(e) = self.write_status_file() {
                warn!("Failed to write status file: {}", e);
            }
        }
        edge
    }

    pub fn configure(&self, config: &Config) {
        self.effects.configure(config);
    }

    fn write_status_file(&self) -> Result<()> {
        let Some(path) = &self.status_path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&*self.status_tx.borrow())
            .context("Failed to serialize status")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Remove the snapshot file on shutdown
    pub fn clear(&self) {
        if let Some(path) = &self.status_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Icon for the panel, `None` hides the indicator
pub fn icon_for(inhibited: bool, show_indicator: bool) -> Option<String> {
    show_indicator.then(|| if inhibited { ICON_ON } else { ICON_OFF }.to_string())
}

/// Pausing and resuming the desktop night light
#[async_trait]
pub trait NightLightControl: Send + Sync {
    /// Pause if currently on; returns whether this call paused it
    async fn pause_if_active(&self) -> Result<bool>;

    async fn resume(&self) -> Result<()>;
}

/// Apply night light edges one at a time, in the order they were sent.
///
/// `true` asks for a pause, `false` for a resume. A resume is only issued
/// when the worker paused night light itself.
pub fn spawn_night_light_worker(
    control: Arc<dyn NightLightControl>,
) -> (mpsc::UnboundedSender<bool>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<bool>();

    let worker = tokio::spawn(async move {
        let mut paused = false;
        while let Some(pause) = rx.recv().await {
            if pause && !paused {
                match control.pause_if_active().await {
                    Ok(done) => paused = done,
                    Err(e) => debug!("Failed to pause night light: {}", e),
                }
            } else if !pause && paused {
                paused = false;
                if let Err(e) = control.resume().await {
                    debug!("Failed to resume night light: {}", e);
                }
            }
        }
    });

    (tx, worker)
}

#[derive(Debug, Clone, Copy)]
struct EffectSettings {
    show_notifications: bool,
    night_light: NightLightMode,
}

/// Desktop notifications and night light pausing
pub struct DesktopEffects {
    notifications: Option<Arc<NotificationService>>,
    /// Edges for the night light worker
    night_light: Option<mpsc::UnboundedSender<bool>>,
    settings: Mutex<EffectSettings>,
}

impl DesktopEffects {
    pub fn new(
        notifications: Option<NotificationService>,
        night_light: Option<Arc<dyn NightLightControl>>,
        config: &Config,
    ) -> Self {
        Self {
            notifications: notifications.map(Arc::new),
            night_light: night_light.map(|control| spawn_night_light_worker(control).0),
            settings: Mutex::new(EffectSettings {
                show_notifications: config.show_notifications,
                night_light: config.night_light,
            }),
        }
    }

    fn settings(&self) -> EffectSettings {
        match self.settings.lock() {
            Ok(settings) => *settings,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl StatusEffects for DesktopEffects {
    fn status_changed(&self, inhibited: bool, apps_active: bool) {
        let settings = self.settings();

        if settings.show_notifications {
            if let Some(notifications) = self.notifications.clone() {
                tokio::spawn(async move {
                    let message = if inhibited {
                        "Auto suspend and screensaver disabled"
                    } else {
                        "Auto suspend and screensaver enabled"
                    };
                    if let Err(e) = notifications.show_simple("Caffeine", message).await {
                        debug!("Failed to show notification: {}", e);
                    }
                });
            }
        }

        let Some(night_light) = &self.night_light else {
            return;
        };

        let pause = inhibited
            && match settings.night_light {
                NightLightMode::Never => false,
                NightLightMode::Always => true,
                NightLightMode::ForApps => apps_active,
            };
        // the worker ignores a resume it does not owe
        if (pause || !inhibited) && night_light.send(pause).is_err() {
            debug!("Night light worker is gone");
        }
    }

    fn configure(&self, config: &Config) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.show_notifications = config.show_notifications;
            settings.night_light = config.night_light;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEffects;

    #[derive(Default)]
    struct FakeNightLight {
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeNightLight {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NightLightControl for FakeNightLight {
        async fn pause_if_active(&self) -> Result<bool> {
            // property reads before the write
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.calls.lock().unwrap().push("pause");
            Ok(true)
        }

        async fn resume(&self) -> Result<()> {
            self.calls.lock().unwrap().push("resume");
            Ok(())
        }
    }

    fn snapshot(inhibited: bool, keys: &[&str]) -> StatusSnapshot {
        StatusSnapshot {
            inhibited,
            entries: keys
                .iter()
                .map(|key| caffeine_ipc::EntrySummary {
                    key: key.to_string(),
                    reason: String::new(),
                    pid: 0,
                    origin: caffeine_ipc::Origin::User,
                    confirmed: true,
                })
                .collect(),
            ..StatusSnapshot::default()
        }
    }

    #[test]
    fn test_edges_fire_once() {
        let effects = Arc::new(RecordingEffects::default());
        let mut publisher = StatusPublisher::new(effects.clone(), None);

        assert!(publisher.update(snapshot(true, &["user"]), false));
        assert!(!publisher.update(snapshot(true, &["user", "window-1-FullScreen"]), false));
        assert!(!publisher.update(snapshot(true, &["window-1-FullScreen"]), false));
        assert!(publisher.update(snapshot(false, &[]), false));
        assert!(!publisher.update(snapshot(false, &[]), false));

        assert_eq!(effects.edges(), vec![true, false]);
    }

    #[test]
    fn test_snapshot_published_without_edge() {
        let effects = Arc::new(RecordingEffects::default());
        let mut publisher = StatusPublisher::new(effects, None);
        let mut rx = publisher.subscribe();

        publisher.update(snapshot(true, &["user"]), false);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        publisher.update(snapshot(true, &["user", "other"]), false);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().entries.len(), 2);

        publisher.update(snapshot(true, &["user", "other"]), false);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_status_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut publisher = StatusPublisher::new(Arc::new(RecordingEffects::default()), Some(path.clone()));

        publisher.update(snapshot(true, &["user"]), false);
        let written: StatusSnapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(written.inhibited);

        publisher.clear();
        assert!(!path.exists());
    }

    #[test]
    fn test_icon_for() {
        assert_eq!(icon_for(true, true).as_deref(), Some(ICON_ON));
        assert_eq!(icon_for(false, true).as_deref(), Some(ICON_OFF));
        assert_eq!(icon_for(true, false), None);
    }

    #[tokio::test]
    async fn test_quick_disable_still_resumes_night_light() {
        let control = Arc::new(FakeNightLight::default());
        let (edges, worker) = spawn_night_light_worker(control.clone());

        edges.send(true).unwrap();
        edges.send(false).unwrap();
        drop(edges);
        worker.await.unwrap();

        assert_eq!(control.calls(), vec!["pause", "resume"]);
    }

    #[tokio::test]
    async fn test_resume_only_when_paused_by_us() {
        let control = Arc::new(FakeNightLight::default());
        let (edges, worker) = spawn_night_light_worker(control.clone());

        edges.send(false).unwrap();
        edges.send(true).unwrap();
        edges.send(true).unwrap();
        drop(edges);
        worker.await.unwrap();

        assert_eq!(control.calls(), vec!["pause"]);
    }

    #[tokio::test]
    async fn test_for_apps_mode_pauses_only_with_apps() {
        let control = Arc::new(FakeNightLight::default());
        let config = Config {
            night_light: NightLightMode::ForApps,
            show_notifications: false,
            ..Config::default()
        };
        let night_light: Arc<dyn NightLightControl> = control.clone();
        let effects = DesktopEffects::new(None, Some(night_light), &config);

        effects.status_changed(true, false);
        effects.status_changed(false, false);
        effects.status_changed(true, true);
        effects.status_changed(false, false);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(control.calls(), vec!["pause", "resume"]);
    }
}

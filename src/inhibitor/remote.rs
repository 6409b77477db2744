//! Remote Inhibit Client
//!
//! Issues inhibit/uninhibit calls on spawned tasks and forwards session
//! manager signals. Results come back to the engine as [`RemoteEvent`]s, so
//! the registry is only ever touched from the engine task.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::RemoteCommand;
use super::{InhibitFlags, ObjectRef};

/// How long teardown waits for the session manager to release our inhibitors
const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("D-Bus call failed: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Invalid inhibitor object path: {0}")]
    InvalidObjectPath(String),

    #[error("Session manager is not available")]
    Unavailable,
}

/// Signals emitted by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InhibitorSignal {
    Added(ObjectRef),
    Removed(ObjectRef),
}

/// Operations of the remote inhibit service
#[async_trait]
pub trait InhibitBackend: Send + Sync {
    async fn inhibit(
        &self,
        app_id: &str,
        pid: u32,
        reason: &str,
        flags: InhibitFlags,
    ) -> Result<u32, RemoteError>;

    /// Stale cookies are tolerated by the service
    async fn uninhibit(&self, cookie: u32) -> Result<(), RemoteError>;

    async fn inhibitors(&self) -> Result<Vec<ObjectRef>, RemoteError>;

    async fn flags(&self, object: &ObjectRef) -> Result<InhibitFlags, RemoteError>;

    async fn app_id(&self, object: &ObjectRef) -> Result<String, RemoteError>;

    async fn reason(&self, object: &ObjectRef) -> Result<String, RemoteError>;

    /// Stream of InhibitorAdded/InhibitorRemoved
    async fn signals(&self) -> Result<BoxStream<'static, InhibitorSignal>, RemoteError>;
}

/// A relevant inhibitor found on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInhibitor {
    pub object: ObjectRef,
    pub app_id: String,
    pub reason: String,
    pub flags: InhibitFlags,
}

/// Completions and signals delivered back to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Granted { key: String, cookie: u32 },
    Failed { key: String, error: String },
    /// InhibitorAdded was received, the engine should resolve it
    Added(ObjectRef),
    /// Outcome of one inhibitor listing, empty if the listing failed
    Observed(Vec<ObservedInhibitor>),
    Removed(ObjectRef),
}

pub struct RemoteClient {
    backend: Arc<dyn InhibitBackend>,
    events: mpsc::UnboundedSender<RemoteEvent>,
    watcher: Option<JoinHandle<()>>,
}

impl RemoteClient {
    pub fn new(backend: Arc<dyn InhibitBackend>, events: mpsc::UnboundedSender<RemoteEvent>) -> Self {
        Self {
            backend,
            events,
            watcher: None,
        }
    }

    /// Issue a queued registry command without waiting for the reply
    pub fn dispatch(&self, command: RemoteCommand) {
        let backend = self.backend.clone();
        let events = self.events.clone();

        match command {
            RemoteCommand::Inhibit { key, pid, reason, flags } => {
                tokio::spawn(async move {
                    let event = match backend.inhibit(&key, pid, &reason, flags).await {
                        Ok(cookie) => RemoteEvent::Granted { key, cookie },
                        Err(e) => {
                            warn!("Inhibit request for {} failed: {}", key, e);
                            RemoteEvent::Failed { key, error: e.to_string() }
                        }
                    };
                    let _ = events.send(event);
                });
            }
            RemoteCommand::Uninhibit { key, cookie } => {
                tokio::spawn(async move {
                    if let Err(e) = backend.uninhibit(cookie).await {
                        debug!("Uninhibit of {} (cookie {}) failed: {}", key, cookie, e);
                    }
                });
            }
        }
    }

    /// Subscribe to InhibitorAdded/InhibitorRemoved.
    ///
    /// Must run before [`Self::check_existing_inhibitors`] so nothing added in
    /// between is missed.
    pub async fn watch(&mut self) -> Result<(), RemoteError> {
        let mut signals = self.backend.signals().await?;
        let events = self.events.clone();

        self.watcher = Some(tokio::spawn(async move {
            while let Some(signal) = signals.next().await {
                let event = match signal {
                    InhibitorSignal::Added(object) => RemoteEvent::Added(object),
                    InhibitorSignal::Removed(object) => RemoteEvent::Removed(object),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            info!("Inhibitor signal stream ended");
        }));
        Ok(())
    }

    /// Resolve every inhibitor not in `known` and report the relevant ones.
    ///
    /// Exactly one [`RemoteEvent::Observed`] is sent per call.
    pub fn observe(&self, known: HashSet<ObjectRef>) {
        let backend = self.backend.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let observed = resolve_inhibitors(backend.as_ref(), &known)
                .await
                .unwrap_or_else(|e| {
                    warn!("Failed to list inhibitors: {}", e);
                    Vec::new()
                });
            let _ = events.send(RemoteEvent::Observed(observed));
        });
    }

    /// Pick up inhibitors registered before we subscribed
    pub fn check_existing_inhibitors(&self, known: HashSet<ObjectRef>) {
        debug!("Checking existing inhibitors");
        self.observe(known);
    }

    /// Release cookies and wait for the replies, used on teardown
    pub async fn release_now(&self, commands: Vec<RemoteCommand>) {
        let releases = commands.into_iter().filter_map(|command| match command {
            RemoteCommand::Uninhibit { key, cookie } => Some((key, cookie)),
            RemoteCommand::Inhibit { .. } => None,
        });

        for (key, cookie) in releases {
            match tokio::time::timeout(RELEASE_TIMEOUT, self.backend.uninhibit(cookie)).await {
                Ok(Ok(())) => debug!("Released {} (cookie {})", key, cookie),
                Ok(Err(e)) => warn!("Failed to release {}: {}", key, e),
                Err(_) => error!("Timed out releasing {}", key),
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// List inhibitors and resolve the ones not already known.
///
/// Objects whose flags or app id cannot be read are skipped.
pub async fn resolve_inhibitors(
    backend: &dyn InhibitBackend,
    known: &HashSet<ObjectRef>,
) -> Result<Vec<ObservedInhibitor>, RemoteError> {
    let mut observed = Vec::new();

    for object in backend.inhibitors().await? {
        if known.contains(&object) {
            continue;
        }
        match resolve_one(backend, &object).await {
            Ok(Some(inhibitor)) => observed.push(inhibitor),
            Ok(None) => debug!("Ignoring {}: flags not relevant", object),
            Err(e) => debug!("Skipping {}: {}", object, e),
        }
    }

    Ok(observed)
}

async fn resolve_one(
    backend: &dyn InhibitBackend,
    object: &ObjectRef,
) -> Result<Option<ObservedInhibitor>, RemoteError> {
    let flags = backend.flags(object).await?;
    if !flags.is_relevant() {
        return Ok(None);
    }

    let app_id = backend.app_id(object).await?;
    let reason = backend.reason(object).await.unwrap_or_else(|e| {
        debug!("No reason for {}: {}", object, e);
        String::new()
    });

    Ok(Some(ObservedInhibitor {
        object: object.clone(),
        app_id,
        reason,
        flags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn known() -> HashSet<ObjectRef> {
        HashSet::new()
    }

    #[tokio::test]
    async fn test_mask_filtering() {
        let backend = FakeBackend::new();
        let logout = backend.insert("org.gnome.Shell", 1 | 2, "Switching user");
        let idle = backend.insert("org.gnome.Totem", 8, "Playing");
        backend.insert("spotify", 4, "Playing audio");

        let observed = resolve_inhibitors(&backend, &known()).await.unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].object, idle);
        assert_eq!(observed[0].app_id, "org.gnome.Totem");
        assert!(observed.iter().all(|inhibitor| inhibitor.object != logout));
    }

    #[tokio::test]
    async fn test_known_objects_are_skipped() {
        let backend = FakeBackend::new();
        let object = backend.insert("org.gnome.Totem", 8, "Playing");

        let known: HashSet<_> = [object].into_iter().collect();
        assert!(resolve_inhibitors(&backend, &known).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_inhibitor_short_circuits() {
        let backend = FakeBackend::new();
        let broken = backend.insert("broken", 8, "x");
        backend.break_app_id(&broken);
        let no_reason = backend.insert("org.gnome.Totem", 16, "x");
        backend.break_reason(&no_reason);

        let observed = resolve_inhibitors(&backend, &known()).await.unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].object, no_reason);
        assert_eq!(observed[0].reason, "");
    }

    #[tokio::test]
    async fn test_dispatch_reports_grant_and_failure() {
        let backend = Arc::new(FakeBackend::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = RemoteClient::new(backend.clone(), tx);

        client.dispatch(RemoteCommand::Inhibit {
            key: "user".into(),
            pid: 0,
            reason: "test".into(),
            flags: InhibitFlags::REQUEST,
        });
        match rx.recv().await.unwrap() {
            RemoteEvent::Granted { key, .. } => assert_eq!(key, "user"),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(backend.inhibit_calls()[0].3, InhibitFlags::REQUEST);

        backend.set_unavailable(true);
        client.dispatch(RemoteCommand::Inhibit {
            key: "other".into(),
            pid: 0,
            reason: "test".into(),
            flags: InhibitFlags::REQUEST,
        });
        assert!(matches!(rx.recv().await.unwrap(), RemoteEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_observe_reports_once_even_when_listing_fails() {
        let backend = Arc::new(FakeBackend::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = RemoteClient::new(backend.clone(), tx);
        let player = backend.insert("org.gnome.Totem", 8, "Playing");

        client.observe(known());
        match rx.recv().await.unwrap() {
            RemoteEvent::Observed(observed) => {
                assert_eq!(observed.len(), 1);
                assert_eq!(observed[0].object, player);
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        backend.set_unavailable(true);
        client.observe(known());
        assert_eq!(rx.recv().await.unwrap(), RemoteEvent::Observed(Vec::new()));
    }

    #[tokio::test]
    async fn test_watch_forwards_signals() {
        let backend = Arc::new(FakeBackend::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut client = RemoteClient::new(backend.clone(), tx);
        client.watch().await.unwrap();

        let object = ObjectRef::new("/org/gnome/SessionManager/Inhibitor3");
        backend.emit(InhibitorSignal::Added(object.clone()));
        backend.emit(InhibitorSignal::Removed(object.clone()));

        assert_eq!(rx.recv().await.unwrap(), RemoteEvent::Added(object.clone()));
        assert_eq!(rx.recv().await.unwrap(), RemoteEvent::Removed(object));
    }
}

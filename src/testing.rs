//! In-memory stand-ins for the session bus, used by unit tests

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::inhibitor::remote::{InhibitBackend, InhibitorSignal, RemoteError};
use crate::inhibitor::{InhibitFlags, ObjectRef};
use crate::reconciler::StatusEffects;

#[derive(Debug, Clone)]
struct FakeInhibitor {
    app_id: Option<String>,
    reason: Option<String>,
    flags: u32,
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    inhibitors: BTreeMap<ObjectRef, FakeInhibitor>,
    inhibit_calls: Vec<(String, u32, String, InhibitFlags)>,
    uninhibit_calls: Vec<u32>,
    unavailable: bool,
    signals: Option<mpsc::UnboundedSender<InhibitorSignal>>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a foreign inhibitor and return its object path
    pub fn insert(&self, app_id: &str, flags: u32, reason: &str) -> ObjectRef {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let object = ObjectRef::new(format!("/org/gnome/SessionManager/Inhibitor{}", state.next_id));
        state.inhibitors.insert(
            object.clone(),
            FakeInhibitor {
                app_id: Some(app_id.to_string()),
                reason: Some(reason.to_string()),
                flags,
            },
        );
        object
    }

    pub fn break_app_id(&self, object: &ObjectRef) {
        if let Some(inhibitor) = self.state.lock().unwrap().inhibitors.get_mut(object) {
            inhibitor.app_id = None;
        }
    }

    pub fn break_reason(&self, object: &ObjectRef) {
        if let Some(inhibitor) = self.state.lock().unwrap().inhibitors.get_mut(object) {
            inhibitor.reason = None;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn emit(&self, signal: InhibitorSignal) {
        if let Some(tx) = &self.state.lock().unwrap().signals {
            let _ = tx.send(signal);
        }
    }

    pub fn inhibit_calls(&self) -> Vec<(String, u32, String, InhibitFlags)> {
        self.state.lock().unwrap().inhibit_calls.clone()
    }

    pub fn uninhibit_calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().uninhibit_calls.clone()
    }

    fn lookup(&self, object: &ObjectRef) -> Result<FakeInhibitor, RemoteError> {
        self.state
            .lock()
            .unwrap()
            .inhibitors
            .get(object)
            .cloned()
            .ok_or_else(|| RemoteError::InvalidObjectPath(object.to_string()))
    }
}

#[async_trait]
impl InhibitBackend for FakeBackend {
    async fn inhibit(
        &self,
        app_id: &str,
        pid: u32,
        reason: &str,
        flags: InhibitFlags,
    ) -> Result<u32, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(RemoteError::Unavailable);
        }
        state
            .inhibit_calls
            .push((app_id.to_string(), pid, reason.to_string(), flags));
        state.next_id += 1;
        Ok(state.next_id)
    }

    async fn uninhibit(&self, cookie: u32) -> Result<(), RemoteError> {
        self.state.lock().unwrap().uninhibit_calls.push(cookie);
        Ok(())
    }

    async fn inhibitors(&self) -> Result<Vec<ObjectRef>, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(RemoteError::Unavailable);
        }
        Ok(state.inhibitors.keys().cloned().collect())
    }

    async fn flags(&self, object: &ObjectRef) -> Result<InhibitFlags, RemoteError> {
        Ok(InhibitFlags::from_bits_retain(self.lookup(object)?.flags))
    }

    async fn app_id(&self, object: &ObjectRef) -> Result<String, RemoteError> {
        self.lookup(object)?.app_id.ok_or(RemoteError::Unavailable)
    }

    async fn reason(&self, object: &ObjectRef) -> Result<String, RemoteError> {
        self.lookup(object)?.reason.ok_or(RemoteError::Unavailable)
    }

    async fn signals(&self) -> Result<BoxStream<'static, InhibitorSignal>, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().signals = Some(tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        })
        .boxed())
    }
}

/// Records every status edge instead of touching the desktop
#[derive(Default)]
pub struct RecordingEffects {
    pub edges: Mutex<Vec<bool>>,
}

impl RecordingEffects {
    pub fn edges(&self) -> Vec<bool> {
        self.edges.lock().unwrap().clone()
    }
}

impl StatusEffects for RecordingEffects {
    fn status_changed(&self, inhibited: bool, _apps_active: bool) {
        self.edges.lock().unwrap().push(inhibited);
    }
}

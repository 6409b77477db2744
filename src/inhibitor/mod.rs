//! Inhibitor tracking
//!
//! The registry holds every inhibitor that currently suppresses idle or
//! suspend, whether this daemon asked for it or another application did.
//! The remote client turns registry commands into session manager calls and
//! session manager signals back into registry updates.

pub mod registry;
pub mod remote;

use bitflags::bitflags;
use std::fmt;

pub use caffeine_ipc::Origin;
pub use registry::Registry;
pub use remote::{InhibitBackend, RemoteClient, RemoteError, RemoteEvent};

bitflags! {
    /// Inhibit flags as defined by org.gnome.SessionManager
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InhibitFlags: u32 {
        const LOGOUT      = 1 << 0;
        const SWITCH_USER = 1 << 1;
        const SUSPEND     = 1 << 2;
        const IDLE        = 1 << 3;
        const AUTOMOUNT   = 1 << 4;
    }
}

impl InhibitFlags {
    /// Flags sent with every inhibit request issued by this daemon
    pub const REQUEST: Self = Self::SUSPEND.union(Self::IDLE);

    /// Flags that make a foreign inhibitor count.
    ///
    /// SUSPEND alone is left out: audio playback in unrelated applications
    /// registers suspend-only inhibitors.
    pub const RELEVANT: Self = Self::IDLE.union(Self::AUTOMOUNT);

    pub fn is_relevant(self) -> bool {
        self.intersects(Self::RELEVANT)
    }
}

/// Session manager object path of an inhibitor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single inhibition, local or foreign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InhibitorEntry {
    pub key: String,
    pub pid: u32,
    pub reason: String,
    pub origin: Origin,
    /// Cookie returned by `Inhibit`, only for entries this daemon requested
    pub cookie: Option<u32>,
    /// Inhibitor object announced by the session manager
    pub object: Option<ObjectRef>,
}

impl InhibitorEntry {
    /// Requested by us, not yet granted
    pub fn is_pending(&self) -> bool {
        self.origin != Origin::System && self.cookie.is_none()
    }

    pub fn summary(&self) -> caffeine_ipc::EntrySummary {
        caffeine_ipc::EntrySummary {
            key: self.key.clone(),
            reason: self.reason.clone(),
            pid: self.pid,
            origin: self.origin,
            confirmed: !self.is_pending(),
        }
    }
}

/// Lookup criteria for "is this window inhibited?"
#[derive(Debug, Clone, Default)]
pub struct WindowQuery<'a> {
    /// Keys the triggers derive from this window
    pub keys: Vec<String>,
    pub pid: u32,
    /// WM_CLASS instance name
    pub instance: &'a str,
    /// WM_CLASS class name
    pub class: &'a str,
}

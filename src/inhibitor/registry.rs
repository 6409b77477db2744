//! Inhibitor Registry
//!
//! In-memory table of active inhibitors keyed by a caller-chosen string.
//! The registry never talks to the bus itself: mutations that need a remote
//! call queue a [`RemoteCommand`], and the engine hands those to the remote
//! client after every event.

use std::collections::HashSet;
use tracing::{debug, info};

use super::{InhibitFlags, InhibitorEntry, ObjectRef, Origin, WindowQuery};
use crate::triggers::is_owned_key;

/// Reason used for foreign inhibitors whose reason could not be fetched
pub const UNKNOWN_REASON: &str = "Inhibited by another application";

/// Remote work queued by a registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Inhibit {
        key: String,
        pid: u32,
        reason: String,
        flags: InhibitFlags,
    },
    Uninhibit {
        key: String,
        cookie: u32,
    },
}

#[derive(Debug, Default)]
pub struct Registry {
    /// Insertion ordered, at most one entry per key
    entries: Vec<InhibitorEntry>,

    /// Match foreign inhibitors to windows by pid and WM_CLASS
    heuristic: bool,

    /// Queued remote calls, drained by the engine
    commands: Vec<RemoteCommand>,

    /// Objects reported as removed while an observation was in flight
    tombstones: HashSet<ObjectRef>,

    /// Our own objects outliving their entry, until the session manager drops them
    stale: HashSet<ObjectRef>,

    /// Inhibitor listings not yet delivered back
    observing: usize,
}

impl Registry {
    pub fn new(heuristic: bool) -> Self {
        Self {
            heuristic,
            ..Self::default()
        }
    }

    pub fn set_heuristic(&mut self, enabled: bool) {
        self.heuristic = enabled;
    }

    /// Insert a pending entry and queue the inhibit request.
    ///
    /// Returns `false` if `key` is already present; the existing entry keeps
    /// its reason and pid.
    pub fn add(&mut self, key: &str, reason: &str, pid: u32, origin: Origin) -> bool {
        if self.position(key).is_some() {
            debug!("Inhibitor {} already present, ignoring add", key);
            return false;
        }

        info!("Adding inhibitor {} ({:?}): {}", key, origin, reason);
        self.entries.push(InhibitorEntry {
            key: key.to_string(),
            pid,
            reason: reason.to_string(),
            origin,
            cookie: None,
            object: None,
        });
        self.commands.push(RemoteCommand::Inhibit {
            key: key.to_string(),
            pid,
            reason: reason.to_string(),
            flags: InhibitFlags::REQUEST,
        });
        true
    }

    /// Drop the entry right away and queue an uninhibit for its cookie.
    ///
    /// Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };

        let entry = self.entries.remove(index);
        info!("Removing inhibitor {}", key);
        if let Some(object) = entry.object {
            self.stale.insert(object);
        }
        if let Some(cookie) = entry.cookie {
            self.commands.push(RemoteCommand::Uninhibit {
                key: entry.key,
                cookie,
            });
        }
        true
    }

    pub fn get(&self, key: &str) -> Option<&InhibitorEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn list(&self) -> &[InhibitorEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Store the cookie of a granted inhibit request.
    ///
    /// Grants are matched by key. A grant for a key that is gone, or whose
    /// entry already holds a cookie, is released again instead of being
    /// attached.
    pub fn granted(&mut self, key: &str, cookie: u32) -> bool {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) if entry.cookie.is_none() && entry.origin != Origin::System => {
                debug!("Inhibitor {} granted with cookie {}", key, cookie);
                entry.cookie = Some(cookie);
                true
            }
            _ => {
                debug!("Releasing orphan cookie {} for {}", cookie, key);
                self.commands.push(RemoteCommand::Uninhibit {
                    key: key.to_string(),
                    cookie,
                });
                false
            }
        }
    }

    /// Record an inhibitor announced by the session manager.
    ///
    /// If an entry keyed by `app_id` exists without an object, the object is
    /// attached to it (it is one of ours). Otherwise a system entry is
    /// inserted. Objects already tracked or already removed are ignored.
    ///
    /// An app id in one of our own key namespaces that has no entry waiting
    /// for an object is a late sighting of an inhibitor we already released,
    /// and is never mirrored.
    pub fn upsert_observed(&mut self, object: ObjectRef, app_id: &str, reason: &str, pid: u32) -> bool {
        if self.knows_object(&object) {
            return false;
        }

        let mut key = app_id.to_string();
        let waiting = self.entries.iter_mut().find(|entry| entry.key == app_id);
        if is_owned_key(app_id) {
            match waiting {
                Some(entry) if entry.object.is_none() => {
                    debug!("Attaching {} to inhibitor {}", object, app_id);
                    entry.object = Some(object);
                    return true;
                }
                _ => {
                    debug!("Ignoring late observation {} of released {}", object, app_id);
                    self.stale.insert(object);
                    return false;
                }
            }
        }
        if waiting.is_some() {
            // same application holds several inhibitors
            key = format!("{app_id}@{object}");
        }

        info!("Observed foreign inhibitor {} from {}: {}", object, app_id, reason);
        self.entries.push(InhibitorEntry {
            key,
            pid,
            reason: if reason.is_empty() { UNKNOWN_REASON.to_string() } else { reason.to_string() },
            origin: Origin::System,
            cookie: None,
            object: Some(object),
        });
        true
    }

    /// Drop the entry carrying `object`; the inhibitor is already gone remotely.
    pub fn remove_by_object(&mut self, object: &ObjectRef) -> bool {
        self.stale.remove(object);
        // a listing taken before the removal may still report it
        if self.observing > 0 {
            self.tombstones.insert(object.clone());
        }

        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.object.as_ref() == Some(object))
        else {
            return false;
        };

        let entry = self.entries.remove(index);
        info!("Inhibitor {} ({}) removed by session manager", entry.key, object);
        true
    }

    /// Note an inhibitor listing about to be taken and return the objects it
    /// can skip
    pub fn begin_observation(&mut self) -> HashSet<ObjectRef> {
        self.observing += 1;
        self.known_objects()
    }

    /// A listing was delivered; tombstones go once none is outstanding
    pub fn end_observation(&mut self) {
        self.observing = self.observing.saturating_sub(1);
        if self.observing == 0 && !self.tombstones.is_empty() {
            debug!("Dropping {} tombstone(s)", self.tombstones.len());
            self.tombstones.clear();
        }
    }

    fn known_objects(&self) -> HashSet<ObjectRef> {
        self.entries
            .iter()
            .filter_map(|entry| entry.object.clone())
            .chain(self.tombstones.iter().cloned())
            .chain(self.stale.iter().cloned())
            .collect()
    }

    fn knows_object(&self, object: &ObjectRef) -> bool {
        self.tombstones.contains(object)
            || self.stale.contains(object)
            || self.entries.iter().any(|entry| entry.object.as_ref() == Some(object))
    }

    /// Whether anything inhibits on behalf of the described window.
    ///
    /// Exact key matches always count. With the heuristic enabled, the pid and
    /// WM_CLASS are compared against every entry, first hit wins. This also
    /// catches inhibitors the application registered on its own, and can
    /// produce false positives for applications with similar names.
    pub fn is_inhibited_for(&self, query: &WindowQuery<'_>) -> bool {
        if query.keys.iter().any(|key| self.get(key).is_some()) {
            return true;
        }

        if !self.heuristic {
            return false;
        }

        if query.pid != 0 && self.entries.iter().any(|entry| entry.pid == query.pid) {
            return true;
        }

        self.key_contains(query.instance) || self.key_contains(query.class)
    }

    fn key_contains(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .any(|entry| entry.key.to_lowercase().contains(&needle))
    }

    /// Remove every entry this daemon requested, keeping foreign ones
    pub fn release_owned(&mut self) -> Vec<String> {
        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.origin != Origin::System)
            .map(|entry| entry.key.clone())
            .collect();

        for key in &owned {
            self.remove(key);
        }
        owned
    }

    pub fn take_commands(&mut self) -> Vec<RemoteCommand> {
        std::mem::take(&mut self.commands)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }
}

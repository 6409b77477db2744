//! Window side table
//!
//! X11 window ids can be reused by the server, so each window gets its own
//! [`WindowId`] the first time it is seen. The id is kept until the window is
//! forgotten and is never regenerated for the same handle.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Window properties read from the X server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowInfo {
    pub xid: u32,
    /// WM_CLASS res_name
    pub instance: String,
    /// WM_CLASS res_class
    pub class: String,
    /// `_NET_WM_PID`, 0 when unset
    pub pid: u32,
    /// `_NET_WM_STATE_FULLSCREEN` set or the window covers a monitor
    pub fullscreen: bool,
    /// `_NET_WM_STATE_HIDDEN` (minimized)
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub id: WindowId,
    pub info: WindowInfo,
}

#[derive(Debug, Default)]
pub struct WindowTable {
    windows: HashMap<u32, WindowEntry>,
    next_id: u64,
}

impl WindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a window or refresh its properties.
    ///
    /// Returns the window's id and whether it was new.
    pub fn upsert(&mut self, info: WindowInfo) -> (WindowId, bool) {
        if let Some(entry) = self.windows.get_mut(&info.xid) {
            entry.info = info;
            return (entry.id, false);
        }

        self.next_id += 1;
        let id = WindowId(self.next_id);
        self.windows.insert(info.xid, WindowEntry { id, info });
        (id, true)
    }

    pub fn remove(&mut self, xid: u32) -> Option<WindowEntry> {
        self.windows.remove(&xid)
    }

    #[cfg(test)]
    pub fn get(&self, xid: u32) -> Option<&WindowEntry> {
        self.windows.get(&xid)
    }

    pub fn xids(&self) -> Vec<u32> {
        self.windows.keys().copied().collect()
    }

    /// Entries ordered by id, oldest first
    pub fn entries(&self) -> Vec<&WindowEntry> {
        let mut entries: Vec<_> = self.windows.values().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(xid: u32, class: &str) -> WindowInfo {
        WindowInfo {
            xid,
            class: class.into(),
            ..WindowInfo::default()
        }
    }

    #[test]
    fn test_id_is_stable_for_handle() {
        let mut table = WindowTable::new();
        let (id, new) = table.upsert(info(0x400001, "mpv"));
        assert!(new);

        let mut changed = info(0x400001, "mpv");
        changed.fullscreen = true;
        let (same, new) = table.upsert(changed);
        assert!(!new);
        assert_eq!(id, same);
        assert!(table.get(0x400001).unwrap().info.fullscreen);
    }

    #[test]
    fn test_reused_xid_gets_fresh_id() {
        let mut table = WindowTable::new();
        let (first, _) = table.upsert(info(7, "a"));
        table.remove(7);
        let (second, _) = table.upsert(info(7, "b"));

        assert_ne!(first, second);
        assert_eq!(second.to_string(), "window-2");
    }

    #[test]
    fn test_entries_ordered_by_id() {
        let mut table = WindowTable::new();
        table.upsert(info(30, "c"));
        table.upsert(info(10, "a"));
        table.upsert(info(20, "b"));

        let classes: Vec<_> = table.entries().iter().map(|e| e.info.class.clone()).collect();
        assert_eq!(classes, vec!["c", "a", "b"]);
    }
}

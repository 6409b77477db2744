//! Trigger Sources
//!
//! Each source decides on its own when it wants an inhibitor and emits
//! [`TriggerEvent`]s; the engine applies them to the registry. Sources keep
//! to their own key namespace so they never release each other's entries.

pub mod apps;
pub mod fullscreen;
pub mod user;

pub use apps::AllowlistMatcher;
pub use fullscreen::FullscreenDetector;
pub use user::UserToggle;

use crate::inhibitor::Origin;
use crate::wm::WindowId;

/// Key owned by the user toggle
pub const USER_KEY: &str = "user";

pub fn fullscreen_key(id: WindowId) -> String {
    format!("{id}-FullScreen")
}

pub fn app_key(app_id: &str) -> String {
    format!("{app_id}-UserApps")
}

/// Whether `key` lies in a namespace one of the sources claims from
pub fn is_owned_key(key: &str) -> bool {
    key == USER_KEY || key.ends_with("-FullScreen") || key.ends_with("-UserApps")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Want {
        key: String,
        reason: String,
        pid: u32,
        origin: Origin,
    },
    Release {
        key: String,
    },
    /// Drop every inhibitor this daemon holds
    ReleaseAll,
}

impl TriggerEvent {
    #[cfg(test)]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Want { key, .. } | Self::Release { key } => Some(key),
            Self::ReleaseAll => None,
        }
    }
}

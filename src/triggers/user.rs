//! User toggle

use super::{TriggerEvent, USER_KEY};
use crate::inhibitor::Origin;

#[derive(Debug, Default)]
pub struct UserToggle {
    enabled: bool,
    /// Switching off also releases fullscreen and app inhibitors
    release_all: bool,
}

impl UserToggle {
    pub fn new(release_all: bool) -> Self {
        Self {
            enabled: false,
            release_all,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_release_all(&mut self, release_all: bool) {
        self.release_all = release_all;
    }

    #[cfg(test)]
    pub fn toggle(&mut self) -> Vec<TriggerEvent> {
        self.set(!self.enabled)
    }

    /// Only a change of state produces events
    pub fn set(&mut self, enabled: bool) -> Vec<TriggerEvent> {
        if enabled == self.enabled {
            return Vec::new();
        }
        self.enabled = enabled;

        if enabled {
            return vec![TriggerEvent::Want {
                key: USER_KEY.to_string(),
                reason: "Inhibit by user".to_string(),
                pid: std::process::id(),
                origin: Origin::User,
            }];
        }

        let mut events = vec![TriggerEvent::Release {
            key: USER_KEY.to_string(),
        }];
        if self.release_all {
            events.push(TriggerEvent::ReleaseAll);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_emits_on_change_only() {
        let mut toggle = UserToggle::new(false);

        let on = toggle.toggle();
        assert_eq!(on.len(), 1);
        assert_eq!(on[0].key(), Some(USER_KEY));
        assert!(toggle.is_enabled());

        assert!(toggle.set(true).is_empty());

        assert_eq!(
            toggle.set(false),
            vec![TriggerEvent::Release { key: USER_KEY.to_string() }]
        );
        assert!(toggle.set(false).is_empty());
    }

    #[test]
    fn test_release_all_variant() {
        let mut toggle = UserToggle::new(true);
        toggle.set(true);

        let off = toggle.set(false);
        assert_eq!(off.last(), Some(&TriggerEvent::ReleaseAll));
    }
}

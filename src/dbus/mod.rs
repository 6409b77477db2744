//! Session bus services: the GNOME session manager, notifications and the
//! night light switch

use anyhow::{Context, Result};
use tracing::{info, warn};
use zbus::Connection;

pub mod night_light;
pub mod notifications;
pub mod session;

use night_light::NightLightService;
use notifications::NotificationService;
use session::SessionInhibitor;

pub struct DbusManager {
    conn: Connection,
}

impl DbusManager {
    pub async fn new() -> Result<Self> {
        let conn = Connection::session()
            .await
            .context("Failed to connect to D-Bus session bus")?;
        info!("Connected to D-Bus session bus");
        Ok(Self { conn })
    }

    /// The session manager is required, the daemon has nothing to do without it
    pub async fn session_inhibitor(&self) -> Result<SessionInhibitor> {
        SessionInhibitor::new(&self.conn)
            .await
            .context("GNOME session manager is not available")
    }

    pub async fn notifications(&self) -> Option<NotificationService> {
        NotificationService::new(&self.conn)
            .await
            .inspect_err(|e| warn!("Notifications unavailable: {}", e))
            .ok()
    }

    pub async fn night_light(&self) -> Option<NightLightService> {
        NightLightService::new(&self.conn)
            .await
            .inspect_err(|e| warn!("Night light control unavailable: {}", e))
            .ok()
    }
}

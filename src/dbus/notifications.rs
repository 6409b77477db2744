//! Desktop notifications via org.freedesktop.Notifications

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use zbus::{Connection, proxy};

use crate::reconciler::ICON_ON;

/// How long a state-change notification stays visible
const EXPIRE_TIMEOUT_MS: i32 = 3000;

/// Proxy for org.freedesktop.Notifications
#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    /// Show a notification
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, zbus::zvariant::Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

pub struct NotificationService {
    proxy: NotificationsProxy<'static>,
    /// Last notification shown, replaced by the next one
    last_id: AtomicU32,
}

impl NotificationService {
    pub async fn new(conn: &Connection) -> Result<Self> {
        let proxy = NotificationsProxy::new(conn).await?;
        Ok(Self {
            proxy,
            last_id: AtomicU32::new(0),
        })
    }

    /// Show a transient notification, replacing the previous one
    pub async fn show_simple(&self, title: &str, message: &str) -> Result<u32> {
        let mut hints = HashMap::new();
        hints.insert("transient", zbus::zvariant::Value::from(true));

        let id = self
            .proxy
            .notify(
                "Caffeine",
                self.last_id.load(Ordering::SeqCst),
                ICON_ON,
                title,
                message,
                &[],
                hints,
                EXPIRE_TIMEOUT_MS,
            )
            .await?;

        self.last_id.store(id, Ordering::SeqCst);
        Ok(id)
    }
}

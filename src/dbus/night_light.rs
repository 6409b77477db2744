//! Night light control via org.gnome.SettingsDaemon.Color

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use zbus::{Connection, proxy};

use crate::reconciler::NightLightControl;

/// Proxy for the GNOME color plugin
#[proxy(
    interface = "org.gnome.SettingsDaemon.Color",
    default_service = "org.gnome.SettingsDaemon.Color",
    default_path = "/org/gnome/SettingsDaemon/Color"
)]
trait Color {
    #[zbus(property)]
    fn night_light_active(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn disabled_until_tomorrow(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_disabled_until_tomorrow(&self, value: bool) -> zbus::Result<()>;
}

pub struct NightLightService {
    proxy: ColorProxy<'static>,
}

impl NightLightService {
    pub async fn new(conn: &Connection) -> Result<Self> {
        let proxy = ColorProxy::new(conn).await?;
        Ok(Self { proxy })
    }
}

#[async_trait]
impl NightLightControl for NightLightService {
    async fn pause_if_active(&self) -> Result<bool> {
        if !self.proxy.night_light_active().await? || self.proxy.disabled_until_tomorrow().await? {
            return Ok(false);
        }
        self.proxy.set_disabled_until_tomorrow(true).await?;
        info!("Night light paused");
        Ok(true)
    }

    async fn resume(&self) -> Result<()> {
        self.proxy.set_disabled_until_tomorrow(false).await?;
        info!("Night light resumed");
        Ok(())
    }
}

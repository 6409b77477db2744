//! Inhibitor management via org.gnome.SessionManager

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::{Connection, proxy};

use crate::inhibitor::remote::{InhibitBackend, InhibitorSignal, RemoteError};
use crate::inhibitor::{InhibitFlags, ObjectRef};

/// Proxy for the GNOME session manager
#[proxy(
    interface = "org.gnome.SessionManager",
    default_service = "org.gnome.SessionManager",
    default_path = "/org/gnome/SessionManager"
)]
trait SessionManager {
    /// Returns the inhibit cookie
    fn inhibit(&self, app_id: &str, toplevel_xid: u32, reason: &str, flags: u32) -> zbus::Result<u32>;

    fn uninhibit(&self, inhibit_cookie: u32) -> zbus::Result<()>;

    fn get_inhibitors(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[zbus(signal)]
    fn inhibitor_added(&self, id: ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    fn inhibitor_removed(&self, id: ObjectPath<'_>) -> zbus::Result<()>;
}

/// Proxy for a single inhibitor object
#[proxy(
    interface = "org.gnome.SessionManager.Inhibitor",
    default_service = "org.gnome.SessionManager"
)]
trait Inhibitor {
    fn get_app_id(&self) -> zbus::Result<String>;

    fn get_reason(&self) -> zbus::Result<String>;

    fn get_flags(&self) -> zbus::Result<u32>;
}

/// [`InhibitBackend`] backed by the session bus
pub struct SessionInhibitor {
    conn: Connection,
    manager: SessionManagerProxy<'static>,
}

impl SessionInhibitor {
    pub async fn new(conn: &Connection) -> zbus::Result<Self> {
        let manager = SessionManagerProxy::new(conn).await?;
        Ok(Self {
            conn: conn.clone(),
            manager,
        })
    }

    async fn inhibitor(&self, object: &ObjectRef) -> Result<InhibitorProxy<'static>, RemoteError> {
        let path = OwnedObjectPath::try_from(object.as_str())
            .map_err(|_| RemoteError::InvalidObjectPath(object.to_string()))?;
        Ok(InhibitorProxy::builder(&self.conn).path(path)?.build().await?)
    }
}

#[async_trait]
impl InhibitBackend for SessionInhibitor {
    async fn inhibit(
        &self,
        app_id: &str,
        pid: u32,
        reason: &str,
        flags: InhibitFlags,
    ) -> Result<u32, RemoteError> {
        Ok(self.manager.inhibit(app_id, pid, reason, flags.bits()).await?)
    }

    async fn uninhibit(&self, cookie: u32) -> Result<(), RemoteError> {
        Ok(self.manager.uninhibit(cookie).await?)
    }

    async fn inhibitors(&self) -> Result<Vec<ObjectRef>, RemoteError> {
        Ok(self
            .manager
            .get_inhibitors()
            .await?
            .into_iter()
            .map(|path| ObjectRef::new(path.as_str()))
            .collect())
    }

    async fn flags(&self, object: &ObjectRef) -> Result<InhibitFlags, RemoteError> {
        let bits = self.inhibitor(object).await?.get_flags().await?;
        Ok(InhibitFlags::from_bits_retain(bits))
    }

    async fn app_id(&self, object: &ObjectRef) -> Result<String, RemoteError> {
        Ok(self.inhibitor(object).await?.get_app_id().await?)
    }

    async fn reason(&self, object: &ObjectRef) -> Result<String, RemoteError> {
        Ok(self.inhibitor(object).await?.get_reason().await?)
    }

    async fn signals(&self) -> Result<BoxStream<'static, InhibitorSignal>, RemoteError> {
        let added = self.manager.receive_inhibitor_added().await?.filter_map(|signal| {
            future::ready(
                signal
                    .args()
                    .ok()
                    .map(|args| InhibitorSignal::Added(ObjectRef::new(args.id().as_str()))),
            )
        });
        let removed = self.manager.receive_inhibitor_removed().await?.filter_map(|signal| {
            future::ready(
                signal
                    .args()
                    .ok()
                    .map(|args| InhibitorSignal::Removed(ObjectRef::new(args.id().as_str()))),
            )
        });

        Ok(stream::select(added, removed).boxed())
    }
}

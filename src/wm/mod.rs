//! Window tracking
//!
//! [`WindowWatcher`] follows the client windows the window manager publishes
//! in `_NET_CLIENT_LIST` and reports when they open, close, or change their
//! fullscreen state.

pub mod ewmh;
pub mod tracker;

pub use tracker::{WindowEntry, WindowId, WindowInfo, WindowTable};

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::shared::window_state::Geometry;
use crate::x11_async::X11EventStream;
use ewmh::Atoms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Opened(WindowInfo),
    Changed(WindowInfo),
    Closed(u32),
}

pub struct WindowWatcher {
    conn: Arc<RustConnection>,
    events: X11EventStream,
    root: Window,
    atoms: Atoms,
    screen: Geometry,
    monitors: Vec<Geometry>,
    clients: BTreeSet<Window>,
    /// Events are ignored until the first scan
    scanned: bool,
}

/// Windows that disappeared and windows that appeared, in that order
fn diff_clients(known: &BTreeSet<Window>, current: &BTreeSet<Window>) -> (Vec<Window>, Vec<Window>) {
    (
        known.difference(current).copied().collect(),
        current.difference(known).copied().collect(),
    )
}

impl WindowWatcher {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X server")?;
        let conn = Arc::new(conn);

        let (root, screen) = {
            let screen = &conn.setup().roots[screen_num];
            (
                screen.root,
                Geometry::new(0, 0, screen.width_in_pixels as u32, screen.height_in_pixels as u32),
            )
        };
        let atoms = Atoms::new(conn.as_ref())?;

        let mask = EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY;
        conn.change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(mask))?
            .check()
            .context("Failed to select events on the root window")?;

        let events = X11EventStream::new(conn.clone())?;
        let mut watcher = Self {
            conn,
            events,
            root,
            atoms,
            screen,
            monitors: Vec::new(),
            clients: BTreeSet::new(),
            scanned: false,
        };
        watcher.refresh_monitors();
        watcher.events.flush()?;

        info!("Watching windows on {} monitor(s)", watcher.monitors.len());
        Ok(watcher)
    }

    pub async fn readable(&self) {
        self.events.wait_readable().await;
    }

    /// Report every managed window and start following changes
    pub fn scan(&mut self) -> Result<Vec<WindowEvent>> {
        self.scanned = true;
        let events = self.sync_clients()?;
        self.events.flush()?;
        Ok(events)
    }

    /// Translate the queued X events
    pub fn drain(&mut self) -> Result<Vec<WindowEvent>> {
        let mut out = Vec::new();
        while let Some(event) = self.events.poll_next_event()? {
            if self.scanned {
                self.handle_event(event, &mut out)?;
            }
        }
        self.events.flush()?;
        Ok(out)
    }

    fn handle_event(&mut self, event: Event, out: &mut Vec<WindowEvent>) -> Result<()> {
        match event {
            Event::PropertyNotify(e) if e.window == self.root => {
                if e.atom == self.atoms.net_client_list {
                    out.extend(self.sync_clients()?);
                }
            }
            Event::PropertyNotify(e) if e.atom == self.atoms.net_wm_state => {
                self.changed(e.window, out);
            }
            Event::ConfigureNotify(e) if e.window == self.root => {
                self.screen.width = e.width as u32;
                self.screen.height = e.height as u32;
                self.refresh_monitors();
                let clients: Vec<Window> = self.clients.iter().copied().collect();
                for window in clients {
                    self.changed(window, out);
                }
            }
            Event::ConfigureNotify(e) => self.changed(e.window, out),
            Event::DestroyNotify(e) => {
                if self.clients.remove(&e.window) {
                    out.push(WindowEvent::Closed(e.window));
                }
            }
            Event::Error(err) => debug!("X11 error: {:?}", err),
            _ => {}
        }
        Ok(())
    }

    fn changed(&self, window: Window, out: &mut Vec<WindowEvent>) {
        if !self.clients.contains(&window) {
            return;
        }
        match self.read_window(window) {
            Ok(info) => out.push(WindowEvent::Changed(info)),
            Err(err) => debug!("Window 0x{:x} went away: {:#}", window, err),
        }
    }

    fn sync_clients(&mut self) -> Result<Vec<WindowEvent>> {
        let current: BTreeSet<Window> = ewmh::client_list(self.conn.as_ref(), &self.atoms, self.root)?
            .into_iter()
            .collect();
        let (closed, opened) = diff_clients(&self.clients, &current);
        self.clients = current;

        let mut out: Vec<WindowEvent> = closed.into_iter().map(WindowEvent::Closed).collect();
        for window in opened {
            self.select_client(window);
            match self.read_window(window) {
                Ok(info) => out.push(WindowEvent::Opened(info)),
                Err(err) => {
                    debug!("Skipping window 0x{:x}: {:#}", window, err);
                    self.clients.remove(&window);
                }
            }
        }
        Ok(out)
    }

    fn select_client(&self, window: Window) {
        let mask = EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY;
        if let Err(err) = self
            .conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(mask))
        {
            debug!("Failed to select events on 0x{:x}: {}", window, err);
        }
    }

    fn read_window(&self, window: Window) -> Result<WindowInfo> {
        let conn = self.conn.as_ref();
        let (instance, class) = ewmh::wm_class(conn, window)?;
        let pid = ewmh::wm_pid(conn, &self.atoms, window)?;
        let state = ewmh::wm_state(conn, &self.atoms, window)?;
        let geometry = self.geometry(window)?;

        Ok(WindowInfo {
            xid: window,
            instance,
            class,
            pid,
            fullscreen: state.contains(&self.atoms.net_wm_state_fullscreen)
                || geometry.covers_any(&self.monitors),
            hidden: state.contains(&self.atoms.net_wm_state_hidden),
        })
    }

    /// Window geometry in root coordinates
    fn geometry(&self, window: Window) -> Result<Geometry> {
        let size = self.conn.get_geometry(window)?.reply()?;
        let origin = self.conn.translate_coordinates(window, self.root, 0, 0)?.reply()?;
        Ok(Geometry::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            size.width as u32,
            size.height as u32,
        ))
    }

    fn refresh_monitors(&mut self) {
        self.monitors = match self.query_monitors() {
            Ok(monitors) if !monitors.is_empty() => monitors,
            Ok(_) => vec![self.screen],
            Err(err) => {
                debug!("RandR monitors unavailable, using the screen: {:#}", err);
                vec![self.screen]
            }
        };
    }

    fn query_monitors(&self) -> Result<Vec<Geometry>> {
        let reply = self.conn.randr_get_monitors(self.root, true)?.reply()?;
        Ok(reply
            .monitors
            .iter()
            .map(|m| Geometry::new(m.x as i32, m.y as i32, m.width as u32, m.height as u32))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_clients() {
        let known: BTreeSet<Window> = [1, 2, 3].into();
        let current: BTreeSet<Window> = [2, 3, 4, 5].into();

        let (closed, opened) = diff_clients(&known, &current);
        assert_eq!(closed, vec![1]);
        assert_eq!(opened, vec![4, 5]);

        let (closed, opened) = diff_clients(&current, &current);
        assert!(closed.is_empty() && opened.is_empty());
    }
}

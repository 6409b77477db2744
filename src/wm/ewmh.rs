//! EWMH properties read from client windows

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;

/// Interned atoms the watcher needs
#[derive(Debug, Clone, Copy)]
pub struct Atoms {
    pub net_client_list: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_fullscreen: Atom,
    pub net_wm_state_hidden: Atom,
    pub net_wm_pid: Atom,
}

impl Atoms {
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
        };

        Ok(Self {
            net_client_list: intern("_NET_CLIENT_LIST")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern("_NET_WM_STATE_FULLSCREEN")?,
            net_wm_state_hidden: intern("_NET_WM_STATE_HIDDEN")?,
            net_wm_pid: intern("_NET_WM_PID")?,
        })
    }
}

/// Split a WM_CLASS value (`res_name\0res_class\0`) into instance and class
pub fn parse_wm_class(value: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(value);
    let mut parts = text.split('\0').filter(|part| !part.is_empty());

    match (parts.next(), parts.next()) {
        (Some(instance), Some(class)) => (instance.to_string(), class.to_string()),
        // some clients only set one string
        (Some(only), None) => (only.to_string(), only.to_string()),
        _ => (String::new(), String::new()),
    }
}

pub fn wm_class<C: Connection>(conn: &C, window: Window) -> Result<(String, String)> {
    let reply = conn
        .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)?
        .reply()?;
    Ok(parse_wm_class(&reply.value))
}

/// `_NET_WM_PID`, 0 when the client does not set it
pub fn wm_pid<C: Connection>(conn: &C, atoms: &Atoms, window: Window) -> Result<u32> {
    let reply = conn
        .get_property(false, window, atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)?
        .reply()?;
    Ok(reply.value32().and_then(|mut values| values.next()).unwrap_or(0))
}

/// Atoms in `_NET_WM_STATE`
pub fn wm_state<C: Connection>(conn: &C, atoms: &Atoms, window: Window) -> Result<Vec<Atom>> {
    let reply = conn
        .get_property(false, window, atoms.net_wm_state, AtomEnum::ATOM, 0, 64)?
        .reply()?;
    Ok(reply.value32().map(|values| values.collect()).unwrap_or_default())
}

/// Managed client windows from `_NET_CLIENT_LIST`
pub fn client_list<C: Connection>(conn: &C, atoms: &Atoms, root: Window) -> Result<Vec<Window>> {
    let reply = conn
        .get_property(false, root, atoms.net_client_list, AtomEnum::WINDOW, 0, u32::MAX)?
        .reply()?;
    Ok(reply.value32().map(|values| values.collect()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wm_class() {
        assert_eq!(
            parse_wm_class(b"Navigator\0firefox\0"),
            ("Navigator".to_string(), "firefox".to_string())
        );
        assert_eq!(parse_wm_class(b"mpv\0"), ("mpv".to_string(), "mpv".to_string()));
        assert_eq!(parse_wm_class(b""), (String::new(), String::new()));
    }
}

//! Caffeine IPC Protocol
//!
//! Shared message types for communication between the `caffeine` daemon
//! and its clients (the CLI subcommands and panel widgets).

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Socket path for IPC communication
pub fn socket_path() -> std::path::PathBuf {
    runtime_dir().join("caffeine.sock")
}

/// Path of the status snapshot written on every change
pub fn status_path() -> std::path::PathBuf {
    runtime_dir().join("caffeine-status.json")
}

fn runtime_dir() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    std::path::PathBuf::from(runtime_dir)
}

// ============================================================================
// Client → Daemon Requests
// ============================================================================

/// Requests sent by a client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Report the current status
    Status,

    /// Flip the user toggle
    Toggle,

    /// Force the user toggle on or off
    SetUser { enabled: bool },

    /// Re-read the configuration file
    Reload,
}

// ============================================================================
// Daemon → Client Replies
// ============================================================================

/// Replies sent by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlReply {
    /// Current status snapshot
    Status(StatusSnapshot),

    /// Request failed
    Error { message: String },
}

/// Where an inhibitor came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    AppFullscreen,
    AppAllowlist,
    System,
}

/// One inhibitor as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    pub reason: String,
    pub pid: u32,
    pub origin: Origin,
    /// `false` while the session manager has not granted the request yet
    pub confirmed: bool,
}

/// One tracked window as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub id: String,
    pub class: String,
    pub instance: String,
    pub fullscreen: bool,
    pub inhibited: bool,
}

/// Full daemon state published after every change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub inhibited: bool,
    pub user_enabled: bool,
    /// Icon name for the panel, `None` when the indicator is hidden
    pub icon: Option<String>,
    pub entries: Vec<EntrySummary>,
    pub windows: Vec<WindowSummary>,
}

// ============================================================================
// Message Framing
// ============================================================================

/// A framed message with length prefix for reliable socket reads
#[derive(Debug)]
pub struct FramedMessage {
    pub data: Vec<u8>,
}

impl FramedMessage {
    /// Create a new framed message from serializable data
    pub fn new<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        let data = serde_json::to_vec(msg)?;
        Ok(Self { data })
    }

    /// Encode message with length prefix (4 bytes, big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let len = self.data.len() as u32;
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode_request(data: &[u8]) -> anyhow::Result<ControlRequest> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn decode_reply(data: &[u8]) -> anyhow::Result<ControlReply> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Read one length-prefixed frame, `None` on a clean end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("Message too large: {} bytes", len);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Serialize and write one frame
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    msg: &T,
) -> anyhow::Result<()> {
    let encoded = FramedMessage::new(msg)?.encode();
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

//! Control socket
//!
//! Clients send one [`ControlRequest`] per frame and get one [`ControlReply`]
//! back. Requests are forwarded to the engine loop together with a reply
//! channel.

use anyhow::{Context, Result};
use caffeine_ipc::{ControlReply, ControlRequest, FramedMessage, read_frame, socket_path, write_frame};
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A request waiting for the engine's answer
pub struct ControlMessage {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlReply>,
}

/// Accepts control connections until dropped
pub struct IpcServer {
    path: PathBuf,
    acceptor: JoinHandle<()>,
}

impl IpcServer {
    pub async fn start(requests: mpsc::Sender<ControlMessage>) -> Result<Self> {
        Self::bind(socket_path(), requests).await
    }

    pub async fn bind(path: PathBuf, requests: mpsc::Sender<ControlMessage>) -> Result<Self> {
        // Remove a stale socket left by a previous run
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove stale socket")?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind control socket {:?}", path))?;
        info!("Control socket listening on {:?}", path);

        let acceptor = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_client(stream, requests.clone()));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(Self { path, acceptor })
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.acceptor.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_client(stream: UnixStream, requests: mpsc::Sender<ControlMessage>) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Dropping control client: {}", e);
                break;
            }
        };

        let reply = match FramedMessage::decode_request(&frame) {
            Ok(request) => forward(&requests, request).await,
            Err(e) => ControlReply::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        if write_frame(&mut writer, &reply).await.is_err() {
            break;
        }
    }
    debug!("Control client disconnected");
}

async fn forward(requests: &mpsc::Sender<ControlMessage>, request: ControlRequest) -> ControlReply {
    let (reply, response) = oneshot::channel();
    if requests.send(ControlMessage { request, reply }).await.is_err() {
        return ControlReply::Error {
            message: "Daemon is shutting down".into(),
        };
    }
    response.await.unwrap_or_else(|_| ControlReply::Error {
        message: "Request dropped".into(),
    })
}

/// Send one request to a running daemon
pub async fn send_request(request: &ControlRequest) -> Result<ControlReply> {
    send_request_to(&socket_path(), request).await
}

pub async fn send_request_to(path: &std::path::Path, request: &ControlRequest) -> Result<ControlReply> {
    let stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("Is the daemon running? Failed to connect to {:?}", path))?;
    let (mut reader, mut writer) = stream.into_split();

    write_frame(&mut writer, request).await?;
    let frame = read_frame(&mut reader)
        .await?
        .context("Daemon closed the connection")?;
    FramedMessage::decode_reply(&frame)
}

//! Async readiness for the X11 connection
//!
//! A blocking thread polls the connection's socket with mio and wakes the
//! event loop through a [`Notify`]. Events are then drained without blocking.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Notify, oneshot};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

const X11_TOKEN: mio::Token = mio::Token(0);

pub struct X11EventStream {
    conn: Arc<RustConnection>,
    readable: Arc<Notify>,
    /// Dropping this stops the polling thread
    _alive: oneshot::Receiver<()>,
}

impl X11EventStream {
    pub fn new(conn: Arc<RustConnection>) -> Result<Self> {
        let fd = conn.stream().as_raw_fd();
        let readable = Arc::new(Notify::new());
        let waker = readable.clone();
        let (alive_tx, alive_rx) = oneshot::channel::<()>();

        let mut poll = mio::Poll::new().context("Failed to create mio Poll")?;
        poll.registry()
            .register(&mut mio::unix::SourceFd(&fd), X11_TOKEN, mio::Interest::READABLE)
            .context("Failed to register X11 socket with mio")?;

        tokio::task::spawn_blocking(move || {
            let mut events = mio::Events::with_capacity(1);
            while !alive_tx.is_closed() {
                if let Err(err) = poll.poll(&mut events, Some(Duration::from_millis(100))) {
                    tracing::warn!("X11 socket poll failed: {:?}", err);
                    continue;
                }
                if events.iter().any(|event| event.token() == X11_TOKEN) {
                    waker.notify_one();
                }
            }
            tracing::debug!("X11 polling thread stopped");
        });

        Ok(Self {
            conn,
            readable,
            _alive: alive_rx,
        })
    }

    /// Next queued event, `None` once the buffer is drained
    pub fn poll_next_event(&self) -> Result<Option<Event>> {
        Ok(self.conn.poll_for_event()?)
    }

    pub async fn wait_readable(&self) {
        self.readable.notified().await;
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

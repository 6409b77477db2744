//! caffeine
//!
//! Keeps the GNOME session from idling or suspending while the user asks for
//! it, while a window is fullscreen, or while an allowlisted application runs.
//! Inhibitors held by other applications are mirrored so the status reflects
//! everything that keeps the session awake.

mod config;
mod dbus;
mod engine;
mod inhibitor;
mod ipc;
mod reconciler;
mod shared;
mod triggers;
mod wm;
mod x11_async;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use caffeine_ipc::{ControlReply, ControlRequest};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{Config, State};
use dbus::DbusManager;
use engine::Engine;
use inhibitor::RemoteClient;
use ipc::IpcServer;
use reconciler::{DesktopEffects, NightLightControl, StatusPublisher};
use wm::WindowWatcher;

#[derive(Parser)]
#[command(name = "caffeine", version, about = "Keep the session awake")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Daemon,
    /// Print the daemon status as JSON
    Status,
    /// Flip the user toggle
    Toggle,
    /// Inhibit until turned off
    On,
    /// Stop the user inhibition
    Off,
    /// Re-read the configuration file
    Reload,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "caffeine=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let request = match cli.command.unwrap_or(Command::Daemon) {
        Command::Daemon => return run_daemon().await,
        Command::Status => ControlRequest::Status,
        Command::Toggle => ControlRequest::Toggle,
        Command::On => ControlRequest::SetUser { enabled: true },
        Command::Off => ControlRequest::SetUser { enabled: false },
        Command::Reload => ControlRequest::Reload,
    };

    match ipc::send_request(&request).await? {
        ControlReply::Status(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        ControlReply::Error { message } => anyhow::bail!(message),
    }
    Ok(())
}

async fn run_daemon() -> Result<()> {
    info!("Starting caffeine");

    let config = Config::load().context("Failed to load configuration")?;

    let dbus = DbusManager::new().await?;
    let session = dbus.session_inhibitor().await?;
    let notifications = dbus.notifications().await;
    let night_light = dbus.night_light().await;

    let night_light = night_light.map(|service| Arc::new(service) as Arc<dyn NightLightControl>);
    let effects = Arc::new(DesktopEffects::new(notifications, night_light, &config));
    let publisher = StatusPublisher::new(effects, Some(caffeine_ipc::status_path()));

    let (remote_tx, mut remote_rx) = mpsc::unbounded_channel();
    let remote = RemoteClient::new(Arc::new(session), remote_tx);

    let state_path = State::state_path()
        .inspect_err(|e| warn!("User toggle will not be persisted: {:#}", e))
        .ok();
    let mut engine = Engine::new(config, remote, publisher, state_path);

    let (control_tx, mut control_rx) = mpsc::channel(16);
    let _server = IpcServer::start(control_tx).await?;

    let mut watcher = match WindowWatcher::connect() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Window tracking disabled: {:#}", e);
            None
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    engine.start().await;

    // Windows are scanned once the session had time to map them
    let scan = tokio::time::sleep(engine.config().fullscreen_settle());
    tokio::pin!(scan);
    let mut scanned = false;

    loop {
        let fullscreen_deadline = engine.fullscreen_deadline();

        tokio::select! {
            Some(event) = remote_rx.recv() => engine.handle_remote(event),

            Some(message) = control_rx.recv() => {
                let reply = engine.handle_control(message.request);
                let _ = message.reply.send(reply);
            }

            () = async {
                match &watcher {
                    Some(watcher) => watcher.readable().await,
                    None => std::future::pending().await,
                }
            } => {
                let drained = watcher.as_mut().map(WindowWatcher::drain);
                match drained {
                    Some(Ok(events)) => events.into_iter().for_each(|event| engine.handle_window(event)),
                    Some(Err(e)) => {
                        error!("X11 connection lost, window tracking disabled: {:#}", e);
                        watcher = None;
                        engine.windows_lost();
                    }
                    None => {}
                }
            }

            () = &mut scan, if !scanned => {
                scanned = true;
                if let Some(active) = watcher.as_mut() {
                    match active.scan() {
                        Ok(events) => {
                            info!("Found {} window(s)", events.len());
                            events.into_iter().for_each(|event| engine.handle_window(event));
                            engine.run_fullscreen_check();
                        }
                        Err(e) => {
                            error!("Initial window scan failed, window tracking disabled: {:#}", e);
                            watcher = None;
                        }
                    }
                }
            }

            () = tokio::time::sleep_until(fullscreen_deadline.unwrap_or_else(tokio::time::Instant::now)),
                if fullscreen_deadline.is_some() => engine.run_fullscreen_check(),

            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                if let Err(e) = engine.reload() {
                    warn!("Keeping current configuration: {:#}", e);
                }
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

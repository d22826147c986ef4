//! Distributed work server daemon.
//!
//! Loads a JSON configuration, starts the server task and serves workers
//! over WebSocket until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use distri_server::tracing::{self, prelude::*};
use distri_server::{transport, Config, Notification, ServerBuilder};

#[derive(Parser)]
#[command(name = "distri-server", about = "Distributed work server")]
struct Cli {
    /// JSON configuration file
    #[arg(long, env = "DISTRI_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding connection.listen
    #[arg(long, env = "DISTRI_LISTEN")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.connection.listen = listen;
    }

    let listen = config.connection.listen;
    let path = config.connection.path.clone();
    let mut builder = ServerBuilder::new(config);
    let notifications = builder.notifications();
    let (server, handle) = builder.build().context("invalid configuration")?;

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn(log_notifications(notifications));
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = server.run(running).await {
                error!(error = %e, "Server stopped");
            }
        }
    });
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = transport::serve(listener, handle, &path, running).await {
                error!(error = %e, "Transport stopped");
            }
        }
    });
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm =
        unix::signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}

// Ends once the server task drops its side.
async fn log_notifications(mut notifications: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::WorkgroupAccepted { work, value } => {
                info!(%work, %value, "Workgroup accepted");
            }
            Notification::WorkgroupRejected { work, solutions } => {
                warn!(%work, solutions = solutions.len(), "Workgroup rejected");
            }
            Notification::AllWorkComplete => info!("All work complete"),
        }
    }
}

//! Command interface to a running server.
//!
//! Transports and the application never touch server state directly. They
//! send a [`ServerCommand`] through a [`ServerHandle`]; commands that need
//! an answer carry a oneshot response channel.

use std::ops::Range;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::ConnectionId;
use crate::error::{Error, Result};
use crate::protocol::Outgoing;

/// Commands that can be sent to the server task.
#[derive(Debug)]
pub enum ServerCommand {
    /// A transport accepted a client.
    Connect {
        /// Where the server writes frames for this client
        outbound: mpsc::UnboundedSender<Outgoing>,
        response_tx: oneshot::Sender<ConnectionId>,
    },
    /// One text frame from a client.
    Message { connection: ConnectionId, text: String },
    /// The client went away.
    Disconnect { connection: ConnectionId },
    /// Hang up on a client.
    Close {
        connection: ConnectionId,
        reason: String,
    },
    /// Append work to the session.
    AddWork {
        work: Vec<Value>,
        response_tx: oneshot::Sender<Result<Range<usize>>>,
    },
    /// Snapshot of the server's counters.
    Stats {
        response_tx: oneshot::Sender<ServerStats>,
    },
}

/// Counters describing the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Session generation, bumped each time all work completes
    pub generation: u64,
    /// Work items in the session
    pub session_len: usize,
    /// Items with spare capacity
    pub remaining: usize,
    /// Items accepted
    pub solved: usize,
    /// Items awaiting a verification decision
    pub pending: usize,
    /// Connected clients, admitted or not
    pub connections: usize,
    /// Clients held by the admission gate
    pub queued: usize,
}

/// Cloneable handle to the server task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    cmd_tx: mpsc::Sender<ServerCommand>,
}

impl ServerHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<ServerCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn send(&self, cmd: ServerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Server("server task stopped".to_string()))
    }

    async fn request<T>(&self, rx: oneshot::Receiver<T>, cmd: ServerCommand) -> Result<T> {
        self.send(cmd).await?;
        rx.await
            .map_err(|_| Error::Server("server dropped the request".to_string()))
    }

    /// Register a new client and get its id.
    pub async fn connect(&self, outbound: mpsc::UnboundedSender<Outgoing>) -> Result<ConnectionId> {
        let (response_tx, rx) = oneshot::channel();
        self.request(
            rx,
            ServerCommand::Connect {
                outbound,
                response_tx,
            },
        )
        .await
    }

    pub async fn message(&self, connection: ConnectionId, text: String) -> Result<()> {
        self.send(ServerCommand::Message { connection, text }).await
    }

    pub async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.send(ServerCommand::Disconnect { connection }).await
    }

    pub async fn close(&self, connection: ConnectionId, reason: impl Into<String>) -> Result<()> {
        self.send(ServerCommand::Close {
            connection,
            reason: reason.into(),
        })
        .await
    }

    /// Append work; returns the indices it was given.
    pub async fn add_work(&self, work: Vec<Value>) -> Result<Range<usize>> {
        let (response_tx, rx) = oneshot::channel();
        self.request(rx, ServerCommand::AddWork { work, response_tx })
            .await?
    }

    pub async fn stats(&self) -> Result<ServerStats> {
        let (response_tx, rx) = oneshot::channel();
        self.request(rx, ServerCommand::Stats { response_tx }).await
    }
}

//! The work server.
//!
//! [`Server`] owns every piece of mutable state: the session, the remaining
//! set, the counters, and the connection table. It runs as a single task
//! that handles one [`ServerCommand`] or decision at a time, so nothing in
//! here needs a lock. Everything else talks to it through a
//! [`ServerHandle`].
//!
//! ```text
//!  transport ---Connect/Message/Disconnect--+
//!                                           v
//!  application --AddWork/Stats/Close--> [ Server ] --events--> application
//!                                           ^                       |
//!                                           +------decisions--------+
//! ```

mod connections;
mod decisions;
mod events;
mod handle;
mod timeout;

use std::collections::BTreeMap;
use std::ops::Range;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use slotmap::SlotMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionGate;
use crate::allocator::IndexAllocator;
use crate::config::{Config, DeliveryFile};
use crate::connection::{Connection, ConnectionId};
use crate::error::Result;
use crate::hashcash::HashCash;
use crate::session::{RemainingSet, SessionStore};
use crate::tracing::prelude::*;
use crate::verification::{VerificationEngine, Verdict};

pub use events::{
    Listeners, Notification, SubmissionDecision, WorkSubmitted, WorkgroupComplete,
    WorkgroupDecision,
};
pub use handle::{ServerCommand, ServerHandle, ServerStats};
pub use timeout::TimeoutPolicy;

/// Depth of the command queue between handles and the server task.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// An outstanding application decision, resolved in any order.
type PendingDecision = BoxFuture<'static, Resolution>;

/// A decision that came back from the application.
#[derive(Debug)]
enum Resolution {
    Submission {
        generation: u64,
        index: usize,
        solution: Value,
        /// `None` if the decision handle was dropped
        accepted: Option<bool>,
    },
    Workgroup {
        generation: u64,
        index: usize,
        verdict: Option<Verdict>,
    },
}

/// Builds a [`Server`] and registers application listeners.
pub struct ServerBuilder {
    config: Config,
    listeners: Listeners,
    seed: Option<u64>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            listeners: Listeners::default(),
            seed: None,
        }
    }

    /// Decide on every individual submission.
    pub fn work_submitted(&mut self) -> mpsc::UnboundedReceiver<WorkSubmitted> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.work_submitted = Some(tx);
        rx
    }

    /// Decide on every complete workgroup instead of the default policy.
    pub fn workgroup_complete(&mut self) -> mpsc::UnboundedReceiver<WorkgroupComplete> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.workgroup_complete = Some(tx);
        rx
    }

    /// Receive accept/reject/completion notifications.
    pub fn notifications(&mut self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.notifications = Some(tx);
        rx
    }

    /// Make work allocation reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration and load the initial work.
    pub fn build(self) -> Result<(Server, ServerHandle)> {
        let config = self.config;
        config.validate()?;

        let security = &config.security;
        let mut store = SessionStore::from_mode(&config.mode, security.verification_strength)?;
        let mut remaining = RemainingSet::new();
        if !config.work.is_empty() {
            let added = store.add(config.work.clone())?;
            remaining.extend(added.indices);
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let server = Server {
            store,
            remaining,
            allocator: self
                .seed
                .map_or_else(IndexAllocator::new, IndexAllocator::with_seed),
            hashcash: HashCash::new(security.hash_strength),
            engine: VerificationEngine::new(security.equality_percentage),
            gate: AdmissionGate::new(security.min_users),
            timeouts: TimeoutPolicy::new(config.assignment_timeout()),
            strict: security.strict,
            files: config.files.clone(),
            connections: SlotMap::with_key(),
            listeners: self.listeners,
            pending: FuturesUnordered::new(),
            cmd_rx,
            generation: 0,
            solved: 0,
            verifying: 0,
        };

        info!(
            typing = %config.mode.typing,
            work = server.store.len(),
            verification_strength = security.verification_strength,
            hash_strength = security.hash_strength,
            equality_percentage = security.equality_percentage,
            min_users = security.min_users,
            strict = security.strict,
            "Server configured"
        );

        Ok((server, ServerHandle::new(cmd_tx)))
    }
}

/// The work server state and event loop.
pub struct Server {
    store: SessionStore,
    remaining: RemainingSet,
    allocator: IndexAllocator,
    hashcash: HashCash,
    engine: VerificationEngine,
    gate: AdmissionGate<ConnectionId>,
    timeouts: TimeoutPolicy,
    strict: bool,
    files: BTreeMap<String, DeliveryFile>,
    connections: SlotMap<ConnectionId, Connection>,
    listeners: Listeners,
    pending: FuturesUnordered<PendingDecision>,
    cmd_rx: mpsc::Receiver<ServerCommand>,
    /// Bumped whenever a session completes; stale indices carry an old value
    generation: u64,
    /// Items accepted in this session
    solved: usize,
    /// Items whose workgroup verdict is outstanding
    verifying: usize,
}

impl Server {
    /// Run the event loop until `running` is cancelled.
    pub async fn run(mut self, running: CancellationToken) -> Result<()> {
        let mut sweep = tokio::time::interval(self.timeouts.sweep_period());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!("Server loop started.");
        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd);
                }
                Some(resolution) = self.pending.next(), if !self.pending.is_empty() => {
                    self.resolve(resolution);
                }
                _ = sweep.tick(), if self.timeouts.is_enabled() => {
                    self.reclaim_stalled(Instant::now());
                }
            }
        }

        for (_, connection) in self.connections.iter_mut() {
            connection.close("server shutting down");
        }
        debug!("Server loop stopped.");
        Ok(())
    }

    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                outbound,
                response_tx,
            } => {
                let id = self.connect(outbound);
                if response_tx.send(id).is_err() {
                    // The transport gave up before it learned its id.
                    self.disconnect(id);
                }
            }
            ServerCommand::Message { connection, text } => {
                self.handle_message(connection, &text);
            }
            ServerCommand::Disconnect { connection } => {
                self.disconnect(connection);
            }
            ServerCommand::Close { connection, reason } => {
                self.close_connection(connection, &reason);
            }
            ServerCommand::AddWork { work, response_tx } => {
                let _ = response_tx.send(self.add_work(work));
            }
            ServerCommand::Stats { response_tx } => {
                let _ = response_tx.send(self.stats());
            }
        }
    }

    /// Append work to the session.
    ///
    /// Connections that were told there is no work are sent a fresh
    /// challenge.
    pub fn add_work(&mut self, work: Vec<Value>) -> Result<Range<usize>> {
        let added = self.store.add(work)?;
        self.remaining.extend(added.indices.clone());

        info!(
            generation = self.generation,
            added = added.indices.len(),
            session_len = self.store.len(),
            "Work added"
        );

        if !added.indices.is_empty() {
            self.notify_starved();
        }
        Ok(added.indices)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            generation: self.generation,
            session_len: self.store.len(),
            remaining: self.remaining.len(),
            solved: self.solved,
            pending: self.verifying,
            connections: self.connections.len(),
            queued: self.gate.queued(),
        }
    }

    /// Wait for the next application decision and apply it.
    ///
    /// Returns false if no decision is outstanding.
    pub async fn apply_next_decision(&mut self) -> bool {
        match self.pending.next().await {
            Some(resolution) => {
                self.resolve(resolution);
                true
            }
            None => false,
        }
    }

    /// Number of application decisions not yet applied.
    pub fn outstanding_decisions(&self) -> usize {
        self.pending.len()
    }

    /// Read-only view of the session.
    pub fn session(&self) -> &SessionStore {
        &self.store
    }

    pub fn remaining(&self) -> &RemainingSet {
        &self.remaining
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    // Every item accepted: start over with an empty session.
    fn complete_session(&mut self) {
        info!(
            generation = self.generation,
            items = self.store.len(),
            "All work complete"
        );
        self.store.clear();
        self.remaining.clear();
        self.solved = 0;
        self.verifying = 0;
        self.generation += 1;
        self.listeners.notify(Notification::AllWorkComplete);
    }

    // Items either solved or waiting for a verdict; the allocator stops
    // handing out work once these cover the session.
    fn settled(&self) -> usize {
        self.solved + self.verifying
    }
}

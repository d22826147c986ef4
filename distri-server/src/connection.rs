//! Per-connection protocol state.
//!
//! ```text
//!   Queued --(gate opens)--> Admitted --request_hash--> ChallengeIssued
//!                                ^                        |      ^
//!                                | bad proof              |      | submit_work
//!                                +------------------------+      |
//!                                          good proof --> WorkHeld
//! ```
//!
//! A queued client that already sent `request_hash` skips straight to
//! `ChallengeIssued` when the gate opens. `request_hash` while a challenge
//! is outstanding repeats that challenge. `Closed` is reachable from every
//! state. The server owns every
//! [`Connection`]; transports only know the [`ConnectionId`].

use serde_json::Value;
use slotmap::new_key_type;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::hashcash::Challenge;
use crate::protocol::{Outgoing, ServerMessage};

new_key_type! {
    /// Handle for one client connection.
    pub struct ConnectionId;
}

/// A work item lent to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldWork {
    /// Session generation the index belongs to
    pub generation: u64,
    pub index: usize,
    /// When the payload was sent
    pub since: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Waiting for the admission gate; `asked` once it requested a
    /// challenge
    Queued { asked: bool },
    /// Admitted, no challenge outstanding
    Admitted,
    /// A challenge is outstanding. `starved` marks connections that were
    /// told there is no work; they are sent this challenge when work
    /// arrives.
    ChallengeIssued { challenge: Challenge, starved: bool },
    /// Holding a work item
    WorkHeld(HeldWork),
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// One client's session with the server.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outgoing>,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(outbound: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            outbound,
            state: ConnectionState::Queued { asked: false },
        }
    }

    pub fn held(&self) -> Option<HeldWork> {
        match self.state {
            ConnectionState::WorkHeld(held) => Some(held),
            _ => None,
        }
    }

    /// Queue a frame for the transport. A gone transport is not an error
    /// here; its disconnect is already on the way.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(Outgoing::Send(message));
    }

    pub fn send_work(&self, payload: Value) {
        self.send(ServerMessage::Work { payload });
    }

    pub fn send_challenge(&self, challenge: &Challenge) {
        self.send(ServerMessage::Challenge {
            nonce: challenge.nonce.clone(),
            difficulty: challenge.difficulty,
        });
    }

    /// Ask the transport to hang up.
    pub fn close(&mut self, reason: &str) {
        self.state = ConnectionState::Closed;
        let _ = self.outbound.send(Outgoing::Close {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Queued { asked: true }.name(), "queued");
        assert_eq!(
            ConnectionState::ChallengeIssued {
                challenge: Challenge {
                    nonce: "00".into(),
                    difficulty: 1
                },
                starved: false
            }
            .name(),
            "challenge_issued"
        );
    }

    #[test]
    fn test_close_notifies_transport() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(tx);

        connection.close("bye");
        assert_eq!(connection.state, ConnectionState::Closed);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outgoing::Close {
                reason: "bye".into()
            }
        );
    }
}

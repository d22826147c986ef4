//! Connection lifecycle and the per-message state machine.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::Server;
use crate::connection::{Connection, ConnectionId, ConnectionState, HeldWork};
use crate::delivery;
use crate::protocol::{
    ClientMessage, Outgoing, ProtocolViolation, ServerMessage, NO_MATCHING_ENVIRONMENT,
    NO_WORK_AVAILABLE, WAITING_FOR_USERS,
};
use crate::tracing::prelude::*;

impl Server {
    /// Register a client. It is queued until the admission gate opens.
    pub fn connect(&mut self, outbound: mpsc::UnboundedSender<Outgoing>) -> ConnectionId {
        let id = self.connections.insert(Connection::new(outbound));
        let users = self.connections.len();
        debug!(connection = ?id, users, "Client connected");

        let released = self.gate.arrive(id, users);
        if released.is_empty() {
            debug!(
                connection = ?id,
                queued = self.gate.queued(),
                min_users = self.gate.min_users(),
                "Client waiting for admission"
            );
        } else if self.gate.is_enabled() {
            info!(admitted = released.len(), users, "Admission gate opened");
        }
        for admitted in released {
            self.admit(admitted);
        }
        id
    }

    // Clients that were told to wait get the challenge they asked for.
    fn admit(&mut self, id: ConnectionId) {
        let challenge = self.hashcash.issue();
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        if connection.state == (ConnectionState::Queued { asked: true }) {
            connection.send_challenge(&challenge);
            connection.state = ConnectionState::ChallengeIssued {
                challenge,
                starved: false,
            };
        } else {
            connection.state = ConnectionState::Admitted;
        }
    }

    /// Handle one text frame from a client.
    pub fn handle_message(&mut self, id: ConnectionId, text: &str) {
        let Some(connection) = self.connections.get(id) else {
            trace!(connection = ?id, "Message for unknown connection");
            return;
        };
        if connection.state == ConnectionState::Closed {
            return;
        }

        let result = ClientMessage::parse(text).and_then(|message| {
            trace!(connection = ?id, message = message.name(), "Client message");
            self.dispatch(id, message)
        });
        if let Err(violation) = result {
            self.violation(id, violation);
        }
    }

    fn dispatch(&mut self, id: ConnectionId, message: ClientMessage) -> Result<(), ProtocolViolation> {
        match message {
            ClientMessage::Request { environments } => {
                self.deliver_file(id, &environments);
                Ok(())
            }
            ClientMessage::RequestHash => self.request_hash(id),
            ClientMessage::SubmitHash { proof } => self.submit_hash(id, &proof),
            ClientMessage::SubmitWork { solution } => self.submit_work(id, solution),
        }
    }

    fn deliver_file(&mut self, id: ConnectionId, environments: &[String]) {
        match delivery::select(&self.files, environments) {
            Some((environment, file)) => {
                let message = ServerMessage::File {
                    url: file.url().to_string(),
                    environment: environment.to_string(),
                };
                if let Some(connection) = self.connections.get(id) {
                    debug!(connection = ?id, %environment, "Delivering file");
                    connection.send(message);
                }
            }
            None => {
                debug!(connection = ?id, ?environments, "No file for environments");
                if let Some(connection) = self.connections.get(id) {
                    connection.send(ServerMessage::error(NO_MATCHING_ENVIRONMENT));
                }
                self.close_connection(id, NO_MATCHING_ENVIRONMENT);
            }
        }
    }

    fn request_hash(&mut self, id: ConnectionId) -> Result<(), ProtocolViolation> {
        let challenge = self.hashcash.issue();
        let Some(connection) = self.connections.get_mut(id) else {
            return Ok(());
        };
        match &mut connection.state {
            ConnectionState::Queued { asked } => {
                *asked = true;
                connection.send(ServerMessage::error(WAITING_FOR_USERS));
                Ok(())
            }
            ConnectionState::Admitted => {
                connection.send_challenge(&challenge);
                connection.state = ConnectionState::ChallengeIssued {
                    challenge,
                    starved: false,
                };
                Ok(())
            }
            // Asking again, e.g. after "No work available": repeat the
            // outstanding challenge. It stays single-use.
            ConnectionState::ChallengeIssued { challenge, starved } => {
                *starved = false;
                let challenge = challenge.clone();
                connection.send_challenge(&challenge);
                Ok(())
            }
            state => Err(ProtocolViolation::WrongStage {
                message: "request_hash",
                state: state.name(),
            }),
        }
    }

    fn submit_hash(&mut self, id: ConnectionId, proof: &str) -> Result<(), ProtocolViolation> {
        let Some(connection) = self.connections.get_mut(id) else {
            return Ok(());
        };
        let ConnectionState::ChallengeIssued { challenge, .. } = &connection.state else {
            return Err(ProtocolViolation::WrongStage {
                message: "submit_hash",
                state: connection.state.name(),
            });
        };

        // Checked once; the challenge is gone whatever the outcome.
        let solved = challenge.is_solved_by(proof);
        connection.state = ConnectionState::Admitted;
        if !solved {
            return Err(ProtocolViolation::VerificationFailed);
        }

        let settled = self.settled();
        match self
            .allocator
            .next(&mut self.store, &mut self.remaining, settled)
        {
            Some(index) => {
                let payload = self.store.payload(index);
                let held = HeldWork {
                    generation: self.generation,
                    index,
                    since: Instant::now(),
                };
                if let Some(connection) = self.connections.get_mut(id) {
                    debug!(connection = ?id, index, generation = self.generation, "Work assigned");
                    connection.send_work(payload);
                    connection.state = ConnectionState::WorkHeld(held);
                }
            }
            None => {
                let challenge = self.hashcash.issue();
                if let Some(connection) = self.connections.get_mut(id) {
                    debug!(connection = ?id, "No work available");
                    connection.send(ServerMessage::error(NO_WORK_AVAILABLE));
                    connection.state = ConnectionState::ChallengeIssued {
                        challenge,
                        starved: true,
                    };
                }
            }
        }
        Ok(())
    }

    fn submit_work(&mut self, id: ConnectionId, solution: Value) -> Result<(), ProtocolViolation> {
        let Some(connection) = self.connections.get(id) else {
            return Ok(());
        };
        let Some(held) = connection.held() else {
            return Err(ProtocolViolation::WrongStage {
                message: "submit_work",
                state: connection.state.name(),
            });
        };
        self.store
            .check_solution(&solution)
            .map_err(|e| ProtocolViolation::Undecodable(e.to_string()))?;

        self.timeouts.observe(held.since.elapsed());

        let challenge = self.hashcash.issue();
        if let Some(connection) = self.connections.get_mut(id) {
            connection.send_challenge(&challenge);
            connection.state = ConnectionState::ChallengeIssued {
                challenge,
                starved: false,
            };
        }

        if held.generation != self.generation {
            debug!(connection = ?id, index = held.index, "Discarding solution from a finished session");
            return Ok(());
        }
        debug!(connection = ?id, index = held.index, "Solution received");
        self.submit_solution(id, held.index, solution);
        Ok(())
    }

    fn violation(&mut self, id: ConnectionId, violation: ProtocolViolation) {
        if self.strict {
            warn!(connection = ?id, %violation, "Closing connection");
            self.close_connection(id, &violation.to_string());
        } else {
            debug!(connection = ?id, %violation, "Ignoring message");
        }
    }

    /// Hang up on a client and release whatever it held.
    pub fn close_connection(&mut self, id: ConnectionId, reason: &str) {
        if let Some(connection) = self.connections.get_mut(id) {
            if connection.state != ConnectionState::Closed {
                connection.close(reason);
            }
        }
        self.disconnect(id);
    }

    /// Forget a client. Safe to call more than once.
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        self.gate.leave(id);

        if let Some(held) = connection.held() {
            self.release_held(held);
        }
        debug!(connection = ?id, users = self.connections.len(), "Client disconnected");
    }

    fn release_held(&mut self, held: HeldWork) {
        if held.generation != self.generation {
            return;
        }
        self.store.release(held.index);
        debug!(index = held.index, "Work released");
        if !self.store.is_saturated(held.index) && self.remaining.insert(held.index) {
            self.notify_starved();
        }
    }

    /// Close every connection that has held work longer than the timeout.
    pub fn reclaim_stalled(&mut self, now: Instant) {
        let Some(limit) = self.timeouts.limit() else {
            return;
        };
        let stalled: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| {
                connection
                    .held()
                    .is_some_and(|held| now.saturating_duration_since(held.since) > limit)
            })
            .map(|(id, _)| id)
            .collect();

        for id in stalled {
            info!(connection = ?id, limit_ms = limit.as_millis() as u64, "Assignment timed out");
            self.close_connection(id, "assignment timed out");
        }
    }

    // Work went back into the pool: send clients that were told there was
    // none the challenge they are holding.
    pub(super) fn notify_starved(&mut self) {
        let mut nudged = 0;
        for (_, connection) in self.connections.iter_mut() {
            let ConnectionState::ChallengeIssued { challenge, starved } = &mut connection.state
            else {
                continue;
            };
            if !*starved {
                continue;
            }
            *starved = false;
            let challenge = challenge.clone();
            connection.send_challenge(&challenge);
            nudged += 1;
        }
        if nudged > 0 {
            debug!(connections = nudged, "Sent work-available challenges");
        }
    }
}

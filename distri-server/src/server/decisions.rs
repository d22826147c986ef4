//! Submission and workgroup decisions.
//!
//! A solution goes through up to two decisions: the application may accept
//! or reject it individually, and once its item is complete the workgroup
//! is verified by the application or by the consensus engine. Decisions the
//! application makes come back as [`Resolution`]s through the pending set.

use futures::FutureExt;
use serde_json::Value;

use super::events::{
    Notification, SubmissionDecision, WorkSubmitted, WorkgroupComplete, WorkgroupDecision,
};
use super::{Resolution, Server};
use crate::connection::ConnectionId;
use crate::tracing::prelude::*;
use crate::verification::Verdict;

impl Server {
    pub(super) fn submit_solution(&mut self, id: ConnectionId, index: usize, solution: Value) {
        if self.listeners.has_submission_listener() {
            let (decision, rx) = SubmissionDecision::new();
            let event = WorkSubmitted {
                work: self.store.payload(index),
                solution: solution.clone(),
                connection: id,
                decision,
            };
            if self.listeners.offer_submission(event).is_none() {
                let generation = self.generation;
                self.pending.push(
                    async move {
                        Resolution::Submission {
                            generation,
                            index,
                            solution,
                            accepted: rx.await.ok(),
                        }
                    }
                    .boxed(),
                );
                return;
            }
        }
        self.accept_submission(index, solution);
    }

    fn accept_submission(&mut self, index: usize, solution: Value) {
        if let Err(e) = self.store.record_solution(index, solution) {
            warn!(index, error = %e, "Could not record solution");
            self.reject_submission(index);
            return;
        }
        trace!(
            index,
            solutions = self.store.solution_count(index),
            strength = self.store.strength(),
            "Solution recorded"
        );
        if self.store.is_complete(index) {
            self.begin_verification(index);
        }
    }

    // The worker's slot goes back to the pool.
    fn reject_submission(&mut self, index: usize) {
        self.store.release(index);
        if !self.store.is_saturated(index) && self.remaining.insert(index) {
            self.notify_starved();
        }
    }

    fn begin_verification(&mut self, index: usize) {
        self.verifying += 1;
        let solutions = self.store.solutions(index);
        debug!(index, generation = self.generation, "Verifying workgroup");

        if self.listeners.has_workgroup_listener() {
            let (decision, rx) = WorkgroupDecision::new();
            let event = WorkgroupComplete {
                work: self.store.payload(index),
                solutions: solutions.clone(),
                decision,
            };
            if self.listeners.offer_workgroup(event).is_none() {
                let generation = self.generation;
                self.pending.push(
                    async move {
                        Resolution::Workgroup {
                            generation,
                            index,
                            verdict: rx.await.ok(),
                        }
                    }
                    .boxed(),
                );
                return;
            }
        }

        let verdict = self.engine.evaluate(&solutions);
        self.finish_verification(index, verdict);
    }

    fn finish_verification(&mut self, index: usize, verdict: Verdict) {
        self.verifying = self.verifying.saturating_sub(1);
        let work = self.store.payload(index);

        match verdict {
            Verdict::Accept(value) => {
                self.store.finalize(index);
                self.solved += 1;
                info!(
                    index,
                    solved = self.solved,
                    session_len = self.store.len(),
                    "Workgroup accepted"
                );
                self.listeners
                    .notify(Notification::WorkgroupAccepted { work, value });
                if self.solved >= self.store.len() {
                    self.complete_session();
                }
            }
            Verdict::Reject => {
                let solutions = self.store.solutions(index);
                info!(index, "Workgroup rejected");
                self.store.reset(index);
                self.remaining.insert(index);
                self.listeners
                    .notify(Notification::WorkgroupRejected { work, solutions });
                self.notify_starved();
            }
        }
    }

    /// Apply a decision that came back from the application.
    pub(super) fn resolve(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Submission {
                generation,
                index,
                solution,
                accepted,
            } => {
                if generation != self.generation {
                    debug!(index, generation, "Dropping stale submission decision");
                    return;
                }
                if accepted == Some(true) {
                    self.accept_submission(index, solution);
                } else {
                    debug!(index, "Submission rejected");
                    self.reject_submission(index);
                }
            }
            Resolution::Workgroup {
                generation,
                index,
                verdict,
            } => {
                if generation != self.generation {
                    debug!(index, generation, "Dropping stale workgroup decision");
                    return;
                }
                // A dropped handle falls back to the configured policy.
                let verdict = verdict.unwrap_or_else(|| {
                    self.engine.evaluate(&self.store.solutions(index))
                });
                self.finish_verification(index, verdict);
            }
        }
    }
}

//! Events the server raises to the owning application.
//!
//! Two events ask the application for a decision: [`WorkSubmitted`] for each
//! individual solution and [`WorkgroupComplete`] once an item has all of its
//! solutions. Each carries a one-shot decision handle. The work item stays
//! pending until the handle is used; dropping the handle unused counts as a
//! rejection for submissions and as "use the default policy" for
//! workgroups. Decisions may be made in any order.
//!
//! The remaining events are plain [`Notification`]s.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::ConnectionId;
use crate::verification::Verdict;

/// A client submitted a solution; accept or reject it before it is counted.
#[derive(Debug)]
pub struct WorkSubmitted {
    /// The payload the client was sent
    pub work: Value,
    /// What the client sent back
    pub solution: Value,
    /// Who sent it
    pub connection: ConnectionId,
    pub decision: SubmissionDecision,
}

/// An item has as many solutions as the verification strength.
#[derive(Debug)]
pub struct WorkgroupComplete {
    pub work: Value,
    /// All solutions, in submission order
    pub solutions: Vec<Value>,
    pub decision: WorkgroupDecision,
}

/// After-the-fact notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An item was accepted with this canonical value
    WorkgroupAccepted { work: Value, value: Value },
    /// An item's solutions were thrown away and it is back in the pool
    WorkgroupRejected { work: Value, solutions: Vec<Value> },
    /// Every item in the session was accepted; the session is now empty
    AllWorkComplete,
}

/// Decision handle for one submission.
#[derive(Debug)]
pub struct SubmissionDecision {
    tx: oneshot::Sender<bool>,
}

impl SubmissionDecision {
    pub(crate) fn new() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Count the solution toward its work item.
    pub fn accept(self) {
        let _ = self.tx.send(true);
    }

    /// Discard the solution; the slot goes back to the pool.
    pub fn reject(self) {
        let _ = self.tx.send(false);
    }
}

/// Decision handle for one complete workgroup.
#[derive(Debug)]
pub struct WorkgroupDecision {
    tx: oneshot::Sender<Verdict>,
}

impl WorkgroupDecision {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Verdict>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Accept the item with `value` as its answer.
    pub fn accept(self, value: Value) {
        self.apply(Verdict::Accept(value));
    }

    /// Reject every solution and hand the item out again.
    pub fn reject(self) {
        self.apply(Verdict::Reject);
    }

    pub fn apply(self, verdict: Verdict) {
        let _ = self.tx.send(verdict);
    }
}

/// Channels to the application, one per registered event.
///
/// An unregistered decision event, or one whose receiver has been dropped,
/// makes the server decide on its own.
#[derive(Debug, Default)]
pub struct Listeners {
    pub(crate) work_submitted: Option<mpsc::UnboundedSender<WorkSubmitted>>,
    pub(crate) workgroup_complete: Option<mpsc::UnboundedSender<WorkgroupComplete>>,
    pub(crate) notifications: Option<mpsc::UnboundedSender<Notification>>,
}

impl Listeners {
    /// Offer `event` to the listener; gives it back if there is none.
    pub(crate) fn offer_submission(&mut self, event: WorkSubmitted) -> Option<WorkSubmitted> {
        offer(&mut self.work_submitted, event)
    }

    pub(crate) fn offer_workgroup(&mut self, event: WorkgroupComplete) -> Option<WorkgroupComplete> {
        offer(&mut self.workgroup_complete, event)
    }

    pub(crate) fn has_submission_listener(&self) -> bool {
        self.work_submitted.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn has_workgroup_listener(&self) -> bool {
        self.workgroup_complete
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        offer(&mut self.notifications, notification);
    }
}

// A closed channel unregisters its listener.
fn offer<T>(slot: &mut Option<mpsc::UnboundedSender<T>>, event: T) -> Option<T> {
    let Some(tx) = slot else {
        return Some(event);
    };
    match tx.send(event) {
        Ok(()) => None,
        Err(mpsc::error::SendError(event)) => {
            *slot = None;
            Some(event)
        }
    }
}

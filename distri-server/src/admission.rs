//! Minimum-population gate in front of the work protocol.
//!
//! With `minUsers > 1`, connections wait in a queue until enough peers are
//! connected, then the whole queue is released in one step. Nobody is ever
//! released on their own while others are still waiting.

/// Queue of connections waiting for enough peers.
#[derive(Debug)]
pub struct AdmissionGate<T> {
    min_users: usize,
    queue: Vec<T>,
}

impl<T: Copy + PartialEq> AdmissionGate<T> {
    pub fn new(min_users: usize) -> Self {
        Self {
            min_users,
            queue: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.min_users > 1
    }

    pub fn min_users(&self) -> usize {
        self.min_users
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Register a new connection; `user_count` already includes it.
    ///
    /// Returns every connection to admit now, in arrival order: empty when
    /// `id` has to wait, otherwise the released queue followed by `id`.
    pub fn arrive(&mut self, id: T, user_count: usize) -> Vec<T> {
        if !self.is_enabled() || user_count >= self.min_users {
            let mut released = std::mem::take(&mut self.queue);
            released.push(id);
            released
        } else {
            self.queue.push(id);
            Vec::new()
        }
    }

    /// Forget a queued connection that went away.
    pub fn leave(&mut self, id: T) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != id);
        self.queue.len() != before
    }
}

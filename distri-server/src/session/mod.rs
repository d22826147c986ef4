//! Session storage for work items and their solutions.
//!
//! A session is an ordered list of work items. Each item's index is its
//! stable handle for the lifetime of the session. Two backings sit behind
//! [`SessionStore`]:
//!
//! - **Dynamic**: one [`WorkItem`] record per item, any JSON payload.
//! - **Static**: one packed [`StaticBuffer`]; payloads and solutions must be
//!   fixed-width primitives declared up front.
//!
//! Callers never see which backing is in use.

pub mod codec;
mod remaining;

use std::ops::Range;

use bitvec::vec::BitVec;
use serde_json::Value;

use crate::config::{ModeConfig, Typing};
use crate::error::{Error, Result};

pub use codec::{RecordLayout, StaticBuffer};
pub use remaining::RemainingSet;

/// View of one work item, independent of the backing.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// The value sent to clients
    pub payload: Value,
    /// Connections currently holding the item without having submitted
    pub assigned_workers: usize,
    /// Submitted solutions, in submission order
    pub solutions: Vec<Value>,
}

impl WorkItem {
    fn new(payload: Value) -> Self {
        Self {
            payload,
            assigned_workers: 0,
            solutions: Vec::new(),
        }
    }

    pub fn solution_count(&self) -> usize {
        self.solutions.len()
    }
}

/// Result of [`SessionStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Added {
    /// Indices given to the new items
    pub indices: Range<usize>,
    /// The session held no work before this call
    pub was_empty: bool,
}

#[derive(Debug)]
enum Backing {
    Dynamic(Vec<WorkItem>),
    Static(StaticBuffer),
}

/// The authoritative collection of work items.
#[derive(Debug)]
pub struct SessionStore {
    backing: Backing,
    strength: usize,
    finalized: BitVec,
}

impl SessionStore {
    /// Create a store with freely-typed records.
    pub fn dynamic(strength: usize) -> Self {
        Self {
            backing: Backing::Dynamic(Vec::new()),
            strength,
            finalized: BitVec::new(),
        }
    }

    /// Create a store packed according to `layout`.
    pub fn packed(layout: RecordLayout) -> Self {
        Self {
            strength: layout.strength,
            backing: Backing::Static(StaticBuffer::new(layout)),
            finalized: BitVec::new(),
        }
    }

    /// Create the store selected by the configured typing mode.
    pub fn from_mode(mode: &ModeConfig, strength: usize) -> Result<Self> {
        match mode.typing {
            Typing::Dynamic => Ok(Self::dynamic(strength)),
            Typing::Static => {
                let input = mode.input.ok_or_else(|| {
                    Error::Config("static typing requires mode.input".to_string())
                })?;
                let output = mode.output.ok_or_else(|| {
                    Error::Config("static typing requires mode.output".to_string())
                })?;
                Ok(Self::packed(RecordLayout::new(input, output, strength)?))
            }
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.backing, Backing::Static(_))
    }

    pub fn strength(&self) -> usize {
        self.strength
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Dynamic(items) => items.len(),
            Backing::Static(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `payloads` as new work items.
    ///
    /// In static mode the whole batch is rejected if any payload does not
    /// pack as the input type.
    pub fn add(&mut self, payloads: Vec<Value>) -> Result<Added> {
        let was_empty = self.is_empty();
        let start = self.len();

        match &mut self.backing {
            Backing::Dynamic(items) => items.extend(payloads.into_iter().map(WorkItem::new)),
            Backing::Static(buffer) => buffer
                .extend(&payloads)
                .map_err(|e| Error::Config(format!("work rejected by static mode: {}", e)))?,
        }

        let end = self.len();
        self.finalized.resize(end, false);
        Ok(Added {
            indices: start..end,
            was_empty,
        })
    }

    /// Snapshot of the item at `index`.
    pub fn get(&self, index: usize) -> Option<WorkItem> {
        if index >= self.len() {
            return None;
        }
        Some(match &self.backing {
            Backing::Dynamic(items) => items[index].clone(),
            Backing::Static(buffer) => WorkItem {
                payload: buffer.payload(index),
                assigned_workers: buffer.assigned(index) as usize,
                solutions: buffer.solutions(index),
            },
        })
    }

    pub fn payload(&self, index: usize) -> Value {
        match &self.backing {
            Backing::Dynamic(items) => items[index].payload.clone(),
            Backing::Static(buffer) => buffer.payload(index),
        }
    }

    pub fn solutions(&self, index: usize) -> Vec<Value> {
        match &self.backing {
            Backing::Dynamic(items) => items[index].solutions.clone(),
            Backing::Static(buffer) => buffer.solutions(index),
        }
    }

    pub fn assigned_workers(&self, index: usize) -> usize {
        match &self.backing {
            Backing::Dynamic(items) => items[index].assigned_workers,
            Backing::Static(buffer) => buffer.assigned(index) as usize,
        }
    }

    pub fn solution_count(&self, index: usize) -> usize {
        match &self.backing {
            Backing::Dynamic(items) => items[index].solutions.len(),
            Backing::Static(buffer) => buffer.solution_count(index) as usize,
        }
    }

    /// Workers plus solutions; never exceeds the verification strength.
    pub fn occupancy(&self, index: usize) -> usize {
        self.assigned_workers(index) + self.solution_count(index)
    }

    /// No capacity left for another worker.
    pub fn is_saturated(&self, index: usize) -> bool {
        self.is_finalized(index) || self.occupancy(index) >= self.strength
    }

    /// Every solution slot has been filled.
    pub fn is_complete(&self, index: usize) -> bool {
        self.solution_count(index) >= self.strength
    }

    /// Count one more worker on `index`.
    pub fn assign(&mut self, index: usize) {
        debug_assert!(self.occupancy(index) < self.strength);
        match &mut self.backing {
            Backing::Dynamic(items) => items[index].assigned_workers += 1,
            Backing::Static(buffer) => {
                let assigned = buffer.assigned(index);
                buffer.set_assigned(index, assigned.saturating_add(1));
            }
        }
    }

    /// Count one fewer worker on `index`.
    pub fn release(&mut self, index: usize) {
        match &mut self.backing {
            Backing::Dynamic(items) => {
                let item = &mut items[index];
                item.assigned_workers = item.assigned_workers.saturating_sub(1);
            }
            Backing::Static(buffer) => {
                let assigned = buffer.assigned(index);
                buffer.set_assigned(index, assigned.saturating_sub(1));
            }
        }
    }

    /// Check that `value` is storable as a solution for this session.
    pub fn check_solution(&self, value: &Value) -> Result<()> {
        match &self.backing {
            Backing::Dynamic(_) => Ok(()),
            Backing::Static(buffer) => buffer.check_solution(value),
        }
    }

    /// Append a solution to `index`, moving one worker into the solved slot.
    pub fn record_solution(&mut self, index: usize, value: Value) -> Result<()> {
        if self.is_complete(index) {
            return Err(Error::Codec(format!(
                "work item {} already has {} solutions",
                index, self.strength
            )));
        }
        match &mut self.backing {
            Backing::Dynamic(items) => items[index].solutions.push(value),
            Backing::Static(buffer) => buffer.push_solution(index, &value)?,
        }
        self.release(index);
        Ok(())
    }

    /// Drop all solutions and workers of `index` so it can be redone.
    pub fn reset(&mut self, index: usize) {
        match &mut self.backing {
            Backing::Dynamic(items) => {
                let item = &mut items[index];
                item.solutions.clear();
                item.assigned_workers = 0;
            }
            Backing::Static(buffer) => buffer.reset(index),
        }
    }

    /// Mark `index` as permanently solved.
    pub fn finalize(&mut self, index: usize) {
        self.finalized.set(index, true);
    }

    pub fn is_finalized(&self, index: usize) -> bool {
        self.finalized.get(index).is_some_and(|bit| *bit)
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.count_ones()
    }

    /// Drop every item, keeping the backing mode.
    pub fn clear(&mut self) {
        match &mut self.backing {
            Backing::Dynamic(items) => items.clear(),
            Backing::Static(buffer) => buffer.clear(),
        }
        self.finalized.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimitiveKind, PrimitiveType};
    use serde_json::json;

    fn static_mode() -> ModeConfig {
        ModeConfig {
            typing: Typing::Static,
            input: Some(PrimitiveType::new(PrimitiveKind::Uint, 4)),
            output: Some(PrimitiveType::new(PrimitiveKind::String, 8)),
        }
    }

    fn stores(strength: usize) -> Vec<SessionStore> {
        vec![
            SessionStore::dynamic(strength),
            SessionStore::from_mode(&static_mode(), strength).unwrap(),
        ]
    }

    #[test]
    fn test_add_reports_indices_and_emptiness() {
        for mut store in stores(2) {
            let first = store.add(vec![json!(1), json!(2)]).unwrap();
            assert_eq!(first.indices, 0..2);
            assert!(first.was_empty);

            let second = store.add(vec![json!(3)]).unwrap();
            assert_eq!(second.indices, 2..3);
            assert!(!second.was_empty);
            assert_eq!(store.payload(2), json!(3));
        }
    }

    #[test]
    fn test_record_solution_moves_worker_to_solution() {
        for mut store in stores(2) {
            store.add(vec![json!(10)]).unwrap();
            store.assign(0);
            store.assign(0);
            assert!(store.is_saturated(0));

            store.record_solution(0, json!("even")).unwrap();
            let item = store.get(0).unwrap();
            assert_eq!(item.assigned_workers, 1);
            assert_eq!(item.solutions, vec![json!("even")]);
            assert_eq!(store.occupancy(0), 2);
            assert!(!store.is_complete(0));

            store.record_solution(0, json!("odd")).unwrap();
            assert!(store.is_complete(0));
            assert!(store.record_solution(0, json!("more")).is_err());
        }
    }

    #[test]
    fn test_reset_and_finalize() {
        for mut store in stores(1) {
            store.add(vec![json!(5), json!(6)]).unwrap();
            store.assign(1);
            store.record_solution(1, json!("x")).unwrap();
            store.reset(1);
            assert_eq!(store.get(1).unwrap(), WorkItem::new(json!(6)));

            store.finalize(0);
            assert!(store.is_finalized(0));
            assert!(store.is_saturated(0));
            assert!(!store.is_finalized(1));
            assert_eq!(store.finalized_count(), 1);

            store.clear();
            assert!(store.is_empty());
            assert!(!store.is_finalized(0));
            assert_eq!(store.add(vec![json!(7)]).unwrap().indices, 0..1);
        }
    }

    #[test]
    fn test_static_mode_rejects_heterogeneous_work() {
        let mut store = SessionStore::from_mode(&static_mode(), 1).unwrap();
        let err = store.add(vec![json!(1), json!("two")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(store.is_empty());

        let err = store.add(vec![json!([1, 2])]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_static_mode_checks_solutions() {
        let store = SessionStore::from_mode(&static_mode(), 1).unwrap();
        assert!(store.check_solution(&json!("short")).is_ok());
        assert!(store.check_solution(&json!("far too long")).is_err());
        assert!(store.check_solution(&json!(12)).is_err());
        assert!(SessionStore::dynamic(1).check_solution(&json!({"any": []})).is_ok());
    }

    #[test]
    fn test_static_mode_requires_types() {
        let mode = ModeConfig {
            typing: Typing::Static,
            input: None,
            output: Some(PrimitiveType::new(PrimitiveKind::Int, 4)),
        };
        assert!(matches!(
            SessionStore::from_mode(&mode, 1),
            Err(Error::Config(_))
        ));
    }
}

//! Packed record buffer for static-mode sessions.
//!
//! In static mode every work item is a fixed-size record inside one
//! contiguous byte vector:
//!
//! ```text
//! +----------+-------------+---------------+--------------------------+
//! | assigned | payload     | solutionCount | solutions                |
//! | 1 byte   | W bytes     | 1 byte        | strength x S bytes       |
//! +----------+-------------+---------------+--------------------------+
//! ```
//!
//! `W` is the input type width and `S` the output type width. All accessors
//! take the record index and compute offsets from the layout, so the vector is
//! free to reallocate as work is appended.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::PrimitiveType;

/// Byte layout of one static-mode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub payload: PrimitiveType,
    pub solution: PrimitiveType,
    pub strength: usize,
}

impl RecordLayout {
    /// Counters are single bytes, which caps the verification strength.
    pub const MAX_STRENGTH: usize = u8::MAX as usize;

    pub fn new(payload: PrimitiveType, solution: PrimitiveType, strength: usize) -> Result<Self> {
        payload.validate()?;
        solution.validate()?;
        if strength == 0 || strength > Self::MAX_STRENGTH {
            return Err(Error::Config(format!(
                "static mode supports verification strength 1..={}, got {}",
                Self::MAX_STRENGTH,
                strength
            )));
        }
        Ok(Self {
            payload,
            solution,
            strength,
        })
    }

    pub fn record_len(&self) -> usize {
        1 + self.payload.width + 1 + self.strength * self.solution.width
    }

    pub fn assigned_offset(&self, index: usize) -> usize {
        index * self.record_len()
    }

    pub fn payload_offset(&self, index: usize) -> usize {
        self.assigned_offset(index) + 1
    }

    pub fn count_offset(&self, index: usize) -> usize {
        self.payload_offset(index) + self.payload.width
    }

    pub fn solution_offset(&self, index: usize, slot: usize) -> usize {
        self.count_offset(index) + 1 + slot * self.solution.width
    }
}

/// A session's worth of packed records.
#[derive(Debug, Clone)]
pub struct StaticBuffer {
    layout: RecordLayout,
    bytes: Vec<u8>,
}

impl StaticBuffer {
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            bytes: Vec::new(),
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.record_len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append one zeroed record per payload.
    ///
    /// Either every payload is packed or none is: the buffer is rolled back
    /// to its previous length on the first value that does not fit the
    /// input type.
    pub fn extend(&mut self, payloads: &[Value]) -> Result<()> {
        let start = self.len();
        let original_len = self.bytes.len();
        self.bytes
            .resize(original_len + payloads.len() * self.layout.record_len(), 0);

        for (i, payload) in payloads.iter().enumerate() {
            let offset = self.layout.payload_offset(start + i);
            let slot = &mut self.bytes[offset..offset + self.layout.payload.width];
            if let Err(e) = self.layout.payload.encode(payload, slot) {
                self.bytes.truncate(original_len);
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn payload(&self, index: usize) -> Value {
        let offset = self.layout.payload_offset(index);
        self.layout
            .payload
            .decode(&self.bytes[offset..offset + self.layout.payload.width])
    }

    pub fn assigned(&self, index: usize) -> u8 {
        self.bytes[self.layout.assigned_offset(index)]
    }

    pub fn set_assigned(&mut self, index: usize, value: u8) {
        let offset = self.layout.assigned_offset(index);
        self.bytes[offset] = value;
    }

    pub fn solution_count(&self, index: usize) -> u8 {
        self.bytes[self.layout.count_offset(index)]
    }

    pub fn solutions(&self, index: usize) -> Vec<Value> {
        (0..self.solution_count(index) as usize)
            .map(|slot| {
                let offset = self.layout.solution_offset(index, slot);
                self.layout
                    .solution
                    .decode(&self.bytes[offset..offset + self.layout.solution.width])
            })
            .collect()
    }

    /// Check that `value` can be stored as a solution without storing it.
    pub fn check_solution(&self, value: &Value) -> Result<()> {
        let mut scratch = vec![0u8; self.layout.solution.width];
        self.layout.solution.encode(value, &mut scratch)
    }

    /// Pack `value` into the next free solution slot of `index`.
    pub fn push_solution(&mut self, index: usize, value: &Value) -> Result<()> {
        let count = self.solution_count(index) as usize;
        if count >= self.layout.strength {
            return Err(Error::Codec(format!(
                "work item {} already holds {} solutions",
                index, count
            )));
        }

        let offset = self.layout.solution_offset(index, count);
        let width = self.layout.solution.width;
        self.layout
            .solution
            .encode(value, &mut self.bytes[offset..offset + width])?;

        let count_offset = self.layout.count_offset(index);
        self.bytes[count_offset] += 1;
        Ok(())
    }

    /// Zero the counters and every solution slot of `index`.
    pub fn reset(&mut self, index: usize) {
        self.set_assigned(index, 0);
        let start = self.layout.count_offset(index);
        let end = self.layout.assigned_offset(index) + self.layout.record_len();
        self.bytes[start..end].fill(0);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

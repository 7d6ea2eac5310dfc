// SPDX-License-Identifier: Apache-2.0

//! Acknowledgement bookkeeping for at-least-once delivery.
//!
//! Every line handed to the output is tracked as pending until the output
//! acknowledges it. The offset that may be persisted for a file is the start
//! of its lowest pending line, or the end of the highest acknowledged line
//! once nothing is pending. A restart therefore re-reads anything that was
//! published but not yet acknowledged.
//!
//! ## Offset Semantics
//!
//! Lines are tracked as `LineOffset { offset, len }` pairs where:
//! - `offset` is the byte position where a line BEGINS in the file
//! - `len` is the length of the line in bytes (including newline)

use std::collections::{BTreeMap, HashMap};

use crate::registry::FileIdentity;

/// A line's position in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOffset {
    /// Byte position where the line begins
    pub offset: u64,
    /// Length of the line in bytes (including newline)
    pub len: u32,
}

impl LineOffset {
    pub fn new(offset: u64, len: u32) -> Self {
        Self { offset, len }
    }

    /// Byte position right after the line
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Pending and acknowledged lines per file.
///
/// Pending offsets live in a BTreeMap per file so the lowest one is always
/// at the front.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    /// begin offset -> len of every published, unacknowledged line
    pending: HashMap<FileIdentity, BTreeMap<u64, u32>>,
    /// Highest acknowledged line per file
    high_water_marks: HashMap<FileIdentity, LineOffset>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record lines handed to the output.
    pub fn track_batch(&mut self, identity: FileIdentity, offsets: &[LineOffset]) {
        let pending = self.pending.entry(identity).or_default();
        for line in offsets {
            pending.insert(line.offset, line.len);
        }
    }

    /// Record a line acknowledged by the output.
    pub fn acknowledge(&mut self, identity: FileIdentity, line: LineOffset) {
        self.high_water_marks
            .entry(identity)
            .and_modify(|hwm| {
                if line.offset > hwm.offset {
                    *hwm = line;
                }
            })
            .or_insert(line);

        if let Some(pending) = self.pending.get_mut(&identity) {
            pending.remove(&line.offset);
        }
    }

    pub fn acknowledge_batch(&mut self, identity: FileIdentity, offsets: &[LineOffset]) {
        for &line in offsets {
            self.acknowledge(identity, line);
        }
    }

    /// Start of the lowest unacknowledged line.
    pub fn lowest_pending_offset(&self, identity: FileIdentity) -> Option<u64> {
        self.pending
            .get(&identity)
            .and_then(|pending| pending.first_key_value().map(|(offset, _)| *offset))
    }

    pub fn high_water_mark(&self, identity: FileIdentity) -> Option<LineOffset> {
        self.high_water_marks.get(&identity).copied()
    }

    pub fn pending_count(&self, identity: FileIdentity) -> usize {
        self.pending.get(&identity).map(|p| p.len()).unwrap_or(0)
    }

    pub fn has_pending(&self, identity: FileIdentity) -> bool {
        self.pending_count(identity) > 0
    }

    /// Offset that is safe to persist for `identity`.
    ///
    /// - pending lines: the lowest pending begin offset
    /// - nothing pending: end of the highest acknowledged line
    /// - `None` if nothing was ever acknowledged or is pending
    pub fn persistable_offset(&self, identity: FileIdentity) -> Option<u64> {
        if let Some(lowest_pending) = self.lowest_pending_offset(identity) {
            return Some(lowest_pending);
        }
        self.high_water_mark(identity).map(|hwm| hwm.end_offset())
    }

    /// Forget a file, e.g. after truncation or removal.
    pub fn remove_file(&mut self, identity: FileIdentity) {
        self.pending.remove(&identity);
        self.high_water_marks.remove(&identity);
    }
}

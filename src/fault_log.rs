//! Fault Log Emission
//!
//! One callback per handled fault, fired after every transition has
//! settled. Sinks decide what becomes of the record; the core never
//! formats anything.

use alloc::vec::Vec;

use heapless::Deque;

use crate::vm_fault::FaultRecord;

// ============================================================================
// Emitter Contract
// ============================================================================

/// Receives exactly one finished record per fault
pub trait FaultLogger {
    fn record(&mut self, rec: &FaultRecord);
}

// ============================================================================
// Sinks
// ============================================================================

/// Unbounded collector, the measurement workhorse
#[derive(Debug, Default)]
pub struct VecLog {
    records: Vec<FaultRecord>,
}

impl VecLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[FaultRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&FaultRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl FaultLogger for VecLog {
    fn record(&mut self, rec: &FaultRecord) {
        self.records.push(*rec);
    }
}

/// Keeps the most recent `N` records without allocating.
///
/// Overflow displaces the oldest record and is counted, so a reader
/// can tell a quiet run from a truncated one.
#[derive(Debug, Default)]
pub struct RingLog<const N: usize> {
    ring: Deque<FaultRecord, N>,
    dropped: u64,
}

impl<const N: usize> RingLog<N> {
    pub fn new() -> Self {
        Self {
            ring: Deque::new(),
            dropped: 0,
        }
    }

    /// Retained records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &FaultRecord> {
        self.ring.iter()
    }

    pub fn latest(&self) -> Option<&FaultRecord> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records displaced by overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<const N: usize> FaultLogger for RingLog<N> {
    fn record(&mut self, rec: &FaultRecord) {
        if self.ring.is_full() {
            self.ring.pop_front();
            self.dropped += 1;
        }
        let _ = self.ring.push_back(*rec);
    }
}

/// Discards everything; the statistics still count
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl FaultLogger for NullLog {
    fn record(&mut self, _rec: &FaultRecord) {}
}

// ============================================================================
// Tests
// ============================================================================

//! Page Records and the Admission Queue
//!
//! Per-page bookkeeping for the managed span. Records live in an
//! arena addressed by stable slots; the admission queue is a doubly
//! linked list threaded through the arena by slot index, so records
//! never move and links never dangle.
//!
//! ## Design Notes
//!
//! The queue holds every record ever admitted. Resident records
//! (frame assigned) are the frame occupancy view; records that lost
//! their frame stay in the queue as placeholders until their page is
//! admitted again. Scans skip non-resident entries, so the
//! placeholders cost a visit but never win an eviction.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

// ============================================================================
// Identifiers
// ============================================================================

/// Virtual page number within the managed span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNum(pub u64);

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNum(pub u64);

/// Arena slot of a page record; stable for the record's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot(pub usize);

// ============================================================================
// Writeback State
// ============================================================================

/// Dirty and second-chance standing of a page.
///
/// Replaces a packed 2-bit code: bit 0 was "must be written back",
/// bit 1 "holds an unconsumed eviction reprieve". Only three of the
/// four encodings can occur; the enum makes the fourth unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritebackState {
    /// Not modified since last admission
    #[default]
    Clean,
    /// Modified, reprieve already consumed
    DirtyNoChance,
    /// Modified, one reprieve still pending
    DirtyPendingChance,
}

impl WritebackState {
    /// True if evicting the page now would require a writeback
    pub const fn needs_writeback(&self) -> bool {
        !matches!(self, WritebackState::Clean)
    }

    /// True if the page still holds its eviction reprieve
    pub const fn has_chance(&self) -> bool {
        matches!(self, WritebackState::DirtyPendingChance)
    }
}

// ============================================================================
// Page Record
// ============================================================================

/// Bookkeeping for one virtual page.
///
/// Created on the page's first fault and recycled on eviction, never
/// destroyed. `frame == None` marks a non-resident record.
#[derive(Debug)]
pub struct PageRecord {
    /// Virtual page number (identity, never changes)
    pub page: PageNum,
    /// Assigned frame, `None` while not resident
    pub frame: Option<FrameNum>,
    /// Mapped read-only with no write observed since last admission
    pub read_only: bool,
    /// Simulated accessed bit
    pub referenced: bool,
    /// Dirty and reprieve standing
    pub writeback: WritebackState,
    /// Queue links; owned by the queue, reset on unlink
    prev: Option<PageSlot>,
    next: Option<PageSlot>,
}

impl PageRecord {
    fn new(page: PageNum) -> Self {
        Self {
            page,
            frame: None,
            read_only: false,
            referenced: false,
            writeback: WritebackState::Clean,
            prev: None,
            next: None,
        }
    }

    /// True if the record currently holds a frame
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// Return the record to the unassigned state.
    ///
    /// Queue membership is the queue's business; links are untouched.
    pub fn reset(&mut self) {
        self.frame = None;
        self.read_only = false;
        self.referenced = false;
        self.writeback = WritebackState::Clean;
    }
}

// ============================================================================
// Page Arena
// ============================================================================

/// Arena of page records with a page-number index.
///
/// Slots are append-only and stable. Lookup goes through the index
/// map; admission-order iteration is the queue's job.
#[derive(Debug, Default)]
pub struct PageArena {
    records: Vec<PageRecord>,
    by_page: BTreeMap<PageNum, PageSlot>,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `page`, if the page has ever faulted
    pub fn lookup(&self, page: PageNum) -> Option<PageSlot> {
        self.by_page.get(&page).copied()
    }

    /// Slot of `page`, creating a fresh record on first touch
    pub fn lookup_or_insert(&mut self, page: PageNum) -> PageSlot {
        if let Some(slot) = self.lookup(page) {
            return slot;
        }
        let slot = PageSlot(self.records.len());
        self.records.push(PageRecord::new(page));
        self.by_page.insert(page, slot);
        slot
    }

    /// Record at `slot`; a stale slot is a defect and panics
    pub fn get(&self, slot: PageSlot) -> &PageRecord {
        &self.records[slot.0]
    }

    pub fn get_mut(&mut self, slot: PageSlot) -> &mut PageRecord {
        &mut self.records[slot.0]
    }

    /// All records, in creation order
    pub fn records(&self) -> core::slice::Iter<'_, PageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Admission Queue
// ============================================================================

/// Admission-ordered doubly linked list threaded through the arena.
///
/// Doubles as the FIFO queue and the clock ring. Never owns records;
/// it only rewires their link fields.
#[derive(Debug, Default)]
pub struct PageQueue {
    head: Option<PageSlot>,
    tail: Option<PageSlot>,
    len: usize,
}

impl PageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<PageSlot> {
        self.head
    }

    pub fn tail(&self) -> Option<PageSlot> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if `slot` is currently linked into this queue
    pub fn contains(&self, arena: &PageArena, slot: PageSlot) -> bool {
        let rec = arena.get(slot);
        rec.prev.is_some() || rec.next.is_some() || self.head == Some(slot)
    }

    /// Append an unlinked slot at the tail
    pub fn push_tail(&mut self, arena: &mut PageArena, slot: PageSlot) {
        debug_assert!(!self.contains(arena, slot));
        arena.get_mut(slot).prev = self.tail;
        arena.get_mut(slot).next = None;
        match self.tail {
            Some(tail) => arena.get_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    /// Unlink a slot from anywhere in the queue
    pub fn remove(&mut self, arena: &mut PageArena, slot: PageSlot) {
        debug_assert!(self.contains(arena, slot));
        let (prev, next) = {
            let rec = arena.get(slot);
            (rec.prev, rec.next)
        };
        match prev {
            Some(p) => arena.get_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena.get_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let rec = arena.get_mut(slot);
        rec.prev = None;
        rec.next = None;
        self.len -= 1;
    }

    /// Successor of `slot`, `None` at the tail
    pub fn next_of(&self, arena: &PageArena, slot: PageSlot) -> Option<PageSlot> {
        arena.get(slot).next
    }

    /// Slot at position `index` from the head, walking the links
    pub fn slot_at(&self, arena: &PageArena, index: usize) -> Option<PageSlot> {
        let mut cur = self.head;
        for _ in 0..index {
            cur = cur.and_then(|s| arena.get(s).next);
        }
        cur
    }

    /// Iterate slots head to tail
    pub fn iter<'a>(&'a self, arena: &'a PageArena) -> QueueIter<'a> {
        QueueIter {
            arena,
            cur: self.head,
        }
    }
}

/// Head-to-tail traversal of a `PageQueue`
pub struct QueueIter<'a> {
    arena: &'a PageArena,
    cur: Option<PageSlot>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = PageSlot;

    fn next(&mut self) -> Option<PageSlot> {
        let slot = self.cur?;
        self.cur = self.arena.get(slot).next;
        Some(slot)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Fault Interception and the Page State Machine
//!
//! Entry point for every trapped access. One invocation validates the
//! address, classifies the fault into one of five causes, applies the
//! protection and bookkeeping transitions, reclaims a frame when the
//! pool is exhausted, and emits exactly one fault record.
//!
//! ## Handling Process
//!
//! 1. Reject addresses outside the managed span (fatal)
//! 2. Split the address into page number and page offset
//! 3. Find the page's record, creating one on first touch
//! 4. No frame held: admit the page, taking a free frame or
//!    reclaiming one from the replacement engine
//! 5. Frame held: re-validate after a protection revocation or
//!    promote read-only to writable
//! 6. Count the fault and deliver the finished record to the sink

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::trace;

use crate::fault_log::FaultLogger;
use crate::pmap::{Pmap, PmapError, Protection};
use crate::vm_page::{PageNum, PageSlot, WritebackState};
use crate::vm_replace;
use crate::vm_space::VmSpace;

// ============================================================================
// Access Kind
// ============================================================================

/// Access mode of a trapped touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub const fn is_write(&self) -> bool {
        matches!(self, AccessKind::Write)
    }
}

// ============================================================================
// Platform Fault Flags
// ============================================================================

bitflags! {
    /// Page-fault error code bits as x86 pushes them.
    ///
    /// A host trap adapter decodes its fault-cause register into
    /// these and recovers the access mode with `AccessKind::from`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultFlags: u32 {
        /// Fault on a present page (protection violation)
        const PROT = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Fault taken in user mode
        const USER = 1 << 2;
        /// Reserved bit set in a paging entry
        const RSVD = 1 << 3;
        /// Instruction fetch
        const INSTR = 1 << 4;
    }
}

impl From<FaultFlags> for AccessKind {
    fn from(flags: FaultFlags) -> Self {
        if flags.contains(FaultFlags::WRITE) {
            AccessKind::Write
        } else {
            AccessKind::Read
        }
    }
}

// ============================================================================
// Fault Causes
// ============================================================================

/// Why a fault was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCause {
    /// Read of a page with no assigned frame
    ReadNPP,
    /// Write to a page with no assigned frame
    WriteNPP,
    /// Write to a resident page still mapped read-only
    WriteRO,
    /// Read of a resident page whose protection was revoked
    ReadRW,
    /// Write to a resident writable page whose protection was revoked
    WriteRW,
}

// ============================================================================
// Fault Record
// ============================================================================

/// The outcome of one handled fault.
///
/// Built fresh per invocation; a stale field can never leak from an
/// earlier fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    /// Faulting virtual page
    pub page: PageNum,
    /// Byte offset of the touch within its page
    pub offset: u64,
    /// Classified cause
    pub cause: FaultCause,
    /// Page evicted to make room, if any
    pub evicted: Option<PageNum>,
    /// The evicted page was dirty and needed writing back
    pub writeback: bool,
    /// Physical byte offset now backing the touch
    pub phys_offset: u64,
}

// ============================================================================
// Fault Statistics
// ============================================================================

/// Counters over all faults handled through one context
#[derive(Debug, Default)]
pub struct FaultStats {
    faults: AtomicU64,
    read_npp: AtomicU64,
    write_npp: AtomicU64,
    write_ro: AtomicU64,
    read_rw: AtomicU64,
    write_rw: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
}

impl FaultStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn count(&self, record: &FaultRecord) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        let by_cause = match record.cause {
            FaultCause::ReadNPP => &self.read_npp,
            FaultCause::WriteNPP => &self.write_npp,
            FaultCause::WriteRO => &self.write_ro,
            FaultCause::ReadRW => &self.read_rw,
            FaultCause::WriteRW => &self.write_rw,
        };
        by_cause.fetch_add(1, Ordering::Relaxed);
        if record.evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        if record.writeback {
            self.writebacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> FaultSnapshot {
        FaultSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            read_npp: self.read_npp.load(Ordering::Relaxed),
            write_npp: self.write_npp.load(Ordering::Relaxed),
            write_ro: self.write_ro.load(Ordering::Relaxed),
            read_rw: self.read_rw.load(Ordering::Relaxed),
            write_rw: self.write_rw.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the fault counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub faults: u64,
    pub read_npp: u64,
    pub write_npp: u64,
    pub write_ro: u64,
    pub read_rw: u64,
    pub write_rw: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Fatal fault-path failures.
///
/// Neither is recoverable. An address the span does not cover is an
/// illegal access, and a refused protection change leaves the span in
/// a state the core can no longer trust. The host must terminate the
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Faulting address outside the managed span
    OutOfRange,
    /// The protection controller refused a transition
    Protection(PmapError),
}

// ============================================================================
// Fault Handling
// ============================================================================

/// Handle one trapped access against `space`.
///
/// Exactly one record is delivered to `logger` per successful
/// invocation; on error nothing is logged or counted.
pub fn handle_fault<P: Pmap, L: FaultLogger>(
    space: &mut VmSpace,
    pmap: &mut P,
    logger: &mut L,
    stats: &FaultStats,
    addr: u64,
    access: AccessKind,
) -> Result<FaultRecord, FaultError> {
    if !space.contains(addr) {
        return Err(FaultError::OutOfRange);
    }
    let (page, offset) = space.decompose(addr);
    let slot = space.arena.lookup_or_insert(page);

    let (cause, eviction) = if space.arena.get(slot).is_resident() {
        (revalidate(space, pmap, slot, access)?, None)
    } else {
        let cause = admit(space, pmap, slot, access)?;
        let eviction = if space.has_free_frame() {
            let frame = space.take_free_frame();
            space.arena.get_mut(slot).frame = Some(frame);
            space.queue.push_tail(&mut space.arena, slot);
            None
        } else {
            Some(vm_replace::reclaim(space, pmap, slot)?)
        };
        (cause, eviction)
    };

    let frame = match space.arena.get(slot).frame {
        Some(frame) => frame,
        None => panic!("faulting page left without a frame"),
    };
    let record = FaultRecord {
        page,
        offset,
        cause,
        evicted: eviction.map(|e| e.page),
        writeback: eviction.is_some_and(|e| e.writeback),
        phys_offset: frame.0 * space.page_size() + offset,
    };
    stats.count(&record);
    trace!("fault: page {} {:?}", page.0, cause);
    logger.record(&record);
    Ok(record)
}

/// First grant for a page with no frame
fn admit<P: Pmap>(
    space: &mut VmSpace,
    pmap: &mut P,
    slot: PageSlot,
    access: AccessKind,
) -> Result<FaultCause, FaultError> {
    let start = space.page_start(space.arena.get(slot).page);
    let len = space.page_size();
    match access {
        AccessKind::Write => {
            // A recycled record may carry a stale read-only flag; the
            // write path leaves it as found
            let rec = space.arena.get_mut(slot);
            rec.referenced = true;
            rec.writeback = WritebackState::DirtyPendingChance;
            pmap.protect(start, len, Protection::ReadWrite)
                .map_err(FaultError::Protection)?;
            Ok(FaultCause::WriteNPP)
        }
        AccessKind::Read => {
            let rec = space.arena.get_mut(slot);
            rec.read_only = true;
            rec.referenced = true;
            pmap.protect(start, len, Protection::ReadOnly)
                .map_err(FaultError::Protection)?;
            Ok(FaultCause::ReadNPP)
        }
    }
}

/// Re-grant for a resident page, promoting on write
fn revalidate<P: Pmap>(
    space: &mut VmSpace,
    pmap: &mut P,
    slot: PageSlot,
    access: AccessKind,
) -> Result<FaultCause, FaultError> {
    let start = space.page_start(space.arena.get(slot).page);
    let len = space.page_size();
    let read_only = space.arena.get(slot).read_only;
    match (access, read_only) {
        (AccessKind::Write, true) => {
            let rec = space.arena.get_mut(slot);
            rec.read_only = false;
            rec.referenced = true;
            rec.writeback = WritebackState::DirtyPendingChance;
            pmap.protect(start, len, Protection::ReadWrite)
                .map_err(FaultError::Protection)?;
            Ok(FaultCause::WriteRO)
        }
        (AccessKind::Write, false) => {
            let rec = space.arena.get_mut(slot);
            rec.referenced = true;
            rec.writeback = WritebackState::DirtyPendingChance;
            pmap.protect(start, len, Protection::ReadWrite)
                .map_err(FaultError::Protection)?;
            Ok(FaultCause::WriteRW)
        }
        (AccessKind::Read, _) => {
            // The read-only flag is left alone: it records write
            // history, not the granted level
            space.arena.get_mut(slot).referenced = true;
            pmap.protect(start, len, Protection::ReadOnly)
                .map_err(FaultError::Protection)?;
            Ok(FaultCause::ReadRW)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_log::VecLog;
    use crate::pmap::SimPmap;
    use crate::vm_page::FrameNum;
    use crate::vm_space::{ReplacementPolicy, VmConfig};

    const BASE: u64 = 0x10_0000;
    const PAGE: u64 = 0x1000;

    fn setup(frames: u64, pages: u64) -> (VmSpace, SimPmap, VecLog, FaultStats) {
        let size = pages * PAGE;
        let config = VmConfig {
            policy: ReplacementPolicy::FIFO,
            base: BASE,
            size,
            frames,
            page_size: PAGE,
        };
        (
            VmSpace::new(config).unwrap(),
            SimPmap::new(BASE, size, PAGE),
            VecLog::new(),
            FaultStats::new(),
        )
    }

    fn fault(
        space: &mut VmSpace,
        pmap: &mut SimPmap,
        logger: &mut VecLog,
        stats: &FaultStats,
        addr: u64,
        access: AccessKind,
    ) -> FaultRecord {
        handle_fault(space, pmap, logger, stats, addr, access).unwrap()
    }

    #[test]
    fn test_out_of_range_is_fatal() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        for addr in [0, BASE - 1, BASE + 4 * PAGE, u64::MAX] {
            let got = handle_fault(
                &mut space,
                &mut pmap,
                &mut logger,
                &stats,
                addr,
                AccessKind::Write,
            );
            assert_eq!(got, Err(FaultError::OutOfRange));
        }
        // Nothing was logged or counted
        assert!(logger.records().is_empty());
        assert_eq!(stats.snapshot(), FaultSnapshot::default());
        assert_eq!(space.occupied(), 0);
    }

    #[test]
    fn test_first_write_admits() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        let addr = BASE + PAGE + 0x21;
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, addr, AccessKind::Write);

        assert_eq!(rec.page, PageNum(1));
        assert_eq!(rec.offset, 0x21);
        assert_eq!(rec.cause, FaultCause::WriteNPP);
        assert_eq!(rec.evicted, None);
        assert!(!rec.writeback);
        assert_eq!(rec.phys_offset, 0x21);

        let page = space.record(PageNum(1)).unwrap();
        assert_eq!(page.frame, Some(FrameNum(0)));
        assert!(page.referenced);
        assert!(!page.read_only);
        assert_eq!(page.writeback, WritebackState::DirtyPendingChance);
        assert_eq!(pmap.query(BASE + PAGE), Protection::ReadWrite);
        assert_eq!(space.occupied(), 1);
        assert_eq!(logger.records(), &[rec]);
    }

    #[test]
    fn test_first_read_admits_read_only() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Read);

        assert_eq!(rec.cause, FaultCause::ReadNPP);
        let page = space.record(PageNum(0)).unwrap();
        assert!(page.read_only);
        assert!(page.referenced);
        assert_eq!(page.writeback, WritebackState::Clean);
        assert_eq!(pmap.query(BASE), Protection::ReadOnly);
    }

    #[test]
    fn test_write_promotes_read_only_page() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Read);
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE + 5, AccessKind::Write);

        assert_eq!(rec.cause, FaultCause::WriteRO);
        assert_eq!(rec.evicted, None);
        let page = space.record(PageNum(0)).unwrap();
        assert!(!page.read_only);
        assert_eq!(page.writeback, WritebackState::DirtyPendingChance);
        assert_eq!(page.frame, Some(FrameNum(0)));
        assert_eq!(pmap.query(BASE), Protection::ReadWrite);
        // Promotion reuses the frame, the pool is untouched
        assert_eq!(space.occupied(), 1);
    }

    #[test]
    fn test_read_revalidation_keeps_frame() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Write);

        // A sweep would revoke the grant; model that directly
        pmap.protect(BASE, PAGE, Protection::None).unwrap();
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE + 9, AccessKind::Read);

        assert_eq!(rec.cause, FaultCause::ReadRW);
        assert_eq!(rec.phys_offset, 9);
        assert_eq!(pmap.query(BASE), Protection::ReadOnly);
        let page = space.record(PageNum(0)).unwrap();
        assert_eq!(page.frame, Some(FrameNum(0)));
        // Read re-validation never rewrites the write history
        assert!(!page.read_only);
    }

    #[test]
    fn test_write_revalidation_after_revoke() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Write);
        pmap.protect(BASE, PAGE, Protection::None).unwrap();
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Write);

        // The page was never read-only, so this is not a promotion
        assert_eq!(rec.cause, FaultCause::WriteRW);
        assert_eq!(pmap.query(BASE), Protection::ReadWrite);
    }

    #[test]
    fn test_read_then_write_after_revoke_still_promotes() {
        let (mut space, mut pmap, mut logger, stats) = setup(2, 4);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Read);
        pmap.protect(BASE, PAGE, Protection::None).unwrap();

        // Revalidate by read first: flag survives, so the write is WriteRO
        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Read);
        assert_eq!(rec.cause, FaultCause::ReadRW);
        assert!(space.record(PageNum(0)).unwrap().read_only);

        let rec = fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Write);
        assert_eq!(rec.cause, FaultCause::WriteRO);
    }

    #[test]
    fn test_access_kind_from_flags() {
        assert_eq!(AccessKind::from(FaultFlags::empty()), AccessKind::Read);
        assert_eq!(AccessKind::from(FaultFlags::PROT), AccessKind::Read);
        assert_eq!(AccessKind::from(FaultFlags::WRITE), AccessKind::Write);
        assert_eq!(
            AccessKind::from(FaultFlags::PROT | FaultFlags::WRITE | FaultFlags::USER),
            AccessKind::Write
        );
        assert!(AccessKind::Write.is_write());
        assert!(!AccessKind::Read.is_write());
    }

    #[test]
    fn test_stats_counting() {
        let (mut space, mut pmap, mut logger, stats) = setup(4, 4);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE, AccessKind::Write);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE + PAGE, AccessKind::Read);
        fault(&mut space, &mut pmap, &mut logger, &stats, BASE + PAGE, AccessKind::Write);

        let snap = stats.snapshot();
        assert_eq!(snap.faults, 3);
        assert_eq!(snap.write_npp, 1);
        assert_eq!(snap.read_npp, 1);
        assert_eq!(snap.write_ro, 1);
        assert_eq!(snap.read_rw, 0);
        assert_eq!(snap.write_rw, 0);
        assert_eq!(snap.evictions, 0);
        assert_eq!(snap.writebacks, 0);
    }
}

//! Frame Replacement - FIFO and Enhanced-Clock Victim Selection
//!
//! Runs only once every frame is occupied. Picks a victim, revokes
//! it, hands its frame to the faulting page, and reports what
//! happened for the fault record.
//!
//! FIFO takes the oldest resident and recycles its record to the
//! tail. The enhanced clock sweeps a persistent cursor around the
//! admission ring: a set reference bit buys a pass, a pending dirty
//! chance buys another, and whoever is out of both loses the frame.
//! Every resident the sweep visits loses its protection, so its next
//! touch faults and refreshes the simulated bits.

use log::debug;

use crate::pmap::{Pmap, Protection};
use crate::vm_fault::FaultError;
use crate::vm_page::{PageNum, PageSlot, WritebackState};
use crate::vm_space::{ReplacementPolicy, VmSpace};

// ============================================================================
// Eviction Summary
// ============================================================================

/// What a reclaim did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    /// Page that lost its frame
    pub page: PageNum,
    /// The victim was dirty and needed writing back
    pub writeback: bool,
}

// ============================================================================
// Reclaim
// ============================================================================

/// Free a frame for `slot` under the configured policy.
///
/// The caller guarantees the pool is exhausted; a pool that is full
/// yet holds no resident page is a corrupted state machine.
pub(crate) fn reclaim<P: Pmap>(
    space: &mut VmSpace,
    pmap: &mut P,
    slot: PageSlot,
) -> Result<Eviction, FaultError> {
    assert!(
        space.resident_pages() > 0,
        "reclaim with no resident pages"
    );
    debug_assert_eq!(space.resident_pages(), space.occupied());
    match space.policy() {
        ReplacementPolicy::FIFO => reclaim_fifo(space, pmap, slot),
        ReplacementPolicy::EnhancedClock => reclaim_clock(space, pmap, slot),
    }
}

/// Oldest resident loses; its reset record rejoins at the tail
fn reclaim_fifo<P: Pmap>(
    space: &mut VmSpace,
    pmap: &mut P,
    slot: PageSlot,
) -> Result<Eviction, FaultError> {
    let victim = space
        .queue
        .iter(&space.arena)
        .find(|&s| space.arena.get(s).is_resident());
    let victim = match victim {
        Some(s) => s,
        None => unreachable!("resident pages exist but none are queued"),
    };

    let (page, freed, writeback) = {
        let rec = space.arena.get_mut(victim);
        let page = rec.page;
        let freed = match rec.frame.take() {
            Some(f) => f,
            None => unreachable!("victim without a frame"),
        };
        let writeback = rec.writeback.needs_writeback();
        rec.reset();
        (page, freed, writeback)
    };
    space.queue.remove(&mut space.arena, victim);
    pmap.protect(space.page_start(page), space.page_size(), Protection::None)
        .map_err(FaultError::Protection)?;
    space.queue.push_tail(&mut space.arena, victim);

    debug!(
        "evict: page {} frame {} writeback {}",
        page.0, freed.0, writeback
    );

    // The faulting page takes the frame and the true tail position,
    // shedding any stale placeholder position first
    if space.queue.contains(&space.arena, slot) {
        space.queue.remove(&mut space.arena, slot);
    }
    space.arena.get_mut(slot).frame = Some(freed);
    space.queue.push_tail(&mut space.arena, slot);

    Ok(Eviction { page, writeback })
}

/// Sweep the ring from the cursor until someone is out of chances
fn reclaim_clock<P: Pmap>(
    space: &mut VmSpace,
    pmap: &mut P,
    slot: PageSlot,
) -> Result<Eviction, FaultError> {
    let len = space.page_size();
    loop {
        let mut cur = space.queue.slot_at(&space.arena, space.cursor);
        while let Some(s) = cur {
            space.cursor += 1;
            if space.arena.get(s).is_resident() {
                // Revoke before judging: survivors must fault on
                // their next touch to refresh the simulated bits
                let start = space.page_start(space.arena.get(s).page);
                pmap.protect(start, len, Protection::None)
                    .map_err(FaultError::Protection)?;

                let rec = space.arena.get_mut(s);
                if rec.referenced {
                    rec.referenced = false;
                } else if rec.writeback.has_chance() {
                    // Dirty pages buy one extra sweep
                    rec.writeback = WritebackState::DirtyNoChance;
                } else {
                    let page = rec.page;
                    let writeback = rec.writeback.needs_writeback();
                    let freed = match rec.frame.take() {
                        Some(f) => f,
                        None => unreachable!("victim without a frame"),
                    };
                    rec.writeback = WritebackState::Clean;
                    // A victim at the tail wraps the cursor
                    if space.queue.next_of(&space.arena, s).is_none() {
                        space.cursor = 0;
                    }

                    debug!(
                        "evict: page {} frame {} writeback {}",
                        page.0, freed.0, writeback
                    );

                    // A brand-new record joins the tail; a recycled
                    // one re-faulting keeps its old ring position
                    space.arena.get_mut(slot).frame = Some(freed);
                    if !space.queue.contains(&space.arena, slot) {
                        space.queue.push_tail(&mut space.arena, slot);
                    }
                    return Ok(Eviction { page, writeback });
                }
            }
            cur = space.queue.next_of(&space.arena, s);
        }
        // Ran off the tail without a victim, wrap and sweep again
        space.cursor = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Address Space Descriptor and Run Configuration
//!
//! Geometry, policy, and the mutable paging state of one run: how
//! many frames are handed out, where the clock cursor rests, and the
//! record arena with its admission queue.

use crate::vm_page::{FrameNum, PageArena, PageNum, PageQueue, PageRecord};

// ============================================================================
// Replacement Policy
// ============================================================================

/// Replacement policy selector, fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Evict in admission order
    FIFO,
    /// Second chance with reference bits and dirty-page deferral
    EnhancedClock,
}

// ============================================================================
// Configuration
// ============================================================================

/// Geometry and policy of a run
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub policy: ReplacementPolicy,
    /// First byte of the managed span
    pub base: u64,
    /// Span length in bytes, a whole number of pages
    pub size: u64,
    /// Frame pool capacity
    pub frames: u64,
    /// Page length in bytes
    pub page_size: u64,
}

impl VmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.frames == 0 {
            return Err(ConfigError::ZeroFrames);
        }
        if self.size == 0 || self.size % self.page_size != 0 {
            return Err(ConfigError::BadLength);
        }
        if self.base.checked_add(self.size).is_none() {
            return Err(ConfigError::SpanOverflow);
        }
        Ok(())
    }

    /// Number of pages in the span
    pub fn pages(&self) -> u64 {
        self.size / self.page_size
    }
}

/// Rejected configurations; fatal at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Page length of zero
    ZeroPageSize,
    /// Frame pool of zero
    ZeroFrames,
    /// Span empty or not a whole number of pages
    BadLength,
    /// Span wraps the address space
    SpanOverflow,
}

// ============================================================================
// Address Space Descriptor
// ============================================================================

/// One simulated address space.
///
/// Owns the record arena and the admission queue. The occupied count
/// only ever grows: eviction hands a frame to the next page, it never
/// returns one to the pool.
#[derive(Debug)]
pub struct VmSpace {
    policy: ReplacementPolicy,
    base: u64,
    size: u64,
    page_size: u64,
    frames: u64,
    /// Frames handed out so far
    pub(crate) occupied: u64,
    /// Queue position where the next clock sweep resumes
    pub(crate) cursor: usize,
    pub(crate) arena: PageArena,
    pub(crate) queue: PageQueue,
}

impl VmSpace {
    pub fn new(config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            policy: config.policy,
            base: config.base,
            size: config.size,
            page_size: config.page_size,
            frames: config.frames,
            occupied: 0,
            cursor: 0,
            arena: PageArena::new(),
            queue: PageQueue::new(),
        })
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Frame pool capacity
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames handed out so far
    pub fn occupied(&self) -> u64 {
        self.occupied
    }

    /// Current clock cursor position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of pages in the span
    pub fn pages(&self) -> u64 {
        self.size / self.page_size
    }

    /// True if `addr` falls inside the managed span
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    /// Split an in-span address into page number and page offset
    pub fn decompose(&self, addr: u64) -> (PageNum, u64) {
        debug_assert!(self.contains(addr));
        let rel = addr - self.base;
        (PageNum(rel / self.page_size), rel % self.page_size)
    }

    /// First byte of `page`
    pub fn page_start(&self, page: PageNum) -> u64 {
        self.base + page.0 * self.page_size
    }

    /// Record of `page`, if the page has ever faulted
    pub fn record(&self, page: PageNum) -> Option<&PageRecord> {
        self.arena.lookup(page).map(|slot| self.arena.get(slot))
    }

    /// Number of records currently holding a frame
    pub fn resident_pages(&self) -> u64 {
        self.arena.records().filter(|r| r.is_resident()).count() as u64
    }

    /// Pages in the admission queue, head to tail
    pub fn queue_pages(&self) -> impl Iterator<Item = PageNum> + '_ {
        self.queue.iter(&self.arena).map(|s| self.arena.get(s).page)
    }

    pub(crate) fn has_free_frame(&self) -> bool {
        self.occupied < self.frames
    }

    /// Hand out the next frame from the pool
    pub(crate) fn take_free_frame(&mut self) -> FrameNum {
        debug_assert!(self.has_free_frame());
        let frame = FrameNum(self.occupied);
        self.occupied += 1;
        frame
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Protection Controller - Per-Page Access Control
//!
//! Bridges the paging core to whatever enforces page protection on
//! the host. The core asks for exactly one thing: set a region of the
//! managed span to a protection level. Trapping the accesses that the
//! level forbids is the host's side of the bargain; the controller
//! never generates faults itself.
//!
//! `SimPmap` is the built-in software controller. It remembers the
//! level granted to every page, so a driver can decide before touching
//! memory whether the touch would trap.

use alloc::collections::BTreeMap;

// ============================================================================
// Protection Levels
// ============================================================================

/// Page protection level.
///
/// Levels are exclusive: a page sits at exactly one level at a time,
/// and every page of a fresh span sits at `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Protection {
    /// All access denied
    #[default]
    None,
    /// Reads allowed, writes trap
    ReadOnly,
    /// Reads and writes allowed
    ReadWrite,
}

impl Protection {
    /// True if a read at this level proceeds without trapping
    pub const fn allows_read(&self) -> bool {
        !matches!(self, Protection::None)
    }

    /// True if a write at this level proceeds without trapping
    pub const fn allows_write(&self) -> bool {
        matches!(self, Protection::ReadWrite)
    }
}

// ============================================================================
// Controller Trait
// ============================================================================

/// Applies protection changes over the managed span.
///
/// Fault paths always pass a single page; initialization passes the
/// whole span. A failure here is fatal to the run: the caller
/// propagates it and the host must terminate, because the span's
/// protection state is no longer known.
pub trait Pmap {
    fn protect(&mut self, addr: u64, len: u64, level: Protection) -> Result<(), PmapError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Protection request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmapError {
    /// Range is not page-aligned or not a whole number of pages
    Unaligned,
    /// Range falls outside the span the controller was built for
    OutOfSpan,
    /// The platform refused the change
    Rejected,
}

// ============================================================================
// Simulated Controller
// ============================================================================

/// Software protection controller.
///
/// Tracks the level granted to each page of the span, keyed by page
/// start address. Pages never granted anything report
/// `Protection::None`, matching a span that starts fully revoked.
#[derive(Debug)]
pub struct SimPmap {
    base: u64,
    size: u64,
    page_size: u64,
    granted: BTreeMap<u64, Protection>,
}

impl SimPmap {
    /// Create a controller for `size` bytes at `base`.
    pub fn new(base: u64, size: u64, page_size: u64) -> Self {
        debug_assert!(page_size > 0);
        Self {
            base,
            size,
            page_size,
            granted: BTreeMap::new(),
        }
    }

    /// Level currently granted to the page containing `addr`.
    ///
    /// Addresses outside the span report `None`: there is nothing to
    /// grant there.
    pub fn query(&self, addr: u64) -> Protection {
        if addr < self.base || addr >= self.base.saturating_add(self.size) {
            return Protection::None;
        }
        let start = addr - (addr - self.base) % self.page_size;
        self.granted.get(&start).copied().unwrap_or_default()
    }

    /// Number of pages holding a grant above `None`
    pub fn granted_pages(&self) -> usize {
        self.granted.len()
    }
}

impl Pmap for SimPmap {
    fn protect(&mut self, addr: u64, len: u64, level: Protection) -> Result<(), PmapError> {
        let end = addr.checked_add(len).ok_or(PmapError::OutOfSpan)?;
        if addr < self.base || end > self.base.saturating_add(self.size) {
            return Err(PmapError::OutOfSpan);
        }
        if len == 0 || len % self.page_size != 0 || (addr - self.base) % self.page_size != 0 {
            return Err(PmapError::Unaligned);
        }

        let mut start = addr;
        while start < end {
            // No grant stored means None; keeps the map to granted pages only
            if level == Protection::None {
                self.granted.remove(&start);
            } else {
                self.granted.insert(start, level);
            }
            start += self.page_size;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

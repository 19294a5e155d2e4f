//! The Paging Context
//!
//! Owns everything one run needs: the descriptor, the protection
//! controller, the log sink, and the counters. Built once and
//! threaded explicitly; nothing in this crate is global state.
//! Multi-threaded hosts wrap the context in `SharedVmm`, which
//! serializes whole fault sequences behind a single lock.

use log::info;
use spin::Mutex;

use crate::fault_log::{FaultLogger, VecLog};
use crate::pmap::{Pmap, PmapError, Protection, SimPmap};
use crate::vm_fault::{
    self, AccessKind, FaultError, FaultFlags, FaultRecord, FaultSnapshot, FaultStats,
};
use crate::vm_space::{ConfigError, VmConfig, VmSpace};

// ============================================================================
// Errors
// ============================================================================

/// Context construction failures; the host must not continue past one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// Rejected geometry
    Config(ConfigError),
    /// Initial whole-span revocation refused
    Protection(PmapError),
}

impl From<ConfigError> for VmmError {
    fn from(err: ConfigError) -> Self {
        VmmError::Config(err)
    }
}

// ============================================================================
// Context
// ============================================================================

/// One paging run: descriptor, controller, sink, counters
#[derive(Debug)]
pub struct Vmm<P: Pmap, L: FaultLogger> {
    space: VmSpace,
    pmap: P,
    logger: L,
    stats: FaultStats,
}

impl<P: Pmap, L: FaultLogger> Vmm<P, L> {
    /// Validate the configuration and revoke the whole span.
    ///
    /// Every page starts at `Protection::None`, so the first touch of
    /// anything faults.
    pub fn new(config: VmConfig, mut pmap: P, logger: L) -> Result<Self, VmmError> {
        let space = VmSpace::new(config)?;
        pmap.protect(config.base, config.size, Protection::None)
            .map_err(VmmError::Protection)?;
        info!(
            "vmm: policy {:?}, {} pages of {} bytes, {} frames",
            config.policy,
            config.pages(),
            config.page_size,
            config.frames
        );
        Ok(Self {
            space,
            pmap,
            logger,
            stats: FaultStats::new(),
        })
    }

    /// Handle one trapped access
    pub fn fault(&mut self, addr: u64, access: AccessKind) -> Result<FaultRecord, FaultError> {
        vm_fault::handle_fault(
            &mut self.space,
            &mut self.pmap,
            &mut self.logger,
            &self.stats,
            addr,
            access,
        )
    }

    /// Decode a raw fault error code, then handle the access
    pub fn fault_with_flags(
        &mut self,
        addr: u64,
        flags: FaultFlags,
    ) -> Result<FaultRecord, FaultError> {
        self.fault(addr, AccessKind::from(flags))
    }

    pub fn space(&self) -> &VmSpace {
        &self.space
    }

    pub fn pmap(&self) -> &P {
        &self.pmap
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    pub fn stats(&self) -> FaultSnapshot {
        self.stats.snapshot()
    }

    /// Give up the context, keeping the collected log
    pub fn into_logger(self) -> L {
        self.logger
    }
}

impl Vmm<SimPmap, VecLog> {
    /// Fully simulated context: software protection, collecting sink
    pub fn simulated(config: VmConfig) -> Result<Self, VmmError> {
        let pmap = SimPmap::new(config.base, config.size, config.page_size);
        Self::new(config, pmap, VecLog::new())
    }
}

// ============================================================================
// Shared Context
// ============================================================================

/// A context behind one lock.
///
/// The entire fault sequence runs under a single acquisition, so
/// concurrent callers observe faults as whole units and never an
/// intermediate state.
pub struct SharedVmm<P: Pmap, L: FaultLogger> {
    inner: Mutex<Vmm<P, L>>,
}

impl<P: Pmap, L: FaultLogger> SharedVmm<P, L> {
    pub fn new(vmm: Vmm<P, L>) -> Self {
        Self {
            inner: Mutex::new(vmm),
        }
    }

    /// Handle one trapped access as one critical section
    pub fn fault(&self, addr: u64, access: AccessKind) -> Result<FaultRecord, FaultError> {
        self.inner.lock().fault(addr, access)
    }

    pub fn stats(&self) -> FaultSnapshot {
        self.inner.lock().stats()
    }

    /// Direct access for anything beyond fault handling
    pub fn lock(&self) -> spin::MutexGuard<'_, Vmm<P, L>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> Vmm<P, L> {
        self.inner.into_inner()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Pagesim - A user-space demand-paging and page-replacement simulator
//!
//! Models a span of virtual memory backed by a small pool of physical
//! frames. Touches that protection denies trap into a fault handler,
//! which classifies the cause and admits or re-validates the page,
//! recycling frames under FIFO or enhanced-clock replacement once the
//! pool is exhausted:
//! - vm_page: page records, slot arena and the admission ring
//! - pmap: software protection map
//! - vm_space: managed span, frame pool and policy state
//! - vm_fault: fault classification and resolution
//! - vm_replace: victim selection and frame recycling
//! - fault_log: fault record sinks
//! - vmm: the owning context and its shared wrapper
//! - sim: trace replay with hardware-style hit filtering

#![no_std]
// Replacement policies keep their conventional all-caps names
#![allow(clippy::upper_case_acronyms)]

// Standard library replacement for no_std
extern crate alloc;

// Property tests run hosted
#[cfg(test)]
extern crate std;

pub mod fault_log;
pub mod pmap;
pub mod sim;
pub mod vm_fault;
pub mod vm_page;
mod vm_replace;
pub mod vm_space;
pub mod vmm;

pub use fault_log::{FaultLogger, NullLog, RingLog, VecLog};
pub use pmap::{Pmap, PmapError, Protection, SimPmap};
pub use sim::{Access, AccessOutcome, SimReport, Simulator};
pub use vm_fault::{
    AccessKind, FaultCause, FaultError, FaultFlags, FaultRecord, FaultSnapshot, FaultStats,
};
pub use vm_page::{FrameNum, PageNum, PageRecord, WritebackState};
pub use vm_space::{ConfigError, ReplacementPolicy, VmConfig, VmSpace};
pub use vmm::{SharedVmm, Vmm, VmmError};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Library name
pub const NAME: &str = "Pagesim";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "Pagesim");
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_surface_smoke() {
        let config = VmConfig {
            policy: ReplacementPolicy::EnhancedClock,
            base: 0x1000,
            size: 0x4000,
            frames: 1,
            page_size: 0x1000,
        };
        let mut vmm = Vmm::simulated(config).unwrap();
        vmm.fault(0x1008, AccessKind::Write).unwrap();
        let rec = vmm.fault(0x2000, AccessKind::Read).unwrap();
        assert_eq!(rec.cause, FaultCause::ReadNPP);
        assert_eq!(rec.evicted, Some(PageNum(0)));
        assert_eq!(vmm.stats().faults, 2);
    }
}

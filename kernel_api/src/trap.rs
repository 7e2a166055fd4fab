//! Fault context delivered to the user-level page fault upcall

use bitflags::bitflags;
use core_types::VirtAddr;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Page fault error code pushed by the MMU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FaultErrorCode: u32 {
        /// The page was present (protection violation, not a missing page)
        const PRESENT = 0x1;
        /// The faulting access was a write
        const WRITE = 0x2;
        /// The access came from user mode
        const USER = 0x4;
    }
}

/// User trap frame for a page fault
///
/// Built by the kernel on the exception stack and handed to the upcall.
/// It lives only for the duration of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTrapframe {
    /// Address whose access faulted
    pub fault_va: VirtAddr,
    /// What kind of access faulted
    pub err: FaultErrorCode,
}

impl UTrapframe {
    pub fn new(fault_va: VirtAddr, err: FaultErrorCode) -> Self {
        Self { fault_va, err }
    }

    /// True if the faulting access was a write
    pub fn is_write(&self) -> bool {
        self.err.contains(FaultErrorCode::WRITE)
    }
}

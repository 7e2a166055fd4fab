//! Memory and environment audit log (test-only)
//!
//! Records every mapping change, frame release, fault delivery, and
//! environment lifecycle transition performed by the simulated kernel.
//! Audit logs are deterministic and queryable in tests but do not affect
//! kernel behavior.

use crate::fault_injection::Syscall;
use crate::frames::FrameId;
use core_types::{EnvId, PteFlags, VirtAddr};
use kernel_api::{EnvStatus, UTrapframe, UpcallEntry};
use serde::{Deserialize, Serialize};

/// Memory audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryEvent {
    /// Environment created
    EnvCreated {
        env: EnvId,
        parent: Option<EnvId>,
    },
    /// Run state changed
    EnvStatusChanged { env: EnvId, status: EnvStatus },
    /// Scheduler switched environments
    EnvSwitched { from: EnvId, to: EnvId },
    /// Environment destroyed
    EnvDestroyed { env: EnvId },
    /// Page fault upcall registered
    UpcallRegistered { env: EnvId, entry: UpcallEntry },
    /// Fresh frame allocated and mapped
    PageAllocated {
        env: EnvId,
        va: VirtAddr,
        frame: FrameId,
        perm: PteFlags,
    },
    /// Existing frame mapped into an environment
    PageMapped {
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        frame: FrameId,
        perm: PteFlags,
    },
    /// Mapping removed
    PageUnmapped {
        env: EnvId,
        va: VirtAddr,
        frame: FrameId,
    },
    /// Last reference to a frame dropped
    FrameReleased { frame: FrameId },
    /// Fault handed to the environment's upcall
    FaultDelivered { env: EnvId, utf: UTrapframe },
    /// Fault with no usable upcall; the environment was destroyed
    FaultUnhandled { env: EnvId, utf: UTrapframe },
    /// A kernel request returned an error
    SyscallFailed {
        env: EnvId,
        syscall: Syscall,
        code: i32,
    },
}

/// Audit log for memory operations
#[derive(Debug, Clone)]
pub struct MemoryAuditLog {
    events: Vec<MemoryEvent>,
}

impl MemoryAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Records an event
    pub fn record(&mut self, event: MemoryEvent) {
        self.events.push(event);
    }

    /// Returns all recorded events
    pub fn events(&self) -> &[MemoryEvent] {
        &self.events
    }

    /// Clears all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Checks if an event matching the predicate exists
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&MemoryEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    /// Counts events matching the predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&MemoryEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

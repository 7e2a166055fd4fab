//! Deterministic fault injection for testing
//!
//! This module provides a composable fault injection framework that allows
//! tests to make individual kernel requests fail, so that every error path
//! in user-space fork and fault handling can be reached on demand.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Faults trigger on exact call counts, never randomly
//! - **Composable**: Multiple faults can be combined in one plan
//! - **Minimal**: Small API surface, well-documented
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{FaultPlan, Syscall, SyscallFault};
//! use kernel_api::KernelError;
//!
//! let plan = FaultPlan::new()
//!     .with_syscall_fault(SyscallFault::FailNth {
//!         syscall: Syscall::PageMap,
//!         nth: 3,
//!         error: KernelError::NoMemory,
//!     })
//!     .with_syscall_fault(SyscallFault::FailAll {
//!         syscall: Syscall::Exofork,
//!         error: KernelError::NoFreeEnv,
//!     });
//! assert_eq!(plan.syscall_faults().len(), 2);
//! ```

use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kernel requests that can be targeted by a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Syscall {
    PageAlloc,
    PageMap,
    PageUnmap,
    Exofork,
    EnvSetPgfaultUpcall,
    EnvSetStatus,
    EnvDestroy,
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Syscall::PageAlloc => "page_alloc",
            Syscall::PageMap => "page_map",
            Syscall::PageUnmap => "page_unmap",
            Syscall::Exofork => "exofork",
            Syscall::EnvSetPgfaultUpcall => "env_set_pgfault_upcall",
            Syscall::EnvSetStatus => "env_set_status",
            Syscall::EnvDestroy => "env_destroy",
        };
        write!(f, "{}", name)
    }
}

/// A fault to inject into kernel request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallFault {
    /// Fail only the nth call (1-based) to `syscall`
    FailNth {
        syscall: Syscall,
        nth: usize,
        error: KernelError,
    },

    /// Fail every call to `syscall`
    FailAll { syscall: Syscall, error: KernelError },
}

/// A plan describing all faults to inject
///
/// This is configured per-test and provides a deterministic way to
/// inject various failure modes into the system.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    syscall_faults: Vec<SyscallFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self {
            syscall_faults: Vec::new(),
        }
    }

    /// Adds a syscall fault to the plan
    pub fn with_syscall_fault(mut self, fault: SyscallFault) -> Self {
        self.syscall_faults.push(fault);
        self
    }

    /// Returns a reference to the syscall faults
    pub fn syscall_faults(&self) -> &[SyscallFault] {
        &self.syscall_faults
    }
}

/// Fault injector that applies a plan to incoming kernel requests
///
/// Call counts start at zero when the injector is created.
#[derive(Debug)]
pub struct FaultInjector {
    plan: FaultPlan,
    calls: HashMap<Syscall, usize>,
    injected: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            calls: HashMap::new(),
            injected: 0,
        }
    }

    /// Records a call to `syscall` and returns the error to fail it with, if any
    pub fn check(&mut self, syscall: Syscall) -> Result<(), KernelError> {
        let count = self.calls.entry(syscall).or_insert(0);
        *count += 1;
        let count = *count;

        let hit = self.plan.syscall_faults().iter().find_map(|fault| match *fault {
            SyscallFault::FailNth {
                syscall: target,
                nth,
                error,
            } if target == syscall && nth == count => Some(error),
            SyscallFault::FailAll {
                syscall: target,
                error,
            } if target == syscall => Some(error),
            _ => None,
        });

        match hit {
            Some(error) => {
                self.injected += 1;
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Number of calls seen for `syscall`
    pub fn calls(&self, syscall: Syscall) -> usize {
        self.calls.get(&syscall).copied().unwrap_or(0)
    }

    /// Number of faults injected so far
    pub fn injected(&self) -> usize {
        self.injected
    }
}

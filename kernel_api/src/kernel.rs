//! Kernel API trait and environment management types

use crate::KernelError;
use core_types::{EnvId, PteFlags, VirtAddr};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of [`KernelApi::exofork`]
///
/// Creating a blank environment "returns twice": once in the caller with the
/// new id, and once in the new environment when it first runs. The two
/// returns are expressed as one tagged value so callers branch explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exofork {
    /// Returned in the creating environment
    Parent(EnvId),
    /// Returned inside the newly created environment
    Child,
}

/// Run state of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvStatus {
    /// Eligible to run
    Runnable,
    /// Currently executing
    Running,
    /// Exists but will not be scheduled
    NotRunnable,
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvStatus::Runnable => write!(f, "Runnable"),
            EnvStatus::Running => write!(f, "Running"),
            EnvStatus::NotRunnable => write!(f, "NotRunnable"),
        }
    }
}

/// Entry point the kernel transfers control to on a user page fault
///
/// Opaque to the kernel: it records the value and reports it back with each
/// delivered fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpcallEntry(pub VirtAddr);

/// The kernel API trait
///
/// This is the complete syscall surface user-space fork is built on.
/// Multiple implementations are possible:
/// - Simulated kernel (for testing)
/// - Real kernel (trap-based syscalls)
///
/// Every call is a blocking request: it either completes or returns an error
/// before the caller proceeds. [`EnvId::CURRENT`] names the caller.
///
/// # Example
///
/// ```
/// use core_types::{EnvId, PteFlags, VirtAddr};
/// use kernel_api::{KernelApi, KernelError};
///
/// fn scratch_page<K: KernelApi>(kernel: &mut K) -> Result<(), KernelError> {
///     let va = VirtAddr::new(0x0040_0000);
///     kernel.page_alloc(EnvId::CURRENT, va, PteFlags::USER_PRESENT | PteFlags::WRITABLE)?;
///     kernel.page_unmap(EnvId::CURRENT, va)
/// }
/// ```
pub trait KernelApi {
    /// Returns the caller's own environment id
    fn getenvid(&self) -> EnvId;

    /// Allocates a zeroed physical page and maps it at `va` in `env`
    ///
    /// Any existing mapping at `va` is replaced.
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<(), KernelError>;

    /// Maps the page backing `src_va` in `src_env` at `dst_va` in `dst_env`
    ///
    /// Both environments then refer to the same physical page. Granting
    /// write permission from a read-only source mapping is rejected.
    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError>;

    /// Removes the mapping at `va` in `env`; unmapped addresses are ignored
    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), KernelError>;

    /// Creates a blank, not-runnable environment
    fn exofork(&mut self) -> Result<Exofork, KernelError>;

    /// Registers the page fault upcall for `env`
    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry)
        -> Result<(), KernelError>;

    /// Sets the run state of `env`
    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), KernelError>;

    /// Destroys `env` and releases its mappings
    fn env_destroy(&mut self, env: EnvId) -> Result<(), KernelError>;
}

//! Test utilities for address space scenarios
//!
//! This module provides helper functions for building address spaces with
//! known contents, the way a program loader would, so tests can start from
//! a realistic parent image.

use crate::fault_injection::FaultPlan;
use crate::SimulatedKernel;
use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE};
use kernel_api::{KernelApi, KernelError};

/// Runs a test with a fault plan applied
///
/// This is a convenience helper that creates a kernel with the given
/// fault plan and passes it to the test closure.
///
/// # Example
///
/// ```
/// use sim_kernel::test_utils::with_fault_plan;
/// use sim_kernel::fault_injection::{FaultPlan, Syscall, SyscallFault};
/// use kernel_api::KernelError;
///
/// with_fault_plan(
///     FaultPlan::new().with_syscall_fault(SyscallFault::FailAll {
///         syscall: Syscall::Exofork,
///         error: KernelError::NoFreeEnv,
///     }),
///     |kernel| {
///         assert_eq!(kernel.env_count(), 1);
///     }
/// );
/// ```
pub fn with_fault_plan<F>(plan: FaultPlan, f: F)
where
    F: FnOnce(&mut SimulatedKernel),
{
    let mut kernel = SimulatedKernel::new().with_fault_plan(plan);
    f(&mut kernel);
}

/// Maps a page in the current environment and fills it with `fill`
pub fn map_filled_page(
    kernel: &mut SimulatedKernel,
    va: VirtAddr,
    perm: PteFlags,
    fill: u8,
) -> Result<(), KernelError> {
    kernel.page_alloc(EnvId::CURRENT, va, perm)?;
    kernel.poke(EnvId::CURRENT, va, &[fill; PGSIZE])
}

/// Maps a page in the current environment and writes a counting pattern
///
/// Byte `i` of the page holds `i % 251`, so a misplaced copy is detectable.
pub fn map_patterned_page(
    kernel: &mut SimulatedKernel,
    va: VirtAddr,
    perm: PteFlags,
) -> Result<(), KernelError> {
    kernel.page_alloc(EnvId::CURRENT, va, perm)?;
    kernel.poke(EnvId::CURRENT, va, &pattern())
}

/// The counting pattern written by [`map_patterned_page`]
pub fn pattern() -> Vec<u8> {
    (0..PGSIZE).map(|i| (i % 251) as u8).collect()
}

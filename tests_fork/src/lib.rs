//! Fork Scenario Test Utilities
//!
//! This crate provides shared utilities for fork and fault integration tests.
//!
//! ## Test Philosophy
//!
//! - **Byte-accurate**: every page holds real contents, so isolation is
//!   checked by reading memory, not by inspecting flags alone
//! - **Deterministic failures**: all kernel failures are injected via FaultPlan
//! - **Both sides of the fork point**: tests drive the parent and the child
//!   explicitly by switching the current environment
//! - **Inert on failure**: a child left behind by a failed fork never runs

use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE};
use cow_fork::{fork, EnvContext, FaultError, ForkError, ForkOutcome};
use kernel_api::KernelError;
use sim_kernel::test_utils::map_filled_page;
use sim_kernel::SimulatedKernel;
use thiserror::Error;

/// Ways a scenario step can go wrong
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("Kernel request failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("Fork failed: {0}")]
    Fork(#[from] ForkError),

    #[error("Fork returned {0} where the other side was expected")]
    WrongSide(ForkOutcome),
}

/// Writable data page used by most scenarios
pub const DATA_PAGE: VirtAddr = VirtAddr::new(0x0080_0000);

/// Page flagged for sharing across fork
pub const SHARED_PAGE: VirtAddr = VirtAddr::new(0x0080_1000);

/// Read-only page, as program text would be mapped
pub const TEXT_PAGE: VirtAddr = VirtAddr::new(0x0040_0000);

/// Bootstrap helper for tests
///
/// Creates a kernel whose boot environment has a context bound to it and
/// no pages mapped.
pub fn test_bootstrap() -> (SimulatedKernel, EnvContext<SimulatedKernel>) {
    let kernel = SimulatedKernel::new();
    let ctx = EnvContext::bind(&kernel);
    (kernel, ctx)
}

/// Bootstrap helper with a small program image
///
/// Maps a zero-filled writable [`DATA_PAGE`], a zero-filled [`SHARED_PAGE`]
/// flagged SHARE, and a read-only [`TEXT_PAGE`] filled with `0xc3`.
pub fn image_bootstrap() -> Result<(SimulatedKernel, EnvContext<SimulatedKernel>), ScenarioError> {
    let (mut kernel, ctx) = test_bootstrap();
    let rw = PteFlags::USER_PRESENT | PteFlags::WRITABLE;
    map_filled_page(&mut kernel, DATA_PAGE, rw, 0)?;
    map_filled_page(&mut kernel, SHARED_PAGE, rw | PteFlags::SHARE, 0)?;
    map_filled_page(&mut kernel, TEXT_PAGE, PteFlags::USER_PRESENT, 0xc3)?;
    Ok((kernel, ctx))
}

/// Forks from the current environment and returns the child id
///
/// Fails if fork returned the child outcome, which means the current
/// environment was itself a child that had not yet resumed.
pub fn fork_parent(
    ctx: &mut EnvContext<SimulatedKernel>,
    kernel: &mut SimulatedKernel,
) -> Result<EnvId, ScenarioError> {
    match fork(ctx, kernel)? {
        ForkOutcome::Parent { child } => Ok(child),
        outcome => Err(ScenarioError::WrongSide(outcome)),
    }
}

/// Switches to `child` and lets it return from fork
///
/// The child starts from a copy of its parent's context, exactly as it
/// would in memory, and returns with that copy rebound to itself.
pub fn enter_child(
    kernel: &mut SimulatedKernel,
    parent_ctx: &EnvContext<SimulatedKernel>,
    child: EnvId,
) -> Result<EnvContext<SimulatedKernel>, ScenarioError> {
    kernel.switch_to(child)?;
    let mut ctx = parent_ctx.clone();
    match fork(&mut ctx, kernel)? {
        ForkOutcome::Child => Ok(ctx),
        outcome => Err(ScenarioError::WrongSide(outcome)),
    }
}

/// Reads one whole page through the context
pub fn read_page(
    ctx: &mut EnvContext<SimulatedKernel>,
    kernel: &mut SimulatedKernel,
    va: VirtAddr,
) -> Result<Vec<u8>, FaultError> {
    let mut page = vec![0u8; PGSIZE];
    ctx.load(kernel, va, &mut page)?;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::KernelApi;

    #[test]
    fn test_image_bootstrap() {
        let (kernel, ctx) = image_bootstrap().unwrap();
        assert_eq!(ctx.env_id(), kernel.getenvid());
        assert_eq!(kernel.mappings(EnvId::CURRENT).len(), 3);
        assert!(kernel.pte_of(EnvId::CURRENT, SHARED_PAGE).unwrap().is_shared());
    }

    #[test]
    fn test_enter_child() {
        let (mut kernel, mut ctx) = image_bootstrap().unwrap();
        let child = fork_parent(&mut ctx, &mut kernel).unwrap();
        let child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
        assert_eq!(child_ctx.env_id(), child);
    }
}

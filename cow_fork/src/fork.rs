//! Duplication orchestrator
//!
//! Drives one fork: install the fault handler, create the child, transfer
//! every user page below [`USTACKTOP`], give the child its own exception
//! stack and upcall, and finally let it run.
//!
//! The child is released only as the last step. If anything before that
//! fails the child exists but is never scheduled, and the error reaches the
//! caller.

use crate::context::{EnvContext, PGFAULT_UPCALL};
use crate::duppage::duppage;
use crate::error::ForkError;
use crate::pgfault::pgfault;
use core_types::{EnvId, PageNumber, PteFlags, NPTENTRIES, USTACKTOP, UXSTACKBASE};
use kernel_api::{EnvStatus, Exofork, KernelApi, PageTableView, UserMemory};
use std::fmt;

/// What fork returned in the environment that observes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Running in the parent; the child is runnable
    Parent { child: EnvId },
    /// Running in the freshly created child
    Child,
}

impl ForkOutcome {
    /// Returns the classic integer form: the child id in the parent, 0 in the child
    ///
    /// Environment ids never exceed `i32::MAX`, so the parent's code is
    /// always positive.
    pub fn code(&self) -> i32 {
        match self {
            ForkOutcome::Parent { child } => i32::try_from(child.as_raw()).unwrap_or(i32::MAX),
            ForkOutcome::Child => 0,
        }
    }

    /// True when observed in the newly created child
    pub fn is_child(&self) -> bool {
        matches!(self, ForkOutcome::Child)
    }
}

impl fmt::Display for ForkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkOutcome::Parent { child } => write!(f, "parent of {}", child),
            ForkOutcome::Child => write!(f, "child"),
        }
    }
}

/// Creates a copy-on-write duplicate of the calling environment
///
/// Returns [`ForkOutcome::Parent`] in the caller and [`ForkOutcome::Child`]
/// when the child resumes. In the child, `ctx` is rebound to the child's
/// own identity before returning.
pub fn fork<K>(ctx: &mut EnvContext<K>, kernel: &mut K) -> Result<ForkOutcome, ForkError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    let result = fork_inner(ctx, kernel);
    if let Err(error) = &result {
        log::error!("{}: fork failed: {}", ctx.env_id(), error);
    }
    result
}

fn fork_inner<K>(ctx: &mut EnvContext<K>, kernel: &mut K) -> Result<ForkOutcome, ForkError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    ctx.set_pgfault_handler(kernel, pgfault::<K>)
        .map_err(ForkError::Handler)?;

    let child = match kernel.exofork().map_err(ForkError::Exofork)? {
        Exofork::Child => {
            ctx.rebind(kernel);
            return Ok(ForkOutcome::Child);
        }
        Exofork::Parent(child) => child,
    };

    let copied = duplicate_address_space(ctx, kernel, child)?;

    // The exception stack is never shared: a fault in the child must not
    // scribble on the parent's handler frames.
    kernel
        .page_alloc(child, UXSTACKBASE, PteFlags::USER_PRESENT | PteFlags::WRITABLE)
        .map_err(ForkError::ExceptionStack)?;
    kernel
        .env_set_pgfault_upcall(child, PGFAULT_UPCALL)
        .map_err(ForkError::SetUpcall)?;
    kernel
        .env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::SetStatus)?;

    log::info!("{}: forked {} ({} pages)", ctx.env_id(), child, copied);
    Ok(ForkOutcome::Parent { child })
}

/// Transfers every present user page below [`USTACKTOP`] into `child`
///
/// Directories whose entry is not present are skipped whole.
fn duplicate_address_space<K>(
    ctx: &EnvContext<K>,
    kernel: &mut K,
    child: EnvId,
) -> Result<usize, ForkError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    let end = USTACKTOP.page_number();
    let mut pn = PageNumber::new(0);
    let mut copied = 0;

    while pn < end {
        if !kernel.pde(pn.addr()).is_present() {
            pn = PageNumber::new((pn.pdx() + 1) * NPTENTRIES);
            continue;
        }

        if kernel.is_mapped(pn) && kernel.pte(pn).is_user() {
            duppage(ctx, kernel, child, pn).map_err(|error| ForkError::DupPage { pn, error })?;
            copied += 1;
        }
        pn = pn.next();
    }

    Ok(copied)
}

/// Shared-memory fork
///
/// Sharing everything but the stack has no settled semantics here, so this
/// always fails with [`ForkError::Unsupported`] and creates nothing.
pub fn sfork<K>(ctx: &mut EnvContext<K>, _kernel: &mut K) -> Result<ForkOutcome, ForkError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    log::warn!("{}: sfork requested but not supported", ctx.env_id());
    Err(ForkError::Unsupported)
}

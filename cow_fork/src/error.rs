//! Fork and fault handling error types

use core_types::{PageNumber, PteFlags, VirtAddr};
use kernel_api::{AccessError, FaultErrorCode, KernelError};
use thiserror::Error;

/// Errors raised while resolving a page fault
///
/// All of these are fatal to the faulting environment: a half-resolved
/// fault leaves the page either unmapped or stale.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FaultError {
    /// The fault was not a write to a present copy-on-write page
    #[error("Fault at {va} is not a write to a copy-on-write page (err {err:?}, pte {pte})")]
    NotCopyOnWrite {
        va: VirtAddr,
        err: FaultErrorCode,
        pte: PteFlags,
    },

    #[error("Failed to allocate private page: {0}")]
    Alloc(KernelError),

    #[error("Failed to copy page contents: {0}")]
    Copy(AccessError),

    #[error("Failed to unmap shared page: {0}")]
    UnmapShared(KernelError),

    #[error("Failed to map private page: {0}")]
    MapPrivate(KernelError),

    #[error("Failed to unmap scratch page: {0}")]
    UnmapScratch(KernelError),

    /// A fault arrived with no handler installed
    #[error("No page fault handler installed")]
    NoHandler,

    /// The handler returned but the access faulted again at the same address
    #[error("Fault at {0} persisted after the handler returned")]
    Unresolved(VirtAddr),

    /// The kernel destroyed the environment instead of delivering the fault
    #[error("Environment destroyed by an undeliverable fault")]
    Killed,
}

impl FaultError {
    /// True if the kernel already destroyed the faulting environment
    pub fn is_killed(&self) -> bool {
        matches!(
            self,
            FaultError::Killed | FaultError::Copy(AccessError::Killed)
        )
    }
}

/// Errors raised by fork
///
/// The child, if one was created, is never made runnable after any of these
/// and stays inert.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ForkError {
    #[error("Failed to install page fault handler: {0}")]
    Handler(KernelError),

    #[error("Failed to create child environment: {0}")]
    Exofork(KernelError),

    #[error("Failed to duplicate page {pn}: {error}")]
    DupPage { pn: PageNumber, error: KernelError },

    #[error("Failed to allocate child exception stack: {0}")]
    ExceptionStack(KernelError),

    #[error("Failed to set child page fault upcall: {0}")]
    SetUpcall(KernelError),

    #[error("Failed to mark child runnable: {0}")]
    SetStatus(KernelError),

    /// Shared-memory fork has no defined semantics
    #[error("Shared-memory fork is not supported")]
    Unsupported,
}

impl ForkError {
    /// Returns the negative error code reported to the caller of fork
    pub fn code(&self) -> i32 {
        match self {
            ForkError::Handler(error)
            | ForkError::Exofork(error)
            | ForkError::DupPage { error, .. }
            | ForkError::ExceptionStack(error)
            | ForkError::SetUpcall(error)
            | ForkError::SetStatus(error) => error.code(),
            ForkError::Unsupported => KernelError::Invalid.code(),
        }
    }
}

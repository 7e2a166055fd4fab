//! Kernel error types

use thiserror::Error;

/// Errors returned by kernel requests
///
/// Every variant has a stable negative code so that callers following the
/// C-style "negative return means error" convention can report it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum KernelError {
    /// Environment does not exist or the caller may not touch it
    #[error("Bad environment")]
    BadEnv,

    /// Invalid address, permission, or argument
    #[error("Invalid parameter")]
    Invalid,

    /// Out of physical memory or page table space
    #[error("Out of memory")]
    NoMemory,

    /// Environment table is full
    #[error("Out of environments")]
    NoFreeEnv,
}

impl KernelError {
    /// Returns the negative error code for this error
    pub fn code(&self) -> i32 {
        match self {
            KernelError::BadEnv => -2,
            KernelError::Invalid => -3,
            KernelError::NoMemory => -4,
            KernelError::NoFreeEnv => -5,
        }
    }
}

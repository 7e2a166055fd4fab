//! User-mode memory access

use crate::UTrapframe;
use core_types::VirtAddr;
use thiserror::Error;

/// Outcome of a user access that the MMU rejected
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The fault was delivered to the environment's upcall
    #[error("Page fault: {0:?}")]
    Fault(UTrapframe),

    /// The kernel could not deliver the fault and destroyed the environment
    #[error("Environment destroyed by unhandled page fault")]
    Killed,
}

/// Loads and stores performed with user privilege in the current environment
///
/// These model ordinary memory instructions: they go through the current
/// page tables and fault exactly where the hardware would. Accesses may span
/// page boundaries.
pub trait UserMemory {
    /// Reads `buf.len()` bytes starting at `va`
    fn load(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError>;

    /// Writes `bytes` starting at `va`
    fn store(&mut self, va: VirtAddr, bytes: &[u8]) -> Result<(), AccessError>;
}

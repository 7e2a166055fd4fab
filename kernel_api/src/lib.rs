//! # Kernel API
//!
//! This crate defines the interface between user-space code and the kernel.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Page allocation and mapping (not fork)
//! - Blank environment creation (not process duplication)
//! - Fault upcall registration (not fault handling)
//!
//! Duplicating an address space, and deciding which pages may be shared, is
//! left entirely to user space on top of this surface.
//!
//! ## Design Goals
//!
//! 1. **Testability**: The entire API can be mocked and tested
//! 2. **Explicitness**: The page tables are read through an injected view,
//!    never through ambient global state
//! 3. **Type safety**: Addresses, page numbers, and ids are distinct types
//! 4. **Simplicity**: Minimal surface area

pub mod error;
pub mod kernel;
pub mod memory;
pub mod page_table;
pub mod trap;

pub use error::KernelError;
pub use kernel::{EnvStatus, Exofork, KernelApi, UpcallEntry};
pub use memory::{AccessError, UserMemory};
pub use page_table::PageTableView;
pub use trap::{FaultErrorCode, UTrapframe};

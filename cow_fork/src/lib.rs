//! # Copy-on-Write Fork
//!
//! User-space `fork` built on a small set of kernel primitives.
//!
//! ## Philosophy
//!
//! The kernel only knows how to create an empty environment, map pages and
//! deliver page faults. Everything that makes a duplicate look like a copy
//! lives here in user space:
//!
//! - [`fork`] walks the caller's page tables and shares every user page
//!   with the child, downgrading writable pages to copy-on-write
//! - [`pgfault`] runs when either side writes to such a page and gives the
//!   writer its own private copy
//! - [`duppage`] holds the per-page policy that decides which pages are
//!   shared verbatim and which become copy-on-write
//!
//! ## Design Goals
//!
//! - **Kernel as a trait**: all privileged work goes through
//!   [`kernel_api::KernelApi`], so the same code runs against any kernel
//! - **No globals**: the environment's identity and fault handler travel in
//!   an explicit [`EnvContext`]
//! - **Tagged fork point**: callers match on [`ForkOutcome`] rather than
//!   comparing an integer with zero
//! - **Inert on failure**: a child is made runnable only after every step
//!   of duplication succeeded

pub mod context;
pub mod duppage;
pub mod error;
pub mod fork;
pub mod pgfault;

pub use context::{EnvContext, PgFaultHandler, PGFAULT_UPCALL};
pub use duppage::{duppage, TransferMode};
pub use error::{FaultError, ForkError};
pub use fork::{fork, sfork, ForkOutcome};
pub use pgfault::pgfault;

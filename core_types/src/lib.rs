//! # Core Types
//!
//! This crate defines the fundamental types shared by the kernel boundary,
//! the simulated kernel, and the user-space fork library.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: addresses, page numbers, and environment
//!   identifiers are distinct types and cannot be confused.
//! - **One vocabulary**: the memory layout constants live here and nowhere
//!   else, so the kernel and user space always agree on them.
//!
//! ## Key Types
//!
//! - [`EnvId`]: Opaque identifier for an environment (address space)
//! - [`VirtAddr`]: A user virtual address
//! - [`PageNumber`]: A virtual page number
//! - [`PteFlags`]: Page table entry permission and software bits

pub mod ids;
pub mod memory;

pub use ids::EnvId;
pub use memory::{
    PageNumber, PteFlags, VirtAddr, NPTENTRIES, PFTEMP, PGSHIFT, PGSIZE, PTSIZE,
    USTACKTOP, UTEMP, UTOP, UXSTACKBASE, UXSTACKTOP,
};

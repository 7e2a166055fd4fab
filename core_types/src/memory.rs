//! # Memory Layout Types
//!
//! This module defines the virtual memory vocabulary shared by the kernel
//! boundary and user space.
//!
//! ## Layout
//!
//! The user half of the address space follows a fixed map:
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                      |   user exception stack       | PGSIZE
//!                      +------------------------------+ 0xeebff000
//!                      |   empty guard page           | PGSIZE
//!         USTACKTOP -> +------------------------------+ 0xeebfe000
//!                      |   normal user stack, data,   |
//!                      |   program text ...           |
//!                      +------------------------------+
//!  PFTEMP ->           |   fault scratch page         | 0x007ff000
//!  UTEMP ->            +------------------------------+ 0x00400000
//!                      |   unmapped                   |
//!                      +------------------------------+ 0
//! ```
//!
//! ## Key Types
//!
//! - [`VirtAddr`]: A 32-bit user virtual address
//! - [`PageNumber`]: Index of a 4 KiB virtual page
//! - [`PteFlags`]: Hardware and software bits of a page table entry

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log2 of the page size
pub const PGSHIFT: u32 = 12;

/// Bytes per page
pub const PGSIZE: usize = 1 << PGSHIFT;

/// Entries per page table
pub const NPTENTRIES: u32 = 1024;

/// Bytes mapped by one page directory entry
pub const PTSIZE: u32 = PGSIZE as u32 * NPTENTRIES;

const PDXSHIFT: u32 = 22;

/// Top of user-accessible virtual memory
pub const UTOP: VirtAddr = VirtAddr(0xeec0_0000);

/// Top of the one-page user exception stack
pub const UXSTACKTOP: VirtAddr = UTOP;

/// Lowest address of the exception stack page
pub const UXSTACKBASE: VirtAddr = VirtAddr(UXSTACKTOP.0 - PGSIZE as u32);

/// Top of the normal user stack; everything below it is duplicated by fork
pub const USTACKTOP: VirtAddr = VirtAddr(UTOP.0 - 2 * PGSIZE as u32);

/// Scratch region used for temporary page mappings
pub const UTEMP: VirtAddr = VirtAddr(PTSIZE);

/// Page the fault handler uses to assemble a private copy
pub const PFTEMP: VirtAddr = VirtAddr(UTEMP.0 + PTSIZE - PGSIZE as u32);

/// A user virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// Creates a virtual address
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw address
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the page containing this address
    pub const fn page_number(&self) -> PageNumber {
        PageNumber(self.0 >> PGSHIFT)
    }

    /// Index of this address in the page directory
    pub const fn pdx(&self) -> u32 {
        self.0 >> PDXSHIFT
    }

    /// Byte offset within the containing page
    pub const fn page_offset(&self) -> usize {
        (self.0 as usize) & (PGSIZE - 1)
    }

    /// Rounds down to the start of the containing page
    pub const fn round_down(&self) -> Self {
        Self(self.0 & !(PGSIZE as u32 - 1))
    }

    /// True if the address sits on a page boundary
    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// Adds a byte offset, returning `None` on overflow
    pub fn checked_add(&self, offset: usize) -> Option<Self> {
        let offset = u32::try_from(offset).ok()?;
        self.0.checked_add(offset).map(Self)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual page number (address divided by [`PGSIZE`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNumber(u32);

impl PageNumber {
    /// Creates a page number
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw page number
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the address of the first byte of this page
    pub const fn addr(&self) -> VirtAddr {
        VirtAddr(self.0 << PGSHIFT)
    }

    /// Index of the page directory entry covering this page
    pub const fn pdx(&self) -> u32 {
        self.0 / NPTENTRIES
    }

    /// Returns the next page number
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pn:{:#07x}", self.0)
    }
}

bitflags! {
    /// Page table entry bits
    ///
    /// The low bits are interpreted by the MMU. `AVAIL` is reserved for
    /// software; user space claims two of those bits for [`PteFlags::SHARE`]
    /// and [`PteFlags::COW`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PteFlags: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        const HUGE = 0x080;
        const GLOBAL = 0x100;
        /// Always map this page verbatim into duplicates
        const SHARE = 0x400;
        /// Shared read-only until the first write, then privately copied
        const COW = 0x800;
        /// Bits left for software use
        const AVAIL = 0xe00;
    }
}

impl PteFlags {
    /// The only bits a syscall may set on a user mapping
    pub const SYSCALL: PteFlags = PteFlags::AVAIL
        .union(PteFlags::PRESENT)
        .union(PteFlags::WRITABLE)
        .union(PteFlags::USER);

    /// Bits every user mapping must carry
    pub const USER_PRESENT: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);

    /// Restricts the entry to the bits a syscall may pass through
    pub fn syscall_bits(&self) -> PteFlags {
        self.intersection(PteFlags::SYSCALL)
    }

    /// Returns the copy-on-write form: read-only with the COW bit set
    pub fn into_cow(self) -> PteFlags {
        self.difference(PteFlags::WRITABLE).union(PteFlags::COW)
    }

    pub fn is_present(&self) -> bool {
        self.contains(PteFlags::PRESENT)
    }

    pub fn is_user(&self) -> bool {
        self.contains(PteFlags::USER)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(PteFlags::WRITABLE)
    }

    pub fn is_cow(&self) -> bool {
        self.contains(PteFlags::COW)
    }

    pub fn is_shared(&self) -> bool {
        self.contains(PteFlags::SHARE)
    }
}

impl fmt::Display for PteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            if self.is_present() { "P" } else { "-" },
            if self.is_writable() { "W" } else { "-" },
            if self.is_user() { "U" } else { "-" },
            if self.is_shared() { "S" } else { "-" },
            if self.is_cow() { "C" } else { "-" }
        )
    }
}

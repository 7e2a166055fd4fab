//! Read-only view of the current address space's page tables

use core_types::{PageNumber, PteFlags, VirtAddr};

/// Read-only access to the calling environment's own page tables
///
/// On hardware this is the self-mapped page directory and page tables at
/// fixed virtual addresses. Code that walks the address space takes this as
/// an explicit capability so tests can substitute synthetic entries.
///
/// Entries that do not exist read as [`PteFlags::empty()`].
pub trait PageTableView {
    /// Returns the page directory entry covering `va`
    fn pde(&self, va: VirtAddr) -> PteFlags;

    /// Returns the page table entry for page `pn`
    fn pte(&self, pn: PageNumber) -> PteFlags;

    /// True if both the directory entry and the page entry are present
    fn is_mapped(&self, pn: PageNumber) -> bool {
        self.pde(pn.addr()).is_present() && self.pte(pn).is_present()
    }
}

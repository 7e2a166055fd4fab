//! Copy-on-write fault resolution
//!
//! The handler fork installs in every environment. A write to a page that
//! fork left copy-on-write lands here; the handler builds a private copy at
//! [`PFTEMP`] and swaps it in at the faulting address. The other holder of
//! the original page keeps its read-only mapping and will fault on its own.

use crate::error::FaultError;
use core_types::{PteFlags, PFTEMP, PGSIZE};
use kernel_api::{KernelApi, PageTableView, UTrapframe, UserMemory};

/// Resolves a write fault on a copy-on-write page
///
/// Anything other than a write to a present COW page is a real access
/// violation (or a bug in the duplication step) and is rejected.
pub fn pgfault<K>(kernel: &mut K, utf: &UTrapframe) -> Result<(), FaultError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    let va = utf.fault_va;
    let pte = kernel.pte(va.page_number());
    if !(utf.is_write() && kernel.pde(va).is_present() && pte.is_present() && pte.is_cow()) {
        return Err(FaultError::NotCopyOnWrite {
            va,
            err: utf.err,
            pte,
        });
    }

    let me = kernel.getenvid();
    let page = va.round_down();
    let private = PteFlags::USER_PRESENT | PteFlags::WRITABLE;

    kernel
        .page_alloc(me, PFTEMP, private)
        .map_err(FaultError::Alloc)?;

    let mut contents = vec![0u8; PGSIZE];
    kernel
        .load(page, &mut contents)
        .map_err(FaultError::Copy)?;
    kernel
        .store(PFTEMP, &contents)
        .map_err(FaultError::Copy)?;

    kernel
        .page_unmap(me, page)
        .map_err(FaultError::UnmapShared)?;
    kernel
        .page_map(me, PFTEMP, me, page, private)
        .map_err(FaultError::MapPrivate)?;
    kernel
        .page_unmap(me, PFTEMP)
        .map_err(FaultError::UnmapScratch)?;

    log::debug!("{}: private copy of {} installed", me, page);
    Ok(())
}

//! Page transfer policy
//!
//! Decides how one page of the parent is carried into a child and
//! establishes both mappings.

use crate::context::EnvContext;
use core_types::{EnvId, PageNumber, PteFlags};
use kernel_api::{KernelApi, KernelError, PageTableView, UserMemory};
use std::fmt;

/// How a page is carried into a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Shared read-only with the COW bit in both environments
    CopyOnWrite,
    /// Mapped into the child with the parent's permissions unchanged
    Direct,
}

impl TransferMode {
    /// Chooses the mode for a page table entry
    ///
    /// Writable pages and pages that are already COW become COW, unless the
    /// page is flagged [`PteFlags::SHARE`] and not already COW.
    pub fn for_entry(pte: PteFlags) -> Self {
        if pte.is_cow() || (pte.is_writable() && !pte.is_shared()) {
            TransferMode::CopyOnWrite
        } else {
            TransferMode::Direct
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::CopyOnWrite => write!(f, "cow"),
            TransferMode::Direct => write!(f, "direct"),
        }
    }
}

/// Maps page `pn` of the calling environment into `child` at the same address
///
/// In COW mode the child is mapped first and then our own entry is
/// re-asserted with the same read-only COW permissions, even if it was
/// already COW: the child's mapping is a fresh grant and our side must be
/// downgraded along with it.
pub fn duppage<K>(
    ctx: &EnvContext<K>,
    kernel: &mut K,
    child: EnvId,
    pn: PageNumber,
) -> Result<TransferMode, KernelError>
where
    K: KernelApi + PageTableView + UserMemory,
{
    let me = ctx.env_id();
    let va = pn.addr();
    let pte = kernel.pte(pn);
    let mode = TransferMode::for_entry(pte);

    match mode {
        TransferMode::CopyOnWrite => {
            let perm = pte.syscall_bits().into_cow();
            kernel.page_map(me, va, child, va, perm)?;
            kernel.page_map(me, va, me, va, perm)?;
        }
        TransferMode::Direct => {
            kernel.page_map(me, va, child, va, pte.syscall_bits())?;
        }
    }

    log::trace!("{}: {} -> {} ({})", me, va, child, mode);
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::VirtAddr;
    use kernel_api::{AccessError, EnvStatus, Exofork, FaultErrorCode, UTrapframe, UpcallEntry};
    use std::collections::HashMap;

    /// Synthetic page tables that record every mapping request
    #[derive(Default)]
    struct RecordingKernel {
        ptes: HashMap<PageNumber, PteFlags>,
        maps: Vec<(EnvId, VirtAddr, EnvId, VirtAddr, PteFlags)>,
    }

    fn me() -> EnvId {
        EnvId::from_parts(1, 0)
    }

    fn child() -> EnvId {
        EnvId::from_parts(1, 1)
    }

    impl KernelApi for RecordingKernel {
        fn getenvid(&self) -> EnvId {
            me()
        }

        fn page_alloc(&mut self, _: EnvId, _: VirtAddr, _: PteFlags) -> Result<(), KernelError> {
            Err(KernelError::Invalid)
        }

        fn page_map(
            &mut self,
            src_env: EnvId,
            src_va: VirtAddr,
            dst_env: EnvId,
            dst_va: VirtAddr,
            perm: PteFlags,
        ) -> Result<(), KernelError> {
            self.maps.push((src_env, src_va, dst_env, dst_va, perm));
            if dst_env == me() {
                self.ptes.insert(dst_va.page_number(), perm);
            }
            Ok(())
        }

        fn page_unmap(&mut self, _: EnvId, _: VirtAddr) -> Result<(), KernelError> {
            Err(KernelError::Invalid)
        }

        fn exofork(&mut self) -> Result<Exofork, KernelError> {
            Err(KernelError::NoFreeEnv)
        }

        fn env_set_pgfault_upcall(&mut self, _: EnvId, _: UpcallEntry) -> Result<(), KernelError> {
            Err(KernelError::Invalid)
        }

        fn env_set_status(&mut self, _: EnvId, _: EnvStatus) -> Result<(), KernelError> {
            Err(KernelError::Invalid)
        }

        fn env_destroy(&mut self, _: EnvId) -> Result<(), KernelError> {
            Err(KernelError::Invalid)
        }
    }

    impl PageTableView for RecordingKernel {
        fn pde(&self, _: VirtAddr) -> PteFlags {
            PteFlags::USER_PRESENT
        }

        fn pte(&self, pn: PageNumber) -> PteFlags {
            self.ptes.get(&pn).copied().unwrap_or(PteFlags::empty())
        }
    }

    impl UserMemory for RecordingKernel {
        fn load(&mut self, va: VirtAddr, _: &mut [u8]) -> Result<(), AccessError> {
            Err(AccessError::Fault(UTrapframe::new(va, FaultErrorCode::USER)))
        }

        fn store(&mut self, va: VirtAddr, _: &[u8]) -> Result<(), AccessError> {
            Err(AccessError::Fault(UTrapframe::new(
                va,
                FaultErrorCode::USER | FaultErrorCode::WRITE,
            )))
        }
    }

    fn setup(flags: PteFlags) -> (RecordingKernel, EnvContext<RecordingKernel>, PageNumber) {
        let pn = PageNumber::new(0x800);
        let mut kernel = RecordingKernel::default();
        kernel.ptes.insert(pn, flags);
        let ctx = EnvContext::bind(&kernel);
        (kernel, ctx, pn)
    }

    #[test]
    fn test_mode_selection() {
        let up = PteFlags::USER_PRESENT;
        let w = PteFlags::WRITABLE;
        assert_eq!(TransferMode::for_entry(up | w), TransferMode::CopyOnWrite);
        assert_eq!(TransferMode::for_entry(up | PteFlags::COW), TransferMode::CopyOnWrite);
        assert_eq!(TransferMode::for_entry(up), TransferMode::Direct);
        assert_eq!(TransferMode::for_entry(up | w | PteFlags::SHARE), TransferMode::Direct);
        assert_eq!(TransferMode::for_entry(up | PteFlags::SHARE), TransferMode::Direct);
    }

    #[test]
    fn test_writable_page_becomes_cow_on_both_sides() {
        let flags = PteFlags::USER_PRESENT | PteFlags::WRITABLE | PteFlags::DIRTY;
        let (mut kernel, ctx, pn) = setup(flags);

        let mode = duppage(&ctx, &mut kernel, child(), pn).unwrap();
        assert_eq!(mode, TransferMode::CopyOnWrite);

        let cow = PteFlags::USER_PRESENT | PteFlags::COW;
        let va = pn.addr();
        assert_eq!(
            kernel.maps,
            vec![(me(), va, child(), va, cow), (me(), va, me(), va, cow)]
        );
        assert_eq!(kernel.pte(pn), cow);
    }

    #[test]
    fn test_already_cow_page_is_reasserted() {
        let cow = PteFlags::USER_PRESENT | PteFlags::COW;
        let (mut kernel, ctx, pn) = setup(cow);

        duppage(&ctx, &mut kernel, child(), pn).unwrap();
        assert_eq!(kernel.maps.len(), 2);
        assert_eq!(kernel.maps[1].2, me());
    }

    #[test]
    fn test_shared_page_keeps_permissions() {
        let shared = PteFlags::USER_PRESENT | PteFlags::WRITABLE | PteFlags::SHARE;
        let (mut kernel, ctx, pn) = setup(shared | PteFlags::ACCESSED);

        let mode = duppage(&ctx, &mut kernel, child(), pn).unwrap();
        assert_eq!(mode, TransferMode::Direct);
        let va = pn.addr();
        assert_eq!(kernel.maps, vec![(me(), va, child(), va, shared)]);
        // Our own entry is untouched
        assert!(kernel.pte(pn).is_writable());
    }

    #[test]
    fn test_direct_mapping_is_idempotent() {
        let ro = PteFlags::USER_PRESENT;
        let (mut kernel, ctx, pn) = setup(ro);

        duppage(&ctx, &mut kernel, child(), pn).unwrap();
        duppage(&ctx, &mut kernel, child(), pn).unwrap();
        assert_eq!(kernel.maps[0], kernel.maps[1]);
        assert_eq!(kernel.maps[0].4, ro);
    }
}

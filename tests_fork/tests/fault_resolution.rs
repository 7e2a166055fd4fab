//! Fault Resolution Integration Tests
//!
//! These tests validate how faults are classified and what happens when
//! resolution cannot complete:
//! - Only writes to present COW pages are resolved
//! - Every other fault destroys the faulting environment
//! - Kernel failures during resolution are fatal and leave the peer intact

use core_types::{EnvId, PteFlags, VirtAddr, PFTEMP, PGSIZE, UXSTACKBASE};
use cow_fork::{pgfault, FaultError};
use kernel_api::{AccessError, FaultErrorCode, KernelApi, KernelError, UTrapframe, UserMemory};
use sim_kernel::fault_injection::{FaultPlan, Syscall, SyscallFault};
use sim_kernel::memory_audit::MemoryEvent;
use sim_kernel::SimulatedKernel;
use tests_fork::{enter_child, fork_parent, image_bootstrap, DATA_PAGE, SHARED_PAGE, TEXT_PAGE};

#[test]
fn test_read_fault_on_non_cow_page_is_fatal() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    let utf = UTrapframe::new(TEXT_PAGE, FaultErrorCode::PRESENT | FaultErrorCode::USER);
    let result = child_ctx.deliver_fault(&mut kernel, &utf);

    assert!(matches!(result, Err(FaultError::NotCopyOnWrite { .. })));
    assert_eq!(kernel.env_status(child), None);
    assert!(kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::EnvDestroyed { env } if *env == child)));
}

#[test]
fn test_read_fault_on_cow_page_is_fatal() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    let utf = UTrapframe::new(DATA_PAGE, FaultErrorCode::PRESENT | FaultErrorCode::USER);
    assert!(matches!(
        child_ctx.deliver_fault(&mut kernel, &utf),
        Err(FaultError::NotCopyOnWrite { .. })
    ));
    assert_eq!(kernel.env_status(child), None);
}

#[test]
fn test_resolution_touches_only_faulting_page() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let second = DATA_PAGE.checked_add(2 * PGSIZE).unwrap();
    kernel
        .page_alloc(
            EnvId::CURRENT,
            second,
            PteFlags::USER_PRESENT | PteFlags::WRITABLE,
        )
        .unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    child_ctx
        .store(&mut kernel, second.checked_add(7).unwrap(), &[1])
        .unwrap();

    assert!(kernel.pte_of(child, second).unwrap().is_writable());
    assert!(kernel.pte_of(child, DATA_PAGE).unwrap().is_cow());
    assert!(kernel.pte_of(parent, second).unwrap().is_cow());
    assert!(kernel.pte_of(child, PFTEMP).is_none());
}

#[test]
fn test_allocation_failure_during_resolution() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    kernel.set_fault_plan(FaultPlan::new().with_syscall_fault(SyscallFault::FailAll {
        syscall: Syscall::PageAlloc,
        error: KernelError::NoMemory,
    }));
    let result = child_ctx.store(&mut kernel, DATA_PAGE, &[1]);

    assert_eq!(result, Err(FaultError::Alloc(KernelError::NoMemory)));
    assert_eq!(kernel.env_status(child), None);
    // The parent still holds the original, intact
    assert!(kernel.pte_of(parent, DATA_PAGE).unwrap().is_cow());
    assert!(kernel
        .page_contents(parent, DATA_PAGE)
        .unwrap()
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn test_unmap_shared_failure_during_resolution() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    kernel.set_fault_plan(FaultPlan::new().with_syscall_fault(SyscallFault::FailNth {
        syscall: Syscall::PageUnmap,
        nth: 1,
        error: KernelError::Invalid,
    }));
    let result = child_ctx.store(&mut kernel, DATA_PAGE, &[1]);

    assert_eq!(result, Err(FaultError::UnmapShared(KernelError::Invalid)));
    assert_eq!(kernel.env_status(child), None);
    assert!(kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::EnvDestroyed { env } if *env == child)));
    assert_eq!(kernel.getenvid(), parent);
    assert!(kernel.pte_of(parent, DATA_PAGE).unwrap().is_cow());
}

#[test]
fn test_unmap_failure_during_resolution() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    kernel.set_fault_plan(FaultPlan::new().with_syscall_fault(SyscallFault::FailNth {
        syscall: Syscall::PageUnmap,
        nth: 2,
        error: KernelError::Invalid,
    }));
    let result = child_ctx.store(&mut kernel, DATA_PAGE, &[1]);

    assert_eq!(result, Err(FaultError::UnmapScratch(KernelError::Invalid)));
    assert_eq!(kernel.env_status(child), None);
    assert!(kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::SyscallFailed { syscall: Syscall::PageUnmap, .. })));
}

#[test]
fn test_handler_without_exception_stack_kills() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();

    kernel
        .page_unmap(EnvId::CURRENT, core_types::UXSTACKBASE)
        .unwrap();
    assert_eq!(
        child_ctx.store(&mut kernel, DATA_PAGE, &[1]),
        Err(FaultError::Killed)
    );
    assert_eq!(kernel.env_status(child), None);
    assert!(kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::FaultUnhandled { env, .. } if *env == child)));
}

// Drops its own exception stack, then faults again inside the handler
fn fault_without_exception_stack(
    kernel: &mut SimulatedKernel,
    _utf: &UTrapframe,
) -> Result<(), FaultError> {
    kernel
        .page_unmap(EnvId::CURRENT, UXSTACKBASE)
        .map_err(FaultError::UnmapScratch)?;
    kernel
        .store(VirtAddr::new(0x00a0_0000), &[1])
        .map_err(FaultError::Copy)
}

#[test]
fn test_kill_inside_handler_spares_parent() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    child_ctx
        .set_pgfault_handler(&mut kernel, fault_without_exception_stack)
        .unwrap();

    let result = child_ctx.store(&mut kernel, DATA_PAGE, &[1]);

    assert_eq!(result, Err(FaultError::Copy(AccessError::Killed)));
    assert_eq!(kernel.env_status(child), None);
    // The kernel rescheduled the parent and nothing destroyed it afterwards
    assert_eq!(kernel.getenvid(), parent);
    assert!(kernel.env_status(parent).is_some());
    assert_eq!(kernel.env_count(), 1);
    assert_eq!(
        kernel
            .audit_log()
            .count_events(|e| matches!(e, MemoryEvent::EnvDestroyed { .. })),
        1
    );
}

#[test]
fn test_handler_invoked_directly() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    fork_parent(&mut ctx, &mut kernel).unwrap();

    let utf = UTrapframe::new(
        DATA_PAGE.checked_add(0x10).unwrap(),
        FaultErrorCode::PRESENT | FaultErrorCode::WRITE | FaultErrorCode::USER,
    );
    pgfault(&mut kernel, &utf).unwrap();
    let flags = kernel.pte_of(parent, DATA_PAGE).unwrap();
    assert!(flags.is_writable() && !flags.is_cow());

    // A write to a shared page never reaches the handler legitimately
    let utf = UTrapframe::new(SHARED_PAGE, utf.err);
    assert!(matches!(
        pgfault(&mut kernel, &utf),
        Err(FaultError::NotCopyOnWrite { .. })
    ));
}

//! Copy-on-Write Isolation Integration Tests
//!
//! These tests validate what parent and child observe after fork:
//! - No page is writable in both spaces at once
//! - A write lands in a private copy and leaves the other side untouched
//! - Pages flagged SHARE stay one page for both sides
//! - Read-only pages are mapped through without any fault

use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE};
use cow_fork::FaultError;
use kernel_api::KernelApi;
use sim_kernel::memory_audit::MemoryEvent;
use sim_kernel::test_utils::{map_patterned_page, pattern};
use tests_fork::{
    enter_child, fork_parent, image_bootstrap, read_page, test_bootstrap, DATA_PAGE, SHARED_PAGE,
    TEXT_PAGE,
};

#[test]
fn test_no_page_writable_on_both_sides() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let parent_data = kernel.pte_of(parent, DATA_PAGE).unwrap();
    let child_data = kernel.pte_of(child, DATA_PAGE).unwrap();
    for flags in [parent_data, child_data] {
        assert!(!flags.is_writable());
        assert!(flags.is_cow());
    }
    assert_eq!(kernel.frame_of(parent, DATA_PAGE), kernel.frame_of(child, DATA_PAGE));
}

#[test]
fn test_parent_and_child_diverge_on_write() {
    // Writable zero page at A, shared page at B
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    child_ctx
        .store(&mut kernel, DATA_PAGE, &[0xff; PGSIZE])
        .unwrap();
    assert!(read_page(&mut child_ctx, &mut kernel, DATA_PAGE)
        .unwrap()
        .iter()
        .all(|&b| b == 0xff));

    kernel.switch_to(parent).unwrap();
    assert!(read_page(&mut ctx, &mut kernel, DATA_PAGE)
        .unwrap()
        .iter()
        .all(|&b| b == 0));

    kernel.clear_audit_log();
    ctx.store(&mut kernel, SHARED_PAGE, &[0x42]).unwrap();
    assert!(!kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::FaultDelivered { .. })));

    kernel.switch_to(child).unwrap();
    let mut byte = [0u8; 1];
    child_ctx.load(&mut kernel, SHARED_PAGE, &mut byte).unwrap();
    assert_eq!(byte, [0x42]);
}

#[test]
fn test_single_byte_write_preserves_rest_of_page() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let page = VirtAddr::new(0x00a0_0000);
    map_patterned_page(
        &mut kernel,
        page,
        PteFlags::USER_PRESENT | PteFlags::WRITABLE,
    )
    .unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let offset = 1234;
    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    child_ctx
        .store(&mut kernel, page.checked_add(offset).unwrap(), &[0xee])
        .unwrap();

    let original = pattern();
    let copy = kernel.page_contents(child, page).unwrap();
    for (i, (&got, &want)) in copy.iter().zip(original.iter()).enumerate() {
        if i == offset {
            assert_eq!(got, 0xee);
        } else {
            assert_eq!(got, want, "byte {i} changed");
        }
    }
    assert_eq!(kernel.page_contents(parent, page).unwrap(), &original[..]);
}

#[test]
fn test_both_sides_fault_into_distinct_copies() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();
    let shared_frame = kernel.frame_of(parent, DATA_PAGE).unwrap();

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    child_ctx.store(&mut kernel, DATA_PAGE, &[0xaa]).unwrap();

    kernel.switch_to(parent).unwrap();
    ctx.store(&mut kernel, DATA_PAGE, &[0xbb]).unwrap();

    let parent_frame = kernel.frame_of(parent, DATA_PAGE).unwrap();
    let child_frame = kernel.frame_of(child, DATA_PAGE).unwrap();
    assert_ne!(parent_frame, child_frame);
    assert_ne!(child_frame, shared_frame);
    // The parent was the last holder of the original and also copied
    assert_ne!(parent_frame, shared_frame);
    assert_eq!(kernel.frame_refs(shared_frame), 0);

    let mut byte = [0u8; 1];
    ctx.load(&mut kernel, DATA_PAGE, &mut byte).unwrap();
    assert_eq!(byte, [0xbb]);

    kernel.switch_to(child).unwrap();
    child_ctx.load(&mut kernel, DATA_PAGE, &mut byte).unwrap();
    assert_eq!(byte, [0xaa]);

    // One fault per side
    assert_eq!(
        kernel
            .audit_log()
            .count_events(|e| matches!(e, MemoryEvent::FaultDelivered { utf, .. } if utf.fault_va == DATA_PAGE)),
        2
    );
}

#[test]
fn test_shared_page_visible_both_ways() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let flags = kernel.pte_of(child, SHARED_PAGE).unwrap();
    assert!(flags.is_writable() && flags.is_shared() && !flags.is_cow());
    assert!(kernel.pte_of(parent, SHARED_PAGE).unwrap().is_writable());

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    kernel.clear_audit_log();
    child_ctx.store(&mut kernel, SHARED_PAGE, b"hello").unwrap();

    kernel.switch_to(parent).unwrap();
    let mut buf = [0u8; 5];
    ctx.load(&mut kernel, SHARED_PAGE, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    assert_eq!(
        kernel
            .audit_log()
            .count_events(|e| matches!(e, MemoryEvent::FaultDelivered { .. })),
        0
    );
}

#[test]
fn test_read_only_page_needs_no_fault() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let flags = kernel.pte_of(child, TEXT_PAGE).unwrap();
    assert!(!flags.is_writable() && !flags.is_cow());

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    kernel.clear_audit_log();
    let text = read_page(&mut child_ctx, &mut kernel, TEXT_PAGE).unwrap();
    assert!(text.iter().all(|&b| b == 0xc3));
    assert!(!kernel
        .audit_log()
        .has_event(|e| matches!(e, MemoryEvent::FaultDelivered { .. })));
}

#[test]
fn test_write_to_read_only_page_is_fatal() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let parent = kernel.getenvid();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let mut child_ctx = enter_child(&mut kernel, &ctx, child).unwrap();
    let result = child_ctx.store(&mut kernel, TEXT_PAGE, &[0]);

    assert!(matches!(result, Err(FaultError::NotCopyOnWrite { va, .. }) if va == TEXT_PAGE));
    assert_eq!(kernel.env_status(child), None);
    // The parent's text is intact and it is scheduled again
    assert_eq!(kernel.getenvid(), parent);
    assert!(kernel
        .page_contents(parent, TEXT_PAGE)
        .unwrap()
        .iter()
        .all(|&b| b == 0xc3));
}

#[test]
fn test_unmapped_and_stack_regions() {
    let (mut kernel, mut ctx) = image_bootstrap().unwrap();
    let child = fork_parent(&mut ctx, &mut kernel).unwrap();

    let child_pages: Vec<VirtAddr> = kernel
        .mappings(child)
        .into_iter()
        .map(|(va, _)| va)
        .collect();
    assert_eq!(
        child_pages,
        vec![
            TEXT_PAGE,
            DATA_PAGE,
            SHARED_PAGE,
            core_types::UXSTACKBASE
        ]
    );
    assert_eq!(kernel.parent_of(child), Some(ctx.env_id()));
    assert_ne!(child, EnvId::CURRENT);
}

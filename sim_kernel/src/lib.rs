//! # Simulated Kernel
//!
//! This crate provides a simulated implementation of the kernel API.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing user-space fork without hardware:
//! - Runs under `cargo test`
//! - Deterministic (explicit scheduling, no real concurrency)
//! - Byte-accurate (physical frames hold real data)
//! - Inspectable (page tables, frames, and statuses are all accessible)
//!
//! ## Model
//!
//! Every environment owns a page table mapping virtual pages to reference
//! counted physical frames. Exactly one environment is current; syscalls,
//! [`PageTableView`] reads, and [`UserMemory`] accesses all act on it.
//! Tests switch environments explicitly with [`SimulatedKernel::switch_to`].
//!
//! A fresh exofork child carries a pending return: the first
//! [`KernelApi::exofork`] it executes after being switched to yields
//! [`Exofork::Child`] instead of creating another environment. This is how
//! the simulation models the child resuming from the parent's fork point.

pub mod config;
pub mod fault_injection;
pub mod frames;
pub mod memory_audit;
pub mod test_utils;

mod env;

use config::{ConfigError, SimConfig};
use core_types::{EnvId, PageNumber, PteFlags, VirtAddr, PGSIZE, UTOP, UXSTACKBASE};
use env::{Env, Pte};
use fault_injection::{FaultInjector, FaultPlan, Syscall};
use frames::{FrameId, FrameTable};
use kernel_api::{
    AccessError, EnvStatus, Exofork, FaultErrorCode, KernelApi, KernelError, PageTableView,
    UTrapframe, UpcallEntry, UserMemory,
};
use memory_audit::{MemoryAuditLog, MemoryEvent};
use std::collections::BTreeMap;

/// Simulated kernel state
///
/// This maintains all the state needed to simulate a kernel.
/// Unlike a real kernel, this state is directly accessible for testing.
pub struct SimulatedKernel {
    /// Physical memory
    frames: FrameTable,
    /// Live environments
    envs: BTreeMap<EnvId, Env>,
    /// Environment table slots: which id occupies each slot
    slots: Vec<Option<EnvId>>,
    /// Generation counter per slot
    generations: Vec<u32>,
    /// The environment whose code is executing
    current: EnvId,
    /// Fault injector (optional, for testing)
    fault_injector: Option<FaultInjector>,
    /// Audit log (test-only)
    audit_log: MemoryAuditLog,
}

impl SimulatedKernel {
    /// Creates a kernel with default limits and one running environment
    pub fn new() -> Self {
        Self::build(SimConfig::default())
    }

    /// Creates a kernel with the given limits and one running environment
    pub fn with_config(config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        let slots = config.max_envs.max(1) as usize;
        let mut kernel = Self {
            frames: FrameTable::new(config.max_frames),
            envs: BTreeMap::new(),
            slots: vec![None; slots],
            generations: vec![0; slots],
            current: EnvId::CURRENT,
            fault_injector: None,
            audit_log: MemoryAuditLog::new(),
        };

        // Boot environment: slot 0, first generation
        let id = kernel.claim_slot(0);
        kernel.envs.insert(id, Env::new(id, None, EnvStatus::Running));
        kernel.audit_log.record(MemoryEvent::EnvCreated {
            env: id,
            parent: None,
        });
        kernel.current = id;
        kernel
    }

    /// Sets the fault injector for this kernel
    ///
    /// This enables fault injection for testing. The injector is consulted
    /// on every kernel request.
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.fault_injector = Some(FaultInjector::new(plan));
        self
    }

    /// Installs a fault plan mid-test; call counts start from zero
    pub fn set_fault_plan(&mut self, plan: FaultPlan) {
        self.fault_injector = Some(FaultInjector::new(plan));
    }

    /// Removes any installed fault plan
    pub fn clear_fault_plan(&mut self) {
        self.fault_injector = None;
    }

    /// Returns the installed fault injector, if any
    pub fn fault_injector(&self) -> Option<&FaultInjector> {
        self.fault_injector.as_ref()
    }

    /// Switches execution to another environment
    ///
    /// The target must be runnable (or already current). The previously
    /// running environment becomes runnable.
    pub fn switch_to(&mut self, env: EnvId) -> Result<(), KernelError> {
        if env == self.current {
            return Ok(());
        }

        let status = self
            .envs
            .get(&env)
            .map(|e| e.status)
            .ok_or(KernelError::BadEnv)?;
        if status != EnvStatus::Runnable {
            return Err(KernelError::Invalid);
        }

        let from = self.current;
        if let Some(previous) = self.envs.get_mut(&from) {
            if previous.status == EnvStatus::Running {
                previous.status = EnvStatus::Runnable;
            }
        }
        if let Some(next) = self.envs.get_mut(&env) {
            next.status = EnvStatus::Running;
        }
        self.current = env;

        log::debug!("switch {} -> {}", from, env);
        self.audit_log.record(MemoryEvent::EnvSwitched { from, to: env });
        Ok(())
    }

    /// Writes bytes into an environment's memory from the kernel side
    ///
    /// Bypasses permissions, like a loader populating a program image.
    /// Fails with `Invalid` if any touched page is unmapped.
    pub fn poke(&mut self, env: EnvId, va: VirtAddr, bytes: &[u8]) -> Result<(), KernelError> {
        let id = self.resolve(env, false)?;
        let mut done = 0;
        while done < bytes.len() {
            let addr = va.checked_add(done).ok_or(KernelError::Invalid)?;
            let frame = self.frame_of(id, addr).ok_or(KernelError::Invalid)?;
            let offset = addr.page_offset();
            let chunk = (PGSIZE - offset).min(bytes.len() - done);
            let data = self.frames.data_mut(frame).ok_or(KernelError::Invalid)?;
            data[offset..offset + chunk].copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Returns the contents of the page mapped at `va` in `env`
    pub fn page_contents(&self, env: EnvId, va: VirtAddr) -> Option<&[u8]> {
        let frame = self.frame_of(env, va)?;
        self.frames.data(frame).map(|data| &data[..])
    }

    /// Returns the physical frame mapped at `va` in `env`
    pub fn frame_of(&self, env: EnvId, va: VirtAddr) -> Option<FrameId> {
        let env = self.envs.get(&self.alias(env))?;
        env.page_table.get(va.page_number()).map(|pte| pte.frame)
    }

    /// Returns the page table entry bits for `va` in `env`
    pub fn pte_of(&self, env: EnvId, va: VirtAddr) -> Option<PteFlags> {
        let env = self.envs.get(&self.alias(env))?;
        env.page_table.get(va.page_number()).map(|pte| pte.flags)
    }

    /// Lists every mapping in `env` in ascending address order
    pub fn mappings(&self, env: EnvId) -> Vec<(VirtAddr, PteFlags)> {
        self.envs
            .get(&self.alias(env))
            .map(|env| {
                env.page_table
                    .iter()
                    .map(|(pn, pte)| (pn.addr(), pte.flags))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of page table entries referring to `frame`
    pub fn frame_refs(&self, frame: FrameId) -> u32 {
        self.frames.refs(frame)
    }

    /// Returns the number of allocated physical frames
    pub fn frames_in_use(&self) -> usize {
        self.frames.in_use()
    }

    /// Returns the run state of `env`, or `None` if it does not exist
    pub fn env_status(&self, env: EnvId) -> Option<EnvStatus> {
        self.envs.get(&self.alias(env)).map(|e| e.status)
    }

    /// Returns the registered fault upcall of `env`
    pub fn upcall_of(&self, env: EnvId) -> Option<UpcallEntry> {
        self.envs
            .get(&self.alias(env))
            .and_then(|e| e.pgfault_upcall)
    }

    /// Returns the parent of `env`
    pub fn parent_of(&self, env: EnvId) -> Option<EnvId> {
        self.envs.get(&self.alias(env)).and_then(|e| e.parent)
    }

    /// Returns the number of live environments
    pub fn env_count(&self) -> usize {
        self.envs.len()
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &MemoryAuditLog {
        &self.audit_log
    }

    /// Clears the audit log (test-only)
    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }

    fn alias(&self, env: EnvId) -> EnvId {
        if env.is_current() {
            self.current
        } else {
            env
        }
    }

    /// Looks up an environment named in a request
    ///
    /// With `checkperm`, the caller may only name itself or its children.
    fn resolve(&self, env: EnvId, checkperm: bool) -> Result<EnvId, KernelError> {
        let id = self.alias(env);
        let target = self.envs.get(&id).ok_or(KernelError::BadEnv)?;
        if checkperm && id != self.current && target.parent != Some(self.current) {
            return Err(KernelError::BadEnv);
        }
        Ok(id)
    }

    fn claim_slot(&mut self, index: usize) -> EnvId {
        self.generations[index] = self.generations[index].wrapping_add(1);
        let id = EnvId::from_parts(self.generations[index], index as u32);
        self.slots[index] = Some(id);
        id
    }

    /// Runs a request through fault injection and failure auditing
    fn syscall<T>(
        &mut self,
        syscall: Syscall,
        op: impl FnOnce(&mut Self) -> Result<T, KernelError>,
    ) -> Result<T, KernelError> {
        let injected = match self.fault_injector.as_mut() {
            Some(injector) => injector.check(syscall),
            None => Ok(()),
        };
        let result = match injected {
            Ok(()) => op(self),
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            log::debug!("{} from {} failed: {}", syscall, self.current, error);
            self.audit_log.record(MemoryEvent::SyscallFailed {
                env: self.current,
                syscall,
                code: error.code(),
            });
        }
        result
    }

    fn install(
        &mut self,
        env: EnvId,
        va: VirtAddr,
        frame: FrameId,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        let target = self.envs.get_mut(&env).ok_or(KernelError::BadEnv)?;
        let old = target
            .page_table
            .insert(va.page_number(), Pte { frame, flags: perm });
        // Take the new reference first so remapping a frame onto itself keeps it alive
        self.frames.incref(frame);
        if let Some(old) = old {
            self.release(old.frame);
        }
        Ok(())
    }

    fn release(&mut self, frame: FrameId) {
        if self.frames.decref(frame) {
            self.audit_log.record(MemoryEvent::FrameReleased { frame });
        }
    }

    fn destroy(&mut self, id: EnvId) {
        let Some(mut env) = self.envs.remove(&id) else {
            return;
        };
        for pte in env.page_table.drain() {
            self.release(pte.frame);
        }
        let index = id.index() as usize;
        if self.slots.get(index) == Some(&Some(id)) {
            self.slots[index] = None;
        }

        log::info!("{} destroyed", id);
        self.audit_log.record(MemoryEvent::EnvDestroyed { env: id });

        if id == self.current {
            self.reschedule(env.parent);
        }
    }

    /// Picks the next environment after the current one exits
    fn reschedule(&mut self, preferred: Option<EnvId>) {
        let next = preferred
            .filter(|id| {
                self.envs
                    .get(id)
                    .is_some_and(|env| env.status == EnvStatus::Runnable)
            })
            .or_else(|| {
                self.envs
                    .values()
                    .find(|env| env.status == EnvStatus::Runnable)
                    .map(|env| env.id)
            });

        if let Some(next) = next {
            if let Some(env) = self.envs.get_mut(&next) {
                env.status = EnvStatus::Running;
            }
            self.audit_log.record(MemoryEvent::EnvSwitched {
                from: self.current,
                to: next,
            });
            self.current = next;
        }
    }

    /// Translates a user access, raising a fault on violation
    fn translate(&mut self, addr: VirtAddr, write: bool) -> Result<FrameId, AccessError> {
        let current = self.current;
        let env = self.envs.get_mut(&current).ok_or(AccessError::Killed)?;

        let mut err = FaultErrorCode::USER;
        if write {
            err |= FaultErrorCode::WRITE;
        }

        match env.page_table.get_mut(addr.page_number()) {
            Some(pte) if pte.flags.contains(PteFlags::USER_PRESENT) => {
                if !write || pte.flags.is_writable() {
                    pte.flags |= PteFlags::ACCESSED;
                    if write {
                        pte.flags |= PteFlags::DIRTY;
                    }
                    return Ok(pte.frame);
                }
                err |= FaultErrorCode::PRESENT;
            }
            Some(_) => err |= FaultErrorCode::PRESENT,
            None => {}
        }

        Err(self.raise_fault(UTrapframe::new(addr, err)))
    }

    /// Delivers a fault to the current environment's upcall, or kills it
    fn raise_fault(&mut self, utf: UTrapframe) -> AccessError {
        let env = self.current;
        let exception_stack = UXSTACKBASE.page_number();
        let deliverable = self.envs.get(&env).is_some_and(|e| {
            e.pgfault_upcall.is_some()
                && e.page_table.get(exception_stack).is_some_and(|pte| {
                    pte.flags
                        .contains(PteFlags::USER_PRESENT | PteFlags::WRITABLE)
                })
        });

        if deliverable {
            log::debug!("{} fault at {} ({:?})", env, utf.fault_va, utf.err);
            self.audit_log
                .record(MemoryEvent::FaultDelivered { env, utf });
            AccessError::Fault(utf)
        } else {
            log::warn!(
                "{} unhandled fault at {} ({:?}), destroying",
                env,
                utf.fault_va,
                utf.err
            );
            self.audit_log
                .record(MemoryEvent::FaultUnhandled { env, utf });
            self.destroy(env);
            AccessError::Killed
        }
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn check_user_va(va: VirtAddr) -> Result<(), KernelError> {
    if va >= UTOP || !va.is_page_aligned() {
        return Err(KernelError::Invalid);
    }
    Ok(())
}

fn check_perm(perm: PteFlags) -> Result<(), KernelError> {
    if !perm.contains(PteFlags::USER_PRESENT) || !PteFlags::SYSCALL.contains(perm) {
        return Err(KernelError::Invalid);
    }
    Ok(())
}

impl KernelApi for SimulatedKernel {
    fn getenvid(&self) -> EnvId {
        self.current
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<(), KernelError> {
        self.syscall(Syscall::PageAlloc, |k| {
            let id = k.resolve(env, true)?;
            check_user_va(va)?;
            check_perm(perm)?;

            let frame = k.frames.alloc()?;
            k.install(id, va, frame, perm)?;
            k.audit_log.record(MemoryEvent::PageAllocated {
                env: id,
                va,
                frame,
                perm,
            });
            Ok(())
        })
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        self.syscall(Syscall::PageMap, |k| {
            let src = k.resolve(src_env, true)?;
            let dst = k.resolve(dst_env, true)?;
            check_user_va(src_va)?;
            check_user_va(dst_va)?;
            check_perm(perm)?;

            let source = k
                .envs
                .get(&src)
                .and_then(|e| e.page_table.get(src_va.page_number()))
                .copied()
                .ok_or(KernelError::Invalid)?;
            if perm.is_writable() && !source.flags.is_writable() {
                return Err(KernelError::Invalid);
            }

            k.install(dst, dst_va, source.frame, perm)?;
            k.audit_log.record(MemoryEvent::PageMapped {
                src_env: src,
                src_va,
                dst_env: dst,
                dst_va,
                frame: source.frame,
                perm,
            });
            Ok(())
        })
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), KernelError> {
        self.syscall(Syscall::PageUnmap, |k| {
            let id = k.resolve(env, true)?;
            check_user_va(va)?;

            let removed = k
                .envs
                .get_mut(&id)
                .and_then(|e| e.page_table.remove(va.page_number()));
            if let Some(pte) = removed {
                k.audit_log.record(MemoryEvent::PageUnmapped {
                    env: id,
                    va,
                    frame: pte.frame,
                });
                k.release(pte.frame);
            }
            Ok(())
        })
    }

    fn exofork(&mut self) -> Result<Exofork, KernelError> {
        self.syscall(Syscall::Exofork, |k| {
            let parent = k.resolve(EnvId::CURRENT, false)?;

            if let Some(env) = k.envs.get_mut(&parent) {
                if env.exofork_pending {
                    env.exofork_pending = false;
                    return Ok(Exofork::Child);
                }
            }

            let index = k
                .slots
                .iter()
                .position(Option::is_none)
                .ok_or(KernelError::NoFreeEnv)?;
            let id = k.claim_slot(index);

            let mut child = Env::new(id, Some(parent), EnvStatus::NotRunnable);
            child.exofork_pending = true;
            k.envs.insert(id, child);

            log::info!("{} created by {}", id, parent);
            k.audit_log.record(MemoryEvent::EnvCreated {
                env: id,
                parent: Some(parent),
            });
            Ok(Exofork::Parent(id))
        })
    }

    fn env_set_pgfault_upcall(
        &mut self,
        env: EnvId,
        entry: UpcallEntry,
    ) -> Result<(), KernelError> {
        self.syscall(Syscall::EnvSetPgfaultUpcall, |k| {
            let id = k.resolve(env, true)?;
            if let Some(target) = k.envs.get_mut(&id) {
                target.pgfault_upcall = Some(entry);
            }
            k.audit_log
                .record(MemoryEvent::UpcallRegistered { env: id, entry });
            Ok(())
        })
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), KernelError> {
        self.syscall(Syscall::EnvSetStatus, |k| {
            if status == EnvStatus::Running {
                return Err(KernelError::Invalid);
            }
            let id = k.resolve(env, true)?;
            if let Some(target) = k.envs.get_mut(&id) {
                target.status = status;
            }
            k.audit_log
                .record(MemoryEvent::EnvStatusChanged { env: id, status });
            Ok(())
        })
    }

    fn env_destroy(&mut self, env: EnvId) -> Result<(), KernelError> {
        self.syscall(Syscall::EnvDestroy, |k| {
            let id = k.resolve(env, true)?;
            k.destroy(id);
            Ok(())
        })
    }
}

impl PageTableView for SimulatedKernel {
    fn pde(&self, va: VirtAddr) -> PteFlags {
        match self.envs.get(&self.current) {
            Some(env) if env.page_table.directory_present(va.pdx()) => {
                PteFlags::USER_PRESENT | PteFlags::WRITABLE
            }
            _ => PteFlags::empty(),
        }
    }

    fn pte(&self, pn: PageNumber) -> PteFlags {
        self.envs
            .get(&self.current)
            .and_then(|env| env.page_table.get(pn))
            .map_or(PteFlags::empty(), |pte| pte.flags)
    }
}

impl UserMemory for SimulatedKernel {
    fn load(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va.checked_add(done).unwrap_or(VirtAddr::new(u32::MAX));
            let frame = self.translate(addr, false)?;
            let offset = addr.page_offset();
            let chunk = (PGSIZE - offset).min(buf.len() - done);
            let data = self.frames.data(frame).ok_or(AccessError::Killed)?;
            buf[done..done + chunk].copy_from_slice(&data[offset..offset + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn store(&mut self, va: VirtAddr, bytes: &[u8]) -> Result<(), AccessError> {
        let mut done = 0;
        while done < bytes.len() {
            let addr = va.checked_add(done).unwrap_or(VirtAddr::new(u32::MAX));
            let frame = self.translate(addr, true)?;
            let offset = addr.page_offset();
            let chunk = (PGSIZE - offset).min(bytes.len() - done);
            let data = self.frames.data_mut(frame).ok_or(AccessError::Killed)?;
            data[offset..offset + chunk].copy_from_slice(&bytes[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }
}

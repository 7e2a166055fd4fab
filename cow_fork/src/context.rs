//! Per-environment runtime context
//!
//! [`EnvContext`] is the process-local state a user environment carries
//! around: which environment it is, and which page fault handler runs when
//! the kernel delivers a fault. It is passed explicitly to fork and to
//! memory accesses instead of living in a global.
//!
//! ## Fault delivery contract
//!
//! When a user access faults and the kernel delivers it, the context invokes
//! the installed handler exactly once and then re-executes the faulting
//! access. Handlers receive only the kernel and the trap frame, never the
//! context, so a second fault cannot be dispatched while one is being
//! handled. If the handler fails, the fault is fatal: the context destroys
//! its own environment.

use crate::error::FaultError;
use core_types::{EnvId, PteFlags, VirtAddr, UXSTACKBASE};
use kernel_api::{AccessError, KernelApi, KernelError, UTrapframe, UpcallEntry, UserMemory};
use std::fmt;

/// A user-level page fault handler
pub type PgFaultHandler<K> = fn(&mut K, &UTrapframe) -> Result<(), FaultError>;

/// Address of the assembly trampoline the kernel enters on a page fault
///
/// The trampoline switches to the exception stack and calls the handler
/// installed in the faulting environment's [`EnvContext`].
pub const PGFAULT_UPCALL: UpcallEntry = UpcallEntry(VirtAddr::new(0x0080_0020));

/// Process-local runtime state of one environment
pub struct EnvContext<K> {
    env_id: EnvId,
    handler: Option<PgFaultHandler<K>>,
    exception_stack_ready: bool,
}

// A derive would demand `K: Clone`; only function pointers are stored.
impl<K> Clone for EnvContext<K> {
    fn clone(&self) -> Self {
        Self {
            env_id: self.env_id,
            handler: self.handler,
            exception_stack_ready: self.exception_stack_ready,
        }
    }
}

impl<K> fmt::Debug for EnvContext<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvContext")
            .field("env_id", &self.env_id)
            .field("has_handler", &self.handler.is_some())
            .field("exception_stack_ready", &self.exception_stack_ready)
            .finish()
    }
}

impl<K> EnvContext<K>
where
    K: KernelApi + UserMemory,
{
    /// Binds a context to the calling environment
    ///
    /// Called once when the environment starts.
    pub fn bind(kernel: &K) -> Self {
        Self {
            env_id: kernel.getenvid(),
            handler: None,
            exception_stack_ready: false,
        }
    }

    /// Returns the environment this context belongs to
    pub fn env_id(&self) -> EnvId {
        self.env_id
    }

    /// Returns the installed page fault handler
    pub fn handler(&self) -> Option<PgFaultHandler<K>> {
        self.handler
    }

    /// Re-reads the environment id from the kernel
    ///
    /// A child starts with a by-value copy of its parent's context, which
    /// still names the parent. The child calls this once, right after fork
    /// returns in it.
    pub fn rebind(&mut self, kernel: &K) {
        let id = kernel.getenvid();
        log::debug!("context rebound {} -> {}", self.env_id, id);
        self.env_id = id;
    }

    /// Installs the page fault handler
    ///
    /// The first call allocates the exception stack and registers the
    /// upcall with the kernel. Later calls only swap the handler.
    pub fn set_pgfault_handler(
        &mut self,
        kernel: &mut K,
        handler: PgFaultHandler<K>,
    ) -> Result<(), KernelError> {
        if !self.exception_stack_ready {
            kernel.page_alloc(
                EnvId::CURRENT,
                UXSTACKBASE,
                PteFlags::USER_PRESENT | PteFlags::WRITABLE,
            )?;
            kernel.env_set_pgfault_upcall(EnvId::CURRENT, PGFAULT_UPCALL)?;
            self.exception_stack_ready = true;
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Writes `bytes` at `va`, servicing page faults as they occur
    pub fn store(&mut self, kernel: &mut K, va: VirtAddr, bytes: &[u8]) -> Result<(), FaultError> {
        self.access(kernel, |k| k.store(va, bytes))
    }

    /// Reads into `buf` from `va`, servicing page faults as they occur
    pub fn load(&mut self, kernel: &mut K, va: VirtAddr, buf: &mut [u8]) -> Result<(), FaultError> {
        self.access(kernel, |k| k.load(va, &mut *buf))
    }

    /// Runs the installed handler for a delivered fault
    ///
    /// On failure the environment is destroyed before the error is returned,
    /// unless the kernel already destroyed it while the handler ran.
    pub fn deliver_fault(&mut self, kernel: &mut K, utf: &UTrapframe) -> Result<(), FaultError> {
        let result = match self.handler {
            Some(handler) => handler(kernel, utf),
            None => Err(FaultError::NoHandler),
        };

        if let Err(error) = &result {
            log::error!("{}: fatal page fault at {}: {}", self.env_id, utf.fault_va, error);
            if !error.is_killed() {
                self.exit(kernel);
            }
        }
        result
    }

    /// Destroys this context's own environment
    ///
    /// Does nothing once another environment is running: the id named by
    /// [`EnvId::CURRENT`] is no longer ours.
    fn exit(&self, kernel: &mut K) {
        let running = kernel.getenvid();
        if running != self.env_id {
            log::warn!("{}: already gone, {} is running", self.env_id, running);
            return;
        }
        if let Err(destroy_error) = kernel.env_destroy(self.env_id) {
            log::error!("{}: failed to exit: {}", self.env_id, destroy_error);
        }
    }

    fn access<F>(&mut self, kernel: &mut K, mut op: F) -> Result<(), FaultError>
    where
        F: FnMut(&mut K) -> Result<(), AccessError>,
    {
        let mut last_fault: Option<VirtAddr> = None;
        loop {
            match op(kernel) {
                Ok(()) => return Ok(()),
                Err(AccessError::Killed) => return Err(FaultError::Killed),
                Err(AccessError::Fault(utf)) => {
                    if last_fault == Some(utf.fault_va) {
                        let error = FaultError::Unresolved(utf.fault_va);
                        log::error!("{}: {}", self.env_id, error);
                        self.exit(kernel);
                        return Err(error);
                    }
                    self.deliver_fault(kernel, &utf)?;
                    last_fault = Some(utf.fault_va);
                }
            }
        }
    }
}

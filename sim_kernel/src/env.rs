//! Environment table entries for SimulatedKernel

use crate::frames::FrameId;
use core_types::{EnvId, PageNumber, PteFlags};
use kernel_api::{EnvStatus, UpcallEntry};
use std::collections::{BTreeMap, BTreeSet};

/// A page table entry: which frame, with which bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pte {
    pub(crate) frame: FrameId,
    pub(crate) flags: PteFlags,
}

/// Two-level page table, flattened
///
/// Directory slots become present on first use and are never torn down,
/// matching a kernel that does not free page tables on unmap.
#[derive(Debug, Default)]
pub(crate) struct PageTable {
    entries: BTreeMap<PageNumber, Pte>,
    directories: BTreeSet<u32>,
}

impl PageTable {
    pub(crate) fn insert(&mut self, pn: PageNumber, pte: Pte) -> Option<Pte> {
        self.directories.insert(pn.pdx());
        self.entries.insert(pn, pte)
    }

    pub(crate) fn remove(&mut self, pn: PageNumber) -> Option<Pte> {
        self.entries.remove(&pn)
    }

    pub(crate) fn get(&self, pn: PageNumber) -> Option<&Pte> {
        self.entries.get(&pn)
    }

    pub(crate) fn get_mut(&mut self, pn: PageNumber) -> Option<&mut Pte> {
        self.entries.get_mut(&pn)
    }

    pub(crate) fn directory_present(&self, pdx: u32) -> bool {
        self.directories.contains(&pdx)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&PageNumber, &Pte)> {
        self.entries.iter()
    }

    /// Removes every entry, returning them
    pub(crate) fn drain(&mut self) -> Vec<Pte> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

/// Kernel-side state of one environment
#[derive(Debug)]
pub(crate) struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent: Option<EnvId>,
    pub(crate) status: EnvStatus,
    pub(crate) page_table: PageTable,
    pub(crate) pgfault_upcall: Option<UpcallEntry>,
    /// Set on a fresh exofork child: its first exofork returns `Child`
    pub(crate) exofork_pending: bool,
}

impl Env {
    pub(crate) fn new(id: EnvId, parent: Option<EnvId>, status: EnvStatus) -> Self {
        Self {
            id,
            parent,
            status,
            page_table: PageTable::default(),
            pgfault_upcall: None,
            exofork_pending: false,
        }
    }
}

//! Physical page frames for SimulatedKernel
//!
//! Frames carry real bytes so that copy-on-write can be checked by content,
//! not just by bookkeeping. Each frame is reference counted by the number of
//! page table entries that point at it.

use core_types::PGSIZE;
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a physical page frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(u32);

impl FrameId {
    /// Returns the frame's index in physical memory
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

struct Frame {
    data: Box<[u8; PGSIZE]>,
    refs: u32,
}

/// Physical memory: a bounded pool of reference-counted frames
pub(crate) struct FrameTable {
    frames: Vec<Option<Frame>>,
    free: Vec<u32>,
    capacity: usize,
    in_use: usize,
}

impl FrameTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            capacity,
            in_use: 0,
        }
    }

    /// Allocates a zero-filled frame with no references
    pub(crate) fn alloc(&mut self) -> Result<FrameId, KernelError> {
        let frame = Frame {
            data: Box::new([0u8; PGSIZE]),
            refs: 0,
        };

        let index = if let Some(index) = self.free.pop() {
            self.frames[index as usize] = Some(frame);
            index
        } else if self.frames.len() < self.capacity {
            self.frames.push(Some(frame));
            (self.frames.len() - 1) as u32
        } else {
            return Err(KernelError::NoMemory);
        };

        self.in_use += 1;
        Ok(FrameId(index))
    }

    pub(crate) fn incref(&mut self, id: FrameId) {
        if let Some(frame) = self.slot_mut(id) {
            frame.refs += 1;
        }
    }

    /// Drops one reference; returns true if the frame was released
    pub(crate) fn decref(&mut self, id: FrameId) -> bool {
        let released = match self.slot_mut(id) {
            Some(frame) => {
                frame.refs = frame.refs.saturating_sub(1);
                frame.refs == 0
            }
            None => false,
        };

        if released {
            self.frames[id.0 as usize] = None;
            self.free.push(id.0);
            self.in_use -= 1;
        }
        released
    }

    pub(crate) fn refs(&self, id: FrameId) -> u32 {
        self.slot(id).map_or(0, |frame| frame.refs)
    }

    pub(crate) fn data(&self, id: FrameId) -> Option<&[u8; PGSIZE]> {
        self.slot(id).map(|frame| &*frame.data)
    }

    pub(crate) fn data_mut(&mut self, id: FrameId) -> Option<&mut [u8; PGSIZE]> {
        self.slot_mut(id).map(|frame| &mut *frame.data)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    fn slot(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(id.0 as usize).and_then(Option::as_mut)
    }
}

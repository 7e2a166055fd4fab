//! Unique identifiers for system entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log2 of the maximum number of environments
pub const LOG2NENV: u32 = 10;

/// Maximum number of environments the kernel can track at once
pub const NENV: u32 = 1 << LOG2NENV;

/// Shift applied to the generation counter inside an [`EnvId`]
pub const ENVGENSHIFT: u32 = 12;

// Generations stop below bit 31 so every id is a positive `i32`
const GENERATION_MASK: u32 = (1 << (31 - ENVGENSHIFT)) - 1;

/// Identifier for an environment (an address space plus its execution)
///
/// The low bits index the kernel's environment table, the upper bits carry a
/// generation counter so that ids are not reused after a slot is recycled.
/// The value `0` is reserved: syscalls interpret it as "the caller".
/// Every other id lies in `1..=i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvId(u32);

impl EnvId {
    /// Names the calling environment in any syscall that takes an [`EnvId`]
    pub const CURRENT: EnvId = EnvId(0);

    /// Builds an id from a table slot and a generation
    ///
    /// The generation wraps within the available bits and skips zero.
    pub fn from_parts(generation: u32, index: u32) -> Self {
        let generation = match generation & GENERATION_MASK {
            0 => 1,
            g => g,
        };
        Self((generation << ENVGENSHIFT) | (index & (NENV - 1)))
    }

    /// Creates an id from its raw value
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub fn as_raw(&self) -> u32 {
        self.0
    }

    /// Returns the environment table slot this id refers to
    pub fn index(&self) -> u32 {
        self.0 & (NENV - 1)
    }

    /// Returns true for the "caller" alias
    pub fn is_current(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env:{:08x}", self.0)
    }
}

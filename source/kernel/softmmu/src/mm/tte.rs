// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Translation table entry encoding.
//!
//! ```text
//! 63            32 31            12 11   4  3   2..1   0
//! +---------------+----------------+------+----+------+---+
//! |  cache hint   |  frame offset  |  --  | CD | prot | V |
//! +---------------+----------------+------+----+------+---+
//! ```

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Protection requested for a mapping. Only `READ`/`WRITE` are stored in
    /// the entry; `INTERNAL` steers insertion.
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Request comes from the soft-MMU itself and may map the protected head.
        const INTERNAL = 1 << 7;
    }
}

impl Protection {
    pub const NONE: Self = Self::empty();
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// The two bits that live in an entry and in a TLB slot.
    pub const fn access(self) -> Self {
        self.intersection(Self::READ_WRITE)
    }

    /// Matching `mprotect` flags (`PROT_READ == 1`, `PROT_WRITE == 2`).
    pub const fn host_prot(self) -> i32 {
        self.access().bits() as i32
    }

    /// Decodes a menu value `0..=3`.
    pub fn from_user(value: u64) -> Option<Self> {
        u8::try_from(value).ok().filter(|v| *v <= 3).map(Self::from_bits_truncate)
    }
}

const VALID: u64 = 1 << 0;
const PROT_SHIFT: u32 = 1;
const PROT_MASK: u64 = 0b11 << PROT_SHIFT;
const CACHE_DISABLE: u64 = 1 << 3;
const FRAME_MASK: u64 = 0xffff_f000;
const HINT_SHIFT: u32 = 32;

/// One 64-bit translation table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tte(u64);

impl Tte {
    pub const INVALID: Self = Self(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Leaf entry for the frame at `frame_offset`. The cache-disable bit is
    /// left clear; the walker still honours it when present.
    pub fn leaf(frame_offset: u64, prot: Protection, hint: u32) -> Self {
        Self(
            (u64::from(hint) << HINT_SHIFT)
                | (frame_offset & FRAME_MASK)
                | (u64::from(prot.access().bits()) << PROT_SHIFT)
                | VALID,
        )
    }

    /// Non-leaf entry pointing at the node page at `node_offset`.
    pub fn node(node_offset: u64) -> Self {
        Self::leaf(node_offset, Protection::READ_WRITE, 0)
    }

    pub const fn is_valid(self) -> bool {
        self.0 & VALID != 0
    }

    pub fn protection(self) -> Protection {
        Protection::from_bits_truncate(((self.0 & PROT_MASK) >> PROT_SHIFT) as u8)
    }

    pub const fn cache_disabled(self) -> bool {
        self.0 & CACHE_DISABLE != 0
    }

    /// Page-aligned offset of the target frame from the physical base.
    pub const fn frame_offset(self) -> u64 {
        self.0 & FRAME_MASK
    }

    pub const fn cache_hint(self) -> u32 {
        (self.0 >> HINT_SHIFT) as u32
    }
}

/// Deterministic source of cache hints (xorshift32, seed `0x1337`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HintSource {
    state: u32,
}

impl HintSource {
    pub const SEED: u32 = 0x1337;

    pub const fn new() -> Self {
        Self { state: Self::SEED }
    }

    pub fn next_hint(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

impl Default for HintSource {
    fn default() -> Self {
        Self::new()
    }
}

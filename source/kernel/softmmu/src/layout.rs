// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed address map of the emulated address space and the radix index math.

/// Size of a page in bytes.
pub const PAGE_SIZE: u64 = 0x1000;
/// Mask selecting the in-page offset.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// First byte of the virtual region handed to the workload.
pub const REGION_BASE: u64 = 0x1000_0000_0000;
/// End (exclusive) of the virtual region.
pub const REGION_END: u64 = 0x2000_0000_0000;
/// Size of the protected head of the region.
pub const REGION_PROTECTED_SIZE: u64 = PAGE_SIZE * 0x10000;
/// End (exclusive) of the protected head of the region.
pub const REGION_PROTECTED_END: u64 = REGION_BASE + REGION_PROTECTED_SIZE;
/// Where internal allocations start probing.
pub const REGION_ALLOC_START: u64 = REGION_BASE + 0x10000;
/// Start of the sub-range whose offsets back translation-table nodes.
pub const REGION_NODE_START: u64 = REGION_BASE + (REGION_PROTECTED_SIZE >> 1);
/// End (exclusive) of the translation-node sub-range.
pub const REGION_NODE_END: u64 = REGION_PROTECTED_END;

/// First byte of the backing ("physical") range. The root table lives here.
pub const PHYSICAL_BASE: u64 = 0x2000_0000_0000;
/// End (exclusive) of the backing range.
pub const PHYSICAL_END: u64 = 0x3000_0000_0000;

/// Mask applied to user-supplied mapping addresses.
pub const USER_ADDR_MASK: u64 = 0x3fff_ffff_f000;

/// Number of address bits (12..32) consumed by the radix walk.
const INDEX_BITS: u32 = 20;

/// Rounds `addr` down to its page base.
#[inline]
pub const fn page_base(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

#[inline]
pub const fn is_page_aligned(addr: u64) -> bool {
    addr & PAGE_MASK == 0
}

#[inline]
pub const fn in_region(addr: u64) -> bool {
    addr >= REGION_BASE && addr < REGION_END
}

#[inline]
pub const fn in_physical(addr: u64) -> bool {
    addr >= PHYSICAL_BASE && addr < PHYSICAL_END
}

/// Physical offset range `[start, end)` reserved for table nodes.
pub const fn node_pool() -> (u64, u64) {
    (REGION_NODE_START - REGION_BASE, REGION_NODE_END - REGION_BASE)
}

/// Shape of the radix tree: how many levels split address bits 12..32.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Levels(u32);

impl Levels {
    /// Two ten-bit levels.
    pub const REFERENCE: Self = Self(2);

    /// Accepts any level count that divides the 20 index bits evenly.
    pub const fn new(levels: u32) -> Option<Self> {
        if levels == 0 || levels > INDEX_BITS || INDEX_BITS % levels != 0 {
            None
        } else {
            Some(Self(levels))
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Index bits consumed per level.
    pub const fn width(self) -> u32 {
        INDEX_BITS / self.0
    }

    /// Bit position of the lowest index bit for `level` (0 is the root).
    pub const fn shift(self, level: u32) -> u32 {
        INDEX_BITS - (level + 1) * self.width() + 12
    }

    /// Table index selected by `va` at `level`.
    pub const fn index(self, va: u64, level: u32) -> u64 {
        (va >> self.shift(level)) & ((1u64 << self.width()) - 1)
    }

    /// Bytes one table occupies at any level, rounded up to whole pages.
    pub const fn table_size(self) -> u64 {
        let bytes = (1u64 << self.width()) * 8;
        (bytes + PAGE_MASK) & !PAGE_MASK
    }

    pub const fn is_last(self, level: u32) -> bool {
        level + 1 == self.0
    }
}

impl Default for Levels {
    fn default() -> Self {
        Self::REFERENCE
    }
}

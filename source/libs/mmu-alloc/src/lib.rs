// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]

//! CONTEXT: Bump allocators backing the soft-MMU's physical frames and table nodes
//! OWNERS: @runtime
//! PUBLIC API: BumpAllocator, FrameAllocator, NodeAllocator, PAGE_SIZE
//! DEPENDS_ON: core
//! INVARIANTS: Never reclaims; every returned offset is page aligned and inside its pool

/// Size of a page handed out by the page-granular allocators.
pub const PAGE_SIZE: u64 = 0x1000;

/// Monotonic bump allocator over `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BumpAllocator {
    start: u64,
    end: u64,
    cursor: u64,
}

impl BumpAllocator {
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, end: start + size, cursor: start }
    }

    pub fn alloc(&mut self, len: u64, align: u64) -> Option<u64> {
        let align_mask = align - 1;
        let aligned = self.cursor.checked_add(align_mask)? & !align_mask;
        let next = aligned.checked_add(len)?;
        if next > self.end {
            return None;
        }
        self.cursor = next;
        Some(aligned)
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> u64 {
        self.cursor - self.start
    }

    /// Bytes still available, ignoring alignment padding.
    pub fn remaining(&self) -> u64 {
        self.end - self.cursor
    }
}

/// Hands out data frames as offsets from the physical base.
///
/// The pool starts past the root translation table, whose size depends on
/// the tree shape, and ends where the node pool begins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameAllocator {
    bump: BumpAllocator,
}

impl FrameAllocator {
    /// Creates a frame pool covering offsets `[start, limit)`.
    pub const fn new(start: u64, limit: u64) -> Self {
        Self { bump: BumpAllocator::new(start, limit - start) }
    }

    /// Reserves `count` contiguous frames and returns the offset of the first.
    pub fn alloc_frames(&mut self, count: u64) -> Option<u64> {
        self.bump.alloc(count.checked_mul(PAGE_SIZE)?, PAGE_SIZE)
    }

    pub fn frames_used(&self) -> u64 {
        self.bump.used() / PAGE_SIZE
    }
}

/// Hands out translation-table nodes as offsets from the physical base.
/// Every node spans `node_size` bytes (a whole number of pages).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAllocator {
    bump: BumpAllocator,
    node_size: u64,
}

impl NodeAllocator {
    /// Creates a node pool covering offsets `[start, end)`.
    pub const fn new(start: u64, end: u64, node_size: u64) -> Self {
        Self { bump: BumpAllocator::new(start, end - start), node_size }
    }

    pub fn alloc_node(&mut self) -> Option<u64> {
        self.bump.alloc(self.node_size, PAGE_SIZE)
    }

    pub fn nodes_used(&self) -> u64 {
        self.bump.used() / self.node_size
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameAllocator, NodeAllocator, PAGE_SIZE};

    #[test]
    fn frames_start_past_the_root_table() {
        let root = 2 * PAGE_SIZE;
        let mut frames = FrameAllocator::new(root, 5 * PAGE_SIZE);
        assert_eq!(frames.alloc_frames(1), Some(root));
        assert_eq!(frames.alloc_frames(2), Some(root + PAGE_SIZE));
        assert_eq!(frames.alloc_frames(1), None);
        assert_eq!(frames.frames_used(), 3);
    }

    #[test]
    fn frame_runs_never_cross_the_limit() {
        let mut frames = FrameAllocator::new(PAGE_SIZE, 4 * PAGE_SIZE);
        assert_eq!(frames.alloc_frames(4), None);
        assert_eq!(frames.alloc_frames(3), Some(PAGE_SIZE));
        assert_eq!(frames.alloc_frames(u64::MAX), None);
    }

    #[test]
    fn multi_page_nodes_do_not_overlap() {
        let node_size = 2 * PAGE_SIZE;
        let mut nodes = NodeAllocator::new(0x8000, 0xd000, node_size);
        let first = nodes.alloc_node().expect("first node");
        let second = nodes.alloc_node().expect("second node");
        assert_eq!(second, first + node_size);
        // one page left; not enough for a whole node
        assert_eq!(nodes.alloc_node(), None);
        assert_eq!(nodes.nodes_used(), 2);
    }
}

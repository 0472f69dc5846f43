// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Radix translation tree stored in the backing range, allocating
//! intermediate levels on demand.
//!
//! The root table sits at `PHYSICAL_BASE`. Every entry stores an offset from
//! `PHYSICAL_BASE`; intermediate nodes come from the node pool, leaf frames
//! from the frame pool, which starts right after the root. Each table spans
//! [`Levels::table_size`] bytes, so wide levels take more than one page.
//! Only bits 12..32 of a virtual address select entries, so addresses that
//! differ only above bit 32 share a leaf.

use log::{debug, trace};
use mmu_alloc::{FrameAllocator, NodeAllocator};

use super::phys::PhysMemory;
use super::tte::{HintSource, Protection, Tte};
use crate::error::{AddressSpaceError, FatalError, MapError};
use crate::layout::{
    in_physical, in_region, node_pool, page_base, Levels, PAGE_SIZE, PHYSICAL_BASE, REGION_PROTECTED_END,
};

/// Result of a successful walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Walk {
    /// Absolute address of the backing page.
    pub phys: u64,
    /// Protection stored in the leaf.
    pub prot: Protection,
    /// Cache hint stored in the leaf.
    pub hint: u32,
    /// Leaf asks not to be cached.
    pub cache_disabled: bool,
}

/// What to do when the leaf slot for an address is already valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertMode {
    /// Replace the existing leaf.
    Overwrite,
    /// Move one page up and try again.
    Probe,
}

/// The radix translation tree.
pub struct PageTable<M: PhysMemory> {
    mem: M,
    levels: Levels,
    frames: FrameAllocator,
    nodes: NodeAllocator,
    hints: HintSource,
}

impl<M: PhysMemory> PageTable<M> {
    /// Creates an empty tree over `mem`. `mem` must read as zero.
    pub fn new(mem: M, levels: Levels) -> Self {
        let (node_start, node_end) = node_pool();
        let table_size = levels.table_size();
        Self {
            mem,
            levels,
            frames: FrameAllocator::new(table_size, node_start),
            nodes: NodeAllocator::new(node_start, node_end, table_size),
            hints: HintSource::new(),
        }
    }

    pub fn levels(&self) -> Levels {
        self.levels
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Leaf frames handed out so far.
    pub fn frames_used(&self) -> u64 {
        self.frames.frames_used()
    }

    /// Intermediate nodes handed out so far.
    pub fn nodes_used(&self) -> u64 {
        self.nodes.nodes_used()
    }

    /// Address of the entry selecting `va` inside the table at `table`.
    fn slot(&self, table: u64, va: u64, level: u32) -> Result<u64, FatalError> {
        if !in_physical(table) {
            return Err(FatalError::CorruptTable(table));
        }
        Ok(page_base(table) + self.levels.index(va, level) * 8)
    }

    /// Translates `va` to its backing page. Reaching an invalid entry at any
    /// level is fatal.
    pub fn walk(&self, va: u64) -> Result<Walk, FatalError> {
        if !in_region(va) {
            return Err(FatalError::OutOfRegion(va));
        }
        let mut table = PHYSICAL_BASE;
        let mut leaf = Tte::INVALID;
        for level in 0..self.levels.get() {
            let slot = self.slot(table, va, level)?;
            leaf = Tte::from_raw(self.mem.load(slot));
            trace!("walk: {va:#x} level {level} slot {slot:#x} -> {:#x}", leaf.raw());
            if !leaf.is_valid() {
                return Err(FatalError::InvalidEntry { va, level });
            }
            table = PHYSICAL_BASE + leaf.frame_offset();
        }
        if !in_physical(table) {
            return Err(FatalError::CorruptTable(table));
        }
        Ok(Walk { phys: table, prot: leaf.protection(), hint: leaf.cache_hint(), cache_disabled: leaf.cache_disabled() })
    }

    /// Address of the leaf slot for `va`, creating missing intermediate nodes.
    fn leaf_slot(&mut self, va: u64) -> Result<u64, FatalError> {
        let last = self.levels.get() - 1;
        let mut table = PHYSICAL_BASE;
        for level in 0..last {
            let slot = self.slot(table, va, level)?;
            let entry = Tte::from_raw(self.mem.load(slot));
            let next = if entry.is_valid() {
                entry.frame_offset()
            } else {
                let node = self.nodes.alloc_node().ok_or(FatalError::NodesExhausted)?;
                trace!("table: new node {node:#x} at level {level} for {va:#x}");
                self.mem.store(slot, Tte::node(node).raw());
                node
            };
            table = PHYSICAL_BASE + next;
        }
        self.slot(table, va, last)
    }

    /// Installs a leaf for `va` with `prot` and a fresh frame. Returns the
    /// address actually mapped, which differs from `va` only when probing.
    ///
    /// A readable mapping below `REGION_PROTECTED_END` is refused unless
    /// `prot` carries [`Protection::INTERNAL`]; nothing is touched in that case.
    pub fn insert(&mut self, va: u64, prot: Protection, mode: InsertMode) -> Result<u64, AddressSpaceError> {
        if prot.contains(Protection::READ) && va < REGION_PROTECTED_END && !prot.contains(Protection::INTERNAL) {
            return Err(MapError::ReadableZone.into());
        }
        let mut va = page_base(va);
        while in_region(va) {
            let hint = self.hints.next_hint();
            let frame = self.frames.alloc_frames(1).ok_or(FatalError::FramesExhausted)?;
            let slot = self.leaf_slot(va)?;
            if mode == InsertMode::Probe && Tte::from_raw(self.mem.load(slot)).is_valid() {
                trace!("table: {va:#x} taken, probing");
                va += PAGE_SIZE;
                continue;
            }
            let entry = Tte::leaf(frame, prot, hint);
            debug!("table: map {va:#x} -> {:#x} ({prot:?}, hint {hint:#x})", PHYSICAL_BASE + frame);
            self.mem.store(slot, entry.raw());
            return Ok(va);
        }
        Err(MapError::OutOfRange.into())
    }

    /// Clears the leaf for `va` and returns what it held. The frame is not
    /// reclaimed. A missing mapping is fatal.
    pub fn remove(&mut self, va: u64) -> Result<Tte, FatalError> {
        if !in_region(va) {
            return Err(FatalError::OutOfRegion(va));
        }
        let mut table = PHYSICAL_BASE;
        for level in 0..self.levels.get() {
            let slot = self.slot(table, va, level)?;
            let entry = Tte::from_raw(self.mem.load(slot));
            if !entry.is_valid() {
                return Err(FatalError::InvalidEntry { va, level });
            }
            if self.levels.is_last(level) {
                debug!("table: unmap {va:#x}");
                self.mem.store(slot, Tte::INVALID.raw());
                return Ok(entry);
            }
            table = PHYSICAL_BASE + entry.frame_offset();
        }
        Err(FatalError::InvalidEntry { va, level: self.levels.get() })
    }
}

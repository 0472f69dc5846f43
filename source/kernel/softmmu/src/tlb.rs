// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Translation cache whose hits drive a one-instruction computer
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! TEST_COVERAGE: unit + property tests (ttl, fill/wrap, hand-traced steps, determinism)
//!
//! Notes:
//! - Fixed capacity of 65536 slots; the write cursor is a `u16` and wraps, so
//!   filling past capacity overwrites whatever sits at the cursor regardless of
//!   its remaining lifetime.
//! - Every slot carries one 32-bit cell. For a live translation it is the
//!   entry's remaining lifetime; for the computer it is memory. Both roles go
//!   through [`Tlb::cell`] / [`Tlb::set_cell`].
//! - Each hit executes one instruction with the cursor as instruction pointer:
//!   `a = cell[ip]`, `b = cell[ip+1]`, `c = cell[ip+2]`;
//!   `ip = if cell[a] <= cell[b] { c } else { ip + 3 }`;
//!   `cell[a] = cell[a] (+|-) cell[b]`.
//! - A miss that fills a slot advances the cursor by one.

use log::trace;

use crate::config::Semantics;
use crate::error::FatalError;
use crate::layout::{in_physical, in_region, is_page_aligned};
use crate::mm::Protection;

/// Number of slots in the cache.
pub const TLB_ENTRIES: usize = 0x10000;

/// One cache slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TlbEntry {
    /// Page-aligned virtual address this slot translates.
    pub key: u64,
    /// Page-aligned physical address backing `key`.
    pub value: u64,
    /// Protection copied from the leaf entry.
    pub prot: Protection,
    /// Remaining lifetime of the translation *and* a memory cell of the
    /// computer. Only touched through [`Tlb::cell`] and [`Tlb::set_cell`].
    cell: u32,
    /// Slot takes part in lookups.
    pub populated: bool,
}

impl TlbEntry {
    /// Raw cell value.
    pub fn cell(&self) -> u32 {
        self.cell
    }
}

/// A successful lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbHit {
    /// Slot that matched.
    pub slot: u16,
    /// Backing physical page.
    pub phys: u64,
    /// Cached protection.
    pub prot: Protection,
}

/// The translation cache.
#[derive(Clone, PartialEq, Eq)]
pub struct Tlb {
    slots: Box<[TlbEntry]>,
    cursor: u16,
    semantics: Semantics,
}

impl Tlb {
    /// Creates an empty cache executing `semantics` on hits.
    pub fn new(semantics: Semantics) -> Self {
        Self { slots: vec![TlbEntry::default(); TLB_ENTRIES].into_boxed_slice(), cursor: 0, semantics }
    }

    /// Write cursor, which doubles as the instruction pointer.
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    pub fn entry(&self, slot: u16) -> &TlbEntry {
        &self.slots[usize::from(slot)]
    }

    /// Reads the cell of `slot`.
    #[inline]
    pub fn cell(&self, slot: u16) -> u32 {
        self.slots[usize::from(slot)].cell
    }

    /// Writes the cell of `slot`. Writing a cell marks the slot populated.
    #[inline]
    pub fn set_cell(&mut self, slot: u16, value: u32) {
        let entry = &mut self.slots[usize::from(slot)];
        entry.cell = value;
        entry.populated = true;
    }

    /// Number of populated slots.
    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|entry| entry.populated).count()
    }

    /// Looks up `key`. A hit costs the entry one unit of lifetime and executes
    /// one instruction; an entry whose lifetime reaches zero is erased and the
    /// scan moves on.
    pub fn lookup(&mut self, key: u64) -> Result<Option<TlbHit>, FatalError> {
        for index in 0..TLB_ENTRIES {
            let entry = &mut self.slots[index];
            if !entry.populated || entry.key != key {
                continue;
            }
            let slot = index as u16;
            entry.cell = entry.cell.wrapping_sub(1);
            if entry.cell == 0 {
                trace!("tlb: flushing slot {slot:#x} ({:#x} -> {:#x})", entry.key, entry.value);
                *entry = TlbEntry::default();
                continue;
            }
            let hit = TlbHit { slot, phys: entry.value, prot: entry.prot };
            if !in_region(key) || !is_page_aligned(key) || !in_physical(hit.phys) || !is_page_aligned(hit.phys)
            {
                return Err(FatalError::CorruptTlbEntry { slot });
            }
            self.step();
            return Ok(Some(hit));
        }
        Ok(None)
    }

    /// Caches `key -> value` at the cursor with lifetime `hint` and advances
    /// the cursor by one. Returns the slot written.
    pub fn fill(&mut self, key: u64, value: u64, prot: Protection, hint: u32) -> u16 {
        let slot = self.cursor;
        trace!("tlb: inserting {key:#x} -> {value:#x} (prot {prot:?} cache {hint:#x}) at {slot:#x}");
        self.slots[usize::from(slot)] = TlbEntry { key, value, prot: prot.access(), cell: hint, populated: true };
        self.cursor = self.cursor.wrapping_add(1);
        slot
    }

    /// Executes one instruction at the cursor.
    pub fn step(&mut self) {
        let ip = self.cursor;
        let a = self.cell(ip) as u16;
        let b = self.cell(ip.wrapping_add(1)) as u16;
        let c = self.cell(ip.wrapping_add(2)) as u16;
        let (va, vb) = (self.cell(a), self.cell(b));
        let next = if va <= vb { c } else { ip.wrapping_add(3) };
        trace!("tlb: mem[{a:#x}] ({va:#x}) op mem[{b:#x}] ({vb:#x}), next instr {next:#x}");
        self.set_cell(a, self.semantics.apply(va, vb));
        self.cursor = next;
    }

    /// Logs every slot that is populated or holds a non-zero cell.
    pub fn dump(&self) {
        trace!(" == dump tlb == (cursor {:#x})", self.cursor);
        for (index, entry) in self.slots.iter().enumerate() {
            if entry.populated || entry.cell != 0 {
                trace!(
                    "tlb idx {index:#x} {:#x} -> {:#x} prot {:?} (cache: {:#x})",
                    entry.key,
                    entry.value,
                    entry.prot,
                    entry.cell
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn place(&mut self, slot: u16, key: u64, value: u64, prot: Protection, cell: u32) {
        self.slots[usize::from(slot)] = TlbEntry { key, value, prot, cell, populated: true };
    }

    #[cfg(test)]
    pub(crate) fn set_cursor(&mut self, cursor: u16) {
        self.cursor = cursor;
    }
}

impl core::fmt::Debug for Tlb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tlb")
            .field("cursor", &self.cursor)
            .field("semantics", &self.semantics)
            .field("populated", &self.populated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PAGE_SIZE, PHYSICAL_BASE, REGION_BASE};
    use proptest::prelude::*;

    const KEY: u64 = REGION_BASE + 0x1000_0000;
    const PHYS: u64 = PHYSICAL_BASE + 0x5000;

    #[test]
    fn hits_repeat_until_lifetime_runs_out() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.place(0x200, KEY, PHYS, Protection::READ, 3);
        for _ in 0..2 {
            let hit = tlb.lookup(KEY).unwrap().expect("hit");
            assert_eq!((hit.slot, hit.phys, hit.prot), (0x200, PHYS, Protection::READ));
        }
        assert_eq!(tlb.lookup(KEY).unwrap(), None);
        assert!(!tlb.entry(0x200).populated);
    }

    #[test]
    fn expired_entry_falls_through_to_a_later_duplicate() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.place(0x300, KEY, PHYS, Protection::READ, 1);
        tlb.place(0x301, KEY, PHYS + PAGE_SIZE, Protection::READ_WRITE, 5);
        let hit = tlb.lookup(KEY).unwrap().expect("second slot hits");
        assert_eq!(hit.slot, 0x301);
        assert_eq!(hit.phys, PHYS + PAGE_SIZE);
    }

    #[test]
    fn miss_leaves_cursor_alone() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        assert_eq!(tlb.lookup(KEY).unwrap(), None);
        assert_eq!(tlb.cursor(), 0);
    }

    #[test]
    fn fill_advances_by_one_and_wraps() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.set_cursor(u16::MAX);
        assert_eq!(tlb.fill(KEY, PHYS, Protection::READ, 9), u16::MAX);
        assert_eq!(tlb.cursor(), 0);
        assert_eq!(tlb.cell(u16::MAX), 9);
        tlb.fill(KEY + PAGE_SIZE, PHYS, Protection::READ, 4);
        assert_eq!(tlb.entry(0).key, KEY + PAGE_SIZE);
    }

    #[test]
    fn fill_overwrites_live_entry_on_wrap() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.place(0, KEY, PHYS, Protection::READ, 1000);
        tlb.fill(KEY + PAGE_SIZE, PHYS, Protection::READ, 1);
        assert_eq!(tlb.entry(0).key, KEY + PAGE_SIZE);
    }

    #[test]
    fn corrupt_hit_is_fatal() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.place(7, KEY, 0x1234_5000, Protection::READ, 5);
        assert!(matches!(tlb.lookup(KEY), Err(FatalError::CorruptTlbEntry { slot: 7 })));
    }

    #[test]
    fn two_addleq_steps_follow_hand_trace() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        // ip 0: a=10 b=11 c=20 ; ip 20: a=10 b=11 c=40
        for (slot, value) in [(0, 10), (1, 11), (2, 20), (20, 10), (21, 11), (22, 40), (10, 5), (11, 7)] {
            tlb.set_cell(slot, value);
        }
        tlb.place(0x100, KEY, PHYS, Protection::READ_WRITE, 50);

        // 5 <= 7: branch to 20, mem[10] = 12
        tlb.lookup(KEY).unwrap().expect("hit");
        assert_eq!(tlb.cursor(), 20);
        assert_eq!(tlb.cell(10), 12);

        // 12 > 7: fall through to 23, mem[10] = 19
        tlb.lookup(KEY).unwrap().expect("hit");
        assert_eq!(tlb.cursor(), 23);
        assert_eq!(tlb.cell(10), 19);
        assert_eq!(tlb.cell(11), 7);
        assert_eq!(tlb.cell(0x100), 48);
    }

    #[test]
    fn subleq_step_subtracts() {
        let mut tlb = Tlb::new(Semantics::Subleq);
        for (slot, value) in [(0, 4), (1, 5), (2, 9), (4, 3), (5, 8)] {
            tlb.set_cell(slot, value);
        }
        tlb.step();
        assert_eq!(tlb.cell(4), 3u32.wrapping_sub(8));
        assert_eq!(tlb.cursor(), 9);
    }

    #[test]
    fn operand_indices_truncate_to_sixteen_bits() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        tlb.set_cell(0, 0x0003_0005);
        tlb.set_cell(1, 0x0001_0006);
        tlb.set_cell(2, 0xffff_0009);
        tlb.set_cell(5, 1);
        tlb.set_cell(6, 1);
        tlb.step();
        assert_eq!(tlb.cell(5), 2);
        assert_eq!(tlb.cursor(), 9);
    }

    #[test]
    fn writing_a_cell_populates_its_slot() {
        let mut tlb = Tlb::new(Semantics::Addleq);
        // All-zero operands: mem[0] += mem[0], branch to 0.
        tlb.step();
        assert!(tlb.entry(0).populated);
        assert!(!tlb.entry(1).populated);
        assert_eq!(tlb.entry(0).key, 0);
        assert_eq!(tlb.cursor(), 0);
    }

    proptest! {
        #[test]
        fn steps_are_deterministic(
            cells in proptest::collection::vec((0u16..64, any::<u32>()), 0..48),
            cursor in 0u16..64,
            hits in 1usize..16,
        ) {
            let mut tlb = Tlb::new(Semantics::BUILD);
            for (slot, value) in cells {
                tlb.set_cell(slot, value);
            }
            tlb.place(0x8000, KEY, PHYS, Protection::READ, u32::MAX);
            tlb.set_cursor(cursor);
            let mut twin = tlb.clone();
            for _ in 0..hits {
                let left = tlb.lookup(KEY).unwrap();
                let right = twin.lookup(KEY).unwrap();
                prop_assert_eq!(left, right);
            }
            prop_assert_eq!(tlb.cursor(), twin.cursor());
            prop_assert!(tlb == twin);
        }
    }
}

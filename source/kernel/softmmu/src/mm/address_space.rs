// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-facing mapping API over the soft-MMU plus internal allocation.
//!
//! Every request is validated before it reaches the tree; malformed requests
//! come back as [`MapError`] and leave everything untouched.

use std::collections::BTreeSet;

use log::{debug, trace};

use super::page_table::InsertMode;
use super::phys::PhysMemory;
use super::tte::Protection;
use crate::context::{CachePolicy, MmuContext};
use crate::error::{AddressSpaceError, FatalError, MapError};
use crate::layout::{
    in_region, is_page_aligned, PAGE_MASK, PAGE_SIZE, REGION_ALLOC_START, REGION_NODE_START, REGION_PROTECTED_END,
    USER_ADDR_MASK,
};

/// Maximum number of live user mappings.
pub const MAX_USER_MAPPINGS: usize = 0x100;

/// Word access to the emulated region.
pub trait RegionAccess {
    fn load_u64(&self, va: u64) -> Result<u64, FatalError>;
    fn store_u64(&self, va: u64, value: u64) -> Result<(), FatalError>;
    fn load_u32(&self, va: u64) -> Result<u32, FatalError>;
    fn store_u32(&self, va: u64, value: u32) -> Result<(), FatalError>;
}

/// Reaches region words by translating them through a context and touching
/// the backing memory directly. Each access counts as one emulated access.
///
/// This is how the region behaves without the host mapping and signal
/// machinery, e.g. over [`super::SparsePhys`].
pub struct TranslatingRegion<'a, M: PhysMemory> {
    ctx: &'a MmuContext<M>,
}

impl<'a, M: PhysMemory> TranslatingRegion<'a, M> {
    pub fn new(ctx: &'a MmuContext<M>) -> Self {
        Self { ctx }
    }

    /// Backing address of the 8-byte word holding `va`. Stores need the
    /// page's write bit; loads only need some access.
    fn backing_word(&self, va: u64, store: bool) -> Result<u64, FatalError> {
        self.ctx.record_access();
        let translation = self.ctx.translate(va, CachePolicy::Fill)?;
        let page = va & !PAGE_MASK;
        if translation.prot.access().is_empty() {
            return Err(FatalError::ProtectionNone { page });
        }
        if store && !translation.prot.contains(Protection::WRITE) {
            return Err(FatalError::WriteProtected { page });
        }
        Ok(translation.phys + (va & PAGE_MASK & !7))
    }
}

impl<M: PhysMemory> RegionAccess for TranslatingRegion<'_, M> {
    fn load_u64(&self, va: u64) -> Result<u64, FatalError> {
        let word = self.backing_word(va, false)?;
        Ok(self.ctx.with_memory(|mem| mem.load(word)))
    }

    fn store_u64(&self, va: u64, value: u64) -> Result<(), FatalError> {
        let word = self.backing_word(va, true)?;
        self.ctx.with_memory(|mem| mem.store(word, value));
        Ok(())
    }

    fn load_u32(&self, va: u64) -> Result<u32, FatalError> {
        let word = self.backing_word(va, false)?;
        let shift = (va & 4) * 8;
        Ok((self.ctx.with_memory(|mem| mem.load(word)) >> shift) as u32)
    }

    fn store_u32(&self, va: u64, value: u32) -> Result<(), FatalError> {
        let word = self.backing_word(va, true)?;
        let shift = (va & 4) * 8;
        self.ctx.with_memory(|mem| {
            let old = mem.load(word) & !(0xffff_ffffu64 << shift);
            mem.store(word, old | (u64::from(value) << shift));
        });
        Ok(())
    }
}

/// Mappings created on behalf of the user, validated against the region.
pub struct AddressSpace<'a, M: PhysMemory, R: RegionAccess> {
    ctx: &'a MmuContext<M>,
    region: R,
    records: BTreeSet<u64>,
}

impl<'a, M: PhysMemory, R: RegionAccess> AddressSpace<'a, M, R> {
    pub fn new(ctx: &'a MmuContext<M>, region: R) -> Self {
        Self { ctx, region, records: BTreeSet::new() }
    }

    /// Live mappings, lowest address first.
    pub fn mappings(&self) -> Vec<u64> {
        self.records.iter().copied().collect()
    }

    /// Traces where every live mapping currently resolves, without caching
    /// the walks. Lookups still run through the TLB and so still step it.
    pub fn log_mappings(&self) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        for addr in &self.records {
            match self.ctx.translate(*addr, CachePolicy::Bypass) {
                Ok(t) => trace!("mapping {addr:#x} -> {:#x} ({:?}, via {:?})", t.phys, t.prot, t.source),
                Err(err) => trace!("mapping {addr:#x}: {err}"),
            }
        }
    }

    pub fn is_registered(&self, addr: u64) -> bool {
        self.records.contains(&addr)
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= MAX_USER_MAPPINGS
    }

    /// Runs every address check of [`Self::register`] and returns the address
    /// that would be recorded.
    ///
    /// The address is masked to the user range only after the protected-head
    /// check.
    pub fn validate_register(&self, addr: u64) -> Result<u64, MapError> {
        if self.is_full() {
            return Err(MapError::TooManyMappings);
        }
        if !is_page_aligned(addr) {
            return Err(MapError::Unaligned);
        }
        if addr < REGION_PROTECTED_END {
            return Err(MapError::Protected);
        }
        let addr = addr & USER_ADDR_MASK;
        if !in_region(addr) {
            return Err(MapError::OutOfRange);
        }
        if self.records.contains(&addr) {
            return Err(MapError::Duplicate);
        }
        Ok(addr)
    }

    /// Maps a fresh frame at `addr` with protection `prot` (`0..=3`) and
    /// returns the address recorded for it.
    pub fn register(&mut self, addr: u64, prot: u64) -> Result<u64, AddressSpaceError> {
        let addr = self.validate_register(addr)?;
        let prot = Protection::from_user(prot).ok_or(MapError::InvalidProtection)?;
        self.ctx.insert(addr, prot, InsertMode::Overwrite)?;
        self.records.insert(addr);
        debug!("address space: registered {addr:#x} ({prot:?})");
        Ok(addr)
    }

    /// Clears the mapping at `addr`. The frame is not reclaimed.
    pub fn unregister(&mut self, addr: u64) -> Result<(), AddressSpaceError> {
        if !is_page_aligned(addr) {
            return Err(MapError::Unaligned.into());
        }
        if !self.records.contains(&addr) {
            return Err(MapError::NotRegistered.into());
        }
        self.ctx.remove(addr)?;
        self.records.remove(&addr);
        debug!("address space: unregistered {addr:#x}");
        Ok(())
    }

    /// Checks a write of `len` bytes at `addr` without performing it.
    pub fn validate_write(&self, addr: u64, len: u64) -> Result<(), MapError> {
        if !self.records.contains(&addr) {
            return Err(MapError::NotRegistered);
        }
        if len > PAGE_SIZE {
            return Err(MapError::TooLong);
        }
        if len % 8 != 0 {
            return Err(MapError::NotWordMultiple);
        }
        if !in_region(addr) {
            return Err(MapError::OutOfRange);
        }
        Ok(())
    }

    /// Stores `data` at `addr` as successive 8-byte words.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), AddressSpaceError> {
        self.validate_write(addr, data.len() as u64)?;
        for (index, chunk) in data.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.region.store_u64(addr + index as u64 * 8, u64::from_ne_bytes(word))?;
        }
        Ok(())
    }

    /// Checks a read of `len` bytes at `addr` without performing it.
    pub fn validate_read(&self, addr: u64, len: u64) -> Result<(), MapError> {
        if !self.records.contains(&addr) {
            return Err(MapError::NotRegistered);
        }
        if !in_region(addr) {
            return Err(MapError::OutOfRange);
        }
        if len > PAGE_SIZE {
            return Err(MapError::TooLong);
        }
        Ok(())
    }

    /// Reads `len` bytes from `addr`, word by word.
    pub fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>, AddressSpaceError> {
        self.validate_read(addr, len)?;
        let len = len as usize;
        let mut out = Vec::with_capacity(len.next_multiple_of(8));
        for index in 0..len.div_ceil(8) {
            let word = self.region.load_u64(addr + index as u64 * 8)?;
            out.extend_from_slice(&word.to_ne_bytes());
        }
        out.truncate(len);
        Ok(out)
    }
}

impl<M: PhysMemory> MmuContext<M> {
    /// Reserves `size` bytes of contiguous internal memory inside the
    /// protected head and returns its base.
    pub fn allocate_internal(&self, size: u64) -> Result<u64, FatalError> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(FatalError::Allocation(MapError::BadAllocationSize));
        }
        let prot = Protection::READ_WRITE | Protection::INTERNAL;
        let base = self.insert(REGION_ALLOC_START, prot, InsertMode::Probe).map_err(AddressSpaceError::into_fatal)?;
        if base >= REGION_NODE_START {
            return Err(FatalError::AllocationOverrun(base));
        }
        for page in 1..size / PAGE_SIZE {
            let want = base + page * PAGE_SIZE;
            if want >= REGION_NODE_START {
                return Err(FatalError::AllocationOverrun(want));
            }
            let got = self.insert(want, prot, InsertMode::Overwrite).map_err(AddressSpaceError::into_fatal)?;
            if got != want {
                return Err(FatalError::AllocationOverrun(got));
            }
        }
        debug!("internal allocation: {size:#x} bytes at {base:#x}");
        Ok(base)
    }
}

// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared translation state (page table + TLB) behind one lock
//! OWNERS: @kernel-mm-team
//! PUBLIC API: MmuContext::{translate, insert, remove, record_access}
//! INVARIANTS:
//!   - Every translation goes through the TLB before the tree
//!   - The lock is never held while the virtual region is touched; region
//!     accesses fault back into the soft-MMU and would self-deadlock

use core::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use parking_lot::Mutex;

use crate::config::MmuConfig;
use crate::error::{AddressSpaceError, FatalError};
use crate::layout::{in_region, page_base};
use crate::mm::{InsertMode, PageTable, PhysMemory, Protection};
use crate::tlb::Tlb;

/// Whether a tree walk may populate the TLB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// Cache the result unless the leaf carries the cache-disable bit.
    Fill,
    /// Never cache.
    Bypass,
}

/// Where a translation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Tlb,
    Walk,
}

/// A resolved translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    /// Backing page.
    pub phys: u64,
    /// Protection the access is allowed.
    pub prot: Protection,
    pub source: Source,
}

struct Translator<M: PhysMemory> {
    table: PageTable<M>,
    tlb: Tlb,
}

/// Translation state shared by the pager threads, the trap handler and the
/// address-space API.
pub struct MmuContext<M: PhysMemory> {
    inner: Mutex<Translator<M>>,
    accesses: AtomicU64,
    config: MmuConfig,
}

impl<M: PhysMemory> MmuContext<M> {
    pub fn new(mem: M, config: MmuConfig) -> Self {
        Self {
            inner: Mutex::new(Translator {
                table: PageTable::new(mem, config.levels),
                tlb: Tlb::new(config.semantics),
            }),
            accesses: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> MmuConfig {
        self.config
    }

    /// Resolves the page holding `addr`: TLB first, then the tree.
    pub fn translate(&self, addr: u64, policy: CachePolicy) -> Result<Translation, FatalError> {
        let page = page_base(addr);
        let mut inner = self.inner.lock();
        if let Some(hit) = inner.tlb.lookup(page)? {
            trace!("translate: {page:#x} -> {:#x} (tlb slot {:#x})", hit.phys, hit.slot);
            return Ok(Translation { phys: hit.phys, prot: hit.prot, source: Source::Tlb });
        }
        if !in_region(page) {
            return Err(FatalError::OutOfRegion(page));
        }
        let walk = inner.table.walk(page)?;
        if policy == CachePolicy::Fill && !walk.cache_disabled {
            inner.tlb.fill(page, walk.phys, walk.prot, walk.hint);
        }
        trace!("translate: {page:#x} -> {:#x} (walk)", walk.phys);
        Ok(Translation { phys: walk.phys, prot: walk.prot, source: Source::Walk })
    }

    /// See [`PageTable::insert`].
    pub fn insert(&self, va: u64, prot: Protection, mode: InsertMode) -> Result<u64, AddressSpaceError> {
        self.inner.lock().table.insert(va, prot, mode)
    }

    /// See [`PageTable::remove`]. Cached translations of `va` stay live until
    /// their lifetime runs out.
    pub fn remove(&self, va: u64) -> Result<(), FatalError> {
        self.inner.lock().table.remove(va).map(|_| ())
    }

    /// Counts one emulated access and returns the new total.
    pub fn record_access(&self) -> u64 {
        self.accesses.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    pub fn reset_accesses(&self) {
        self.accesses.store(0, Ordering::Relaxed);
    }

    /// Runs `f` against the TLB.
    pub fn with_tlb<R>(&self, f: impl FnOnce(&Tlb) -> R) -> R {
        f(&self.inner.lock().tlb)
    }

    /// Runs `f` against the backing memory.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(self.inner.lock().table.memory_mut())
    }

    pub fn dump_tlb(&self) {
        if log::log_enabled!(log::Level::Trace) {
            self.inner.lock().tlb.dump();
        }
    }
}

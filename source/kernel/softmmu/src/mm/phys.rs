// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Access to the backing ("physical") range that holds translation tables.

use std::collections::HashMap;

/// Word-granular access to the backing range.
///
/// Addresses are absolute (they include the physical base) and 8-byte aligned.
pub trait PhysMemory: Send {
    fn load(&self, addr: u64) -> u64;
    fn store(&mut self, addr: u64, value: u64);
}

/// The real backing range, mapped at its fixed address by the runtime.
#[derive(Debug)]
pub struct MappedPhys {
    _private: (),
}

impl MappedPhys {
    /// # Safety
    ///
    /// `[PHYSICAL_BASE, PHYSICAL_END)` must be mapped read+write for the rest
    /// of the process lifetime.
    pub(crate) unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for MappedPhys {
    fn load(&self, addr: u64) -> u64 {
        // SAFETY: the constructor contract guarantees the range is mapped; callers
        // only pass addresses checked against the physical range.
        unsafe { core::ptr::read_volatile(addr as *const u64) }
    }

    fn store(&mut self, addr: u64, value: u64) {
        // SAFETY: see `load`.
        unsafe { core::ptr::write_volatile(addr as *mut u64, value) }
    }
}

/// Sparse word store standing in for the backing range in host tests.
/// Unwritten words read as zero, like fresh anonymous memory.
#[derive(Debug, Default, Clone)]
pub struct SparsePhys {
    words: HashMap<u64, u64>,
}

impl SparsePhys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-zero words written so far.
    pub fn populated(&self) -> usize {
        self.words.values().filter(|word| **word != 0).count()
    }
}

impl PhysMemory for SparsePhys {
    fn load(&self, addr: u64) -> u64 {
        self.words.get(&addr).copied().unwrap_or(0)
    }

    fn store(&mut self, addr: u64, value: u64) {
        self.words.insert(addr, value);
    }
}

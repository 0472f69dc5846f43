// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Software MMU for a fixed virtual region of the calling process
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Runtime (process install), MmuContext (translation), AddressSpace (user mappings)
//! DEPENDS_ON: mmu-alloc (frame/node pools)
//!
//! Missing pages in the region are filled on demand from a backing range via
//! userfaultfd, using a radix tree stored in that backing range. Backed pages
//! keep no host access; each touch is emulated through SIGSEGV/SIGTRAP and
//! counted. Translations are cached in a TLB whose every hit also executes one
//! ADDLEQ/SUBLEQ instruction over the TLB's own lifetime cells.

#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("softmmu requires Linux (userfaultfd, ucontext single-step)");

pub mod config;
pub mod context;
pub mod error;
pub mod fault_frame;
pub mod layout;
pub mod mm;
pub mod paging;
pub mod runtime;
pub mod sys;
pub mod tlb;
pub mod trap;

pub use config::{MmuConfig, Semantics};
pub use context::{CachePolicy, MmuContext, Source, Translation};
pub use error::{fatal, AddressSpaceError, FatalError, MapError};
pub use layout::{Levels, PAGE_SIZE};
pub use mm::{AddressSpace, InsertMode, PhysMemory, Protection, RegionAccess, SparsePhys, TranslatingRegion};
pub use runtime::{LiveRegion, Runtime};
pub use tlb::Tlb;

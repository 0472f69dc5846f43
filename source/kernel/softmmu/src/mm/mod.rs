// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Translation tree, its entry encoding, backing memory and the mapping API.

pub mod address_space;
pub mod page_table;
pub mod phys;
pub mod tte;

pub use address_space::{AddressSpace, RegionAccess, TranslatingRegion, MAX_USER_MAPPINGS};
pub use page_table::{InsertMode, PageTable, Walk};
pub use phys::{MappedPhys, PhysMemory, SparsePhys};
pub use tte::{HintSource, Protection, Tte};

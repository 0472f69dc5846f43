// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration of the soft-MMU.

use crate::layout::Levels;

#[cfg(all(feature = "addleq", feature = "subleq"))]
compile_error!("softmmu: features 'addleq' and 'subleq' are mutually exclusive");

#[cfg(not(any(feature = "addleq", feature = "subleq")))]
compile_error!("softmmu: enable exactly one of the 'addleq' or 'subleq' features");

/// Instruction executed by the translation cache on every hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Semantics {
    /// `mem[a] += mem[b]; if mem[a] <= mem[b] (before) goto c`.
    Addleq,
    /// `mem[a] -= mem[b]; if mem[a] <= mem[b] (before) goto c`.
    Subleq,
}

impl Semantics {
    /// Variant selected by the crate features of this build.
    pub const BUILD: Self = if cfg!(feature = "subleq") { Self::Subleq } else { Self::Addleq };

    #[inline]
    pub const fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            Self::Addleq => a.wrapping_add(b),
            Self::Subleq => a.wrapping_sub(b),
        }
    }
}

impl Default for Semantics {
    fn default() -> Self {
        Self::BUILD
    }
}

/// Knobs accepted by [`crate::Runtime::install`] and [`crate::MmuContext::new`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MmuConfig {
    /// Depth of the radix translation tree.
    pub levels: Levels,
    /// OISC flavour driven by cache hits.
    pub semantics: Semantics,
}

impl MmuConfig {
    /// Returns a config with `levels` radix levels, or `None` if 20 is not divisible by it.
    pub fn with_levels(self, levels: u32) -> Option<Self> {
        Some(Self { levels: Levels::new(levels)?, ..self })
    }
}

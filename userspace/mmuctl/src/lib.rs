// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Front end for the soft-MMU: a mapping menu fed from stdin, followed by a
//! Collatz game whose memory lives entirely in the emulated region.
//!
//! The menu and the game are generic over their I/O and over the region
//! accessor, so both run on the host against `softmmu::SparsePhys` in tests.

#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

pub mod cli;
pub mod collatz;
pub mod sandbox;

pub use cli::{parse_hex_choice, MappingApi, Menu, MenuError, BANNER};
pub use collatz::{Collatz, GameError, GameMemory, BLANK_QUICKSOLVER, REFERENCE_QUICKSOLVER};

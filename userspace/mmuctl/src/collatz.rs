// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Collatz scorer running entirely out of soft-MMU memory.
//!
//! Every word the game touches lives in internal allocations, so each step is
//! mediated (and counted) by the soft-MMU. Small values are answered from a
//! quick-solver table that also lives in that memory.

use std::io::{self, Read, Write};

use softmmu::{FatalError, MmuContext, PhysMemory, RegionAccess, PAGE_SIZE};
use thiserror::Error;

/// Values below this are answered from the quick-solver table.
pub const QUICKSOLVER_ENTRIES: usize = 0x80;
/// Rounds that fit the input page.
pub const MAX_ROUNDS: u32 = (PAGE_SIZE / 4) as u32;
/// Words of step history shifted on every step.
pub const HISTORY_WORDS: u32 = 0x800;

/// Remaining steps to reach 1 for `0..0x80` (index 0 is a placeholder).
pub const REFERENCE_QUICKSOLVER: [u32; QUICKSOLVER_ENTRIES] = [
    1, 0, 1, 7, 2, 5, 8, 16, 3, 19, 6, 14, 9, 9, 17, 17, //
    4, 12, 20, 20, 7, 7, 15, 15, 10, 23, 10, 111, 18, 18, 18, 106, //
    5, 26, 13, 13, 21, 21, 21, 34, 8, 109, 8, 29, 16, 16, 16, 104, //
    11, 24, 24, 24, 11, 11, 112, 112, 19, 32, 19, 32, 19, 19, 107, 107, //
    6, 27, 27, 27, 14, 14, 14, 102, 22, 115, 22, 14, 22, 22, 35, 35, //
    9, 22, 110, 110, 9, 9, 30, 30, 17, 30, 17, 92, 17, 17, 105, 105, //
    12, 118, 25, 25, 25, 25, 25, 87, 12, 38, 12, 100, 113, 113, 113, 69, //
    20, 12, 33, 33, 20, 20, 33, 33, 20, 95, 20, 46, 108, 108, 108, 46, //
];

/// A table that answers almost everything wrong.
pub const BLANK_QUICKSOLVER: [u32; QUICKSOLVER_ENTRIES] = [0; QUICKSOLVER_ENTRIES];

#[derive(Debug, Error)]
pub enum GameError {
    #[error("failed to get number of rounds")]
    Rounds,
    #[error("failed to get number")]
    Number,
    #[error("failed to reply with solution")]
    Reply,
    #[error(transparent)]
    Console(#[from] io::Error),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Region addresses of the game's arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameMemory {
    pub input: u64,
    pub output: u64,
    pub pages: u64,
    /// Reserved; never touched by the game.
    pub counts: u64,
    pub quicksolver: u64,
}

impl GameMemory {
    /// Carves the arrays out of internal memory, in a fixed order.
    pub fn allocate<M: PhysMemory>(ctx: &MmuContext<M>) -> Result<Self, FatalError> {
        Ok(Self {
            input: ctx.allocate_internal(PAGE_SIZE)?,
            output: ctx.allocate_internal(PAGE_SIZE)?,
            pages: ctx.allocate_internal(2 * PAGE_SIZE)?,
            counts: ctx.allocate_internal(PAGE_SIZE)?,
            quicksolver: ctx.allocate_internal(PAGE_SIZE)?,
        })
    }
}

fn word(base: u64, index: u32) -> u64 {
    base + u64::from(index) * 4
}

fn read_u32(input: &mut impl Read) -> Option<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes).ok()?;
    Some(u32::from_ne_bytes(bytes))
}

/// One game over `region`.
pub struct Collatz<'a, R: RegionAccess> {
    region: &'a R,
    memory: GameMemory,
    table: &'a [u32; QUICKSOLVER_ENTRIES],
    history: u32,
}

impl<'a, R: RegionAccess> Collatz<'a, R> {
    pub fn new(region: &'a R, memory: GameMemory, table: &'a [u32; QUICKSOLVER_ENTRIES]) -> Self {
        Self { region, memory, table, history: HISTORY_WORDS }
    }

    /// Overrides how many history words are shifted per step (at most
    /// [`HISTORY_WORDS`]).
    pub fn with_history(self, history: u32) -> Self {
        Self { history: history.clamp(1, HISTORY_WORDS), ..self }
    }

    /// Plays every round requested on `input`, answering on `output`.
    /// `accesses` reports the soft-MMU access counter for the per-round line.
    pub fn play(
        &self,
        input: &mut impl Read,
        output: &mut impl Write,
        console: &mut impl Write,
        accesses: impl Fn() -> u64,
    ) -> Result<Vec<u32>, GameError> {
        writeln!(console, "let me play my favorite game")?;
        let rounds = read_u32(input).ok_or(GameError::Rounds)?.min(MAX_ROUNDS);
        let mut solutions = Vec::with_capacity(rounds as usize);
        for round in 0..rounds {
            let start = read_u32(input).ok_or(GameError::Number)?;
            let (solution, steps) = self.round(round, start, console)?;
            let count = accesses();
            let ratio = count.checked_div(u64::from(steps)).unwrap_or(0);
            writeln!(console, "access {count} rounds {steps} access/rnd = {ratio}")?;
            output.write_all(&solution.to_ne_bytes()).map_err(|_| GameError::Reply)?;
            solutions.push(solution);
        }
        Ok(solutions)
    }

    /// Plays one round; returns the solution read back from memory and the
    /// number of Collatz steps actually taken.
    fn round(&self, round: u32, start: u32, console: &mut impl Write) -> Result<(u32, u32), GameError> {
        let region = self.region;
        let mem = &self.memory;
        let current = word(mem.input, round);
        let answer = word(mem.output, round);

        region.store_u32(current, start)?;
        for x in 0..self.history {
            region.store_u32(word(mem.pages, x), 0)?;
        }
        for (x, value) in self.table.iter().enumerate() {
            region.store_u32(word(mem.quicksolver, x as u32), *value)?;
        }

        let mut steps = 0u32;
        while region.load_u32(current)? != 1 {
            for x in (0..self.history - 1).rev() {
                let next = region.load_u32(word(mem.pages, x))?;
                region.store_u32(word(mem.pages, x + 1), next)?;
            }
            region.store_u32(word(mem.pages, 0), steps)?;

            let value = region.load_u32(current)?;
            if (value as usize) < QUICKSOLVER_ENTRIES {
                let remaining = region.load_u32(word(mem.quicksolver, value))?;
                writeln!(console, "detected quicksolver of {remaining:x}")?;
                let sofar = region.load_u32(answer)?;
                region.store_u32(answer, sofar.wrapping_add(remaining))?;
                break;
            }
            let next = if value % 2 == 1 { value.wrapping_mul(3).wrapping_add(1) } else { value >> 1 };
            region.store_u32(current, next)?;
            let sofar = region.load_u32(answer)?;
            region.store_u32(answer, sofar.wrapping_add(1))?;
            steps += 1;
        }
        Ok((region.load_u32(answer)?, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softmmu::{MmuConfig, SparsePhys, TranslatingRegion};

    fn rounds(values: &[u32]) -> Vec<u8> {
        let mut bytes = (values.len() as u32).to_ne_bytes().to_vec();
        for value in values {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        bytes
    }

    fn play(table: &[u32; QUICKSOLVER_ENTRIES], input: &[u8]) -> (Result<Vec<u32>, GameError>, Vec<u8>, String) {
        let ctx = MmuContext::new(SparsePhys::new(), MmuConfig::default());
        let memory = GameMemory::allocate(&ctx).unwrap();
        let region = TranslatingRegion::new(&ctx);
        let game = Collatz::new(&region, memory, table).with_history(4);
        let mut output = Vec::new();
        let mut console = Vec::new();
        let result = game.play(&mut &input[..], &mut output, &mut console, || ctx.accesses());
        (result, output, String::from_utf8(console).unwrap())
    }

    #[test]
    fn reference_table_gives_step_counts() {
        let (result, output, console) = play(&REFERENCE_QUICKSOLVER, &rounds(&[6, 200, 1]));
        assert_eq!(result.unwrap(), vec![8, 26, 0]);
        assert_eq!(output, [8u32.to_ne_bytes(), 26u32.to_ne_bytes(), 0u32.to_ne_bytes()].concat());
        assert!(console.starts_with("let me play my favorite game\n"));
        assert!(console.contains("detected quicksolver of 8\n"));
        assert!(console.contains("detected quicksolver of 19\n"));
        assert!(console.contains(" rounds 0 access/rnd = 0\n"));
    }

    #[test]
    fn blank_table_undercounts() {
        let (result, _, _) = play(&BLANK_QUICKSOLVER, &rounds(&[200]));
        // one real step (200 -> 100), then the table contributes nothing
        assert_eq!(result.unwrap(), vec![1]);
    }

    #[test]
    fn missing_input_is_reported() {
        let (result, _, _) = play(&REFERENCE_QUICKSOLVER, &[]);
        assert!(matches!(result, Err(GameError::Rounds)));
        let (result, output, _) = play(&REFERENCE_QUICKSOLVER, &2u32.to_ne_bytes());
        assert!(matches!(result, Err(GameError::Number)));
        assert!(output.is_empty());
    }

    #[test]
    fn arrays_are_laid_out_in_allocation_order() {
        let ctx = MmuContext::new(SparsePhys::new(), MmuConfig::default());
        let memory = GameMemory::allocate(&ctx).unwrap();
        assert_eq!(memory.output, memory.input + PAGE_SIZE);
        assert_eq!(memory.pages, memory.output + PAGE_SIZE);
        assert_eq!(memory.counts, memory.pages + 2 * PAGE_SIZE);
        assert_eq!(memory.quicksolver, memory.counts + PAGE_SIZE);
    }
}

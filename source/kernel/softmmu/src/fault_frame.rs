// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-thread stack of in-flight emulated accesses.

use crate::error::FatalError;

/// Nesting depth a single thread may reach.
pub const FAULT_FRAME_DEPTH: usize = 0x100;

/// One emulated access: the virtual page granted to the thread and the
/// backing page its contents came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultFrame {
    pub virt: u64,
    pub phys: u64,
}

/// Fixed-capacity LIFO of [`FaultFrame`]s.
#[derive(Clone, Debug)]
pub struct FaultFrameStack {
    frames: [FaultFrame; FAULT_FRAME_DEPTH],
    depth: usize,
}

impl FaultFrameStack {
    pub const fn new() -> Self {
        Self { frames: [FaultFrame { virt: 0, phys: 0 }; FAULT_FRAME_DEPTH], depth: 0 }
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn is_full(&self) -> bool {
        self.depth == FAULT_FRAME_DEPTH
    }

    /// Pushes `frame`. A full stack is left untouched.
    pub fn push(&mut self, frame: FaultFrame) -> Result<(), FatalError> {
        if self.is_full() {
            return Err(FatalError::FaultFrameOverflow);
        }
        self.frames[self.depth] = frame;
        self.depth += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<FaultFrame> {
        self.depth = self.depth.checked_sub(1)?;
        Some(self.frames[self.depth])
    }
}

impl Default for FaultFrameStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut stack = FaultFrameStack::new();
        stack.push(FaultFrame { virt: 1, phys: 2 }).unwrap();
        stack.push(FaultFrame { virt: 3, phys: 4 }).unwrap();
        assert_eq!(stack.pop(), Some(FaultFrame { virt: 3, phys: 4 }));
        assert_eq!(stack.pop(), Some(FaultFrame { virt: 1, phys: 2 }));
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn overflow_is_reported_before_any_write() {
        let mut stack = FaultFrameStack::new();
        for n in 0..FAULT_FRAME_DEPTH as u64 {
            stack.push(FaultFrame { virt: n, phys: n }).unwrap();
        }
        assert!(stack.is_full());
        assert!(matches!(stack.push(FaultFrame { virt: 999, phys: 999 }), Err(FatalError::FaultFrameOverflow)));
        assert_eq!(stack.depth(), FAULT_FRAME_DEPTH);
        let top = stack.pop().unwrap();
        assert_eq!(top.virt, FAULT_FRAME_DEPTH as u64 - 1);
    }
}

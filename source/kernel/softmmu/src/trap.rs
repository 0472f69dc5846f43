// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Soft protection: SIGSEGV/SIGTRAP round trip around every region access
//! OWNERS: @kernel-mm-team
//! PUBLIC API: TrapSink, register_sink(), install_handlers(), dispatch()
//! DEPENDS_ON: fault_frame, sys
//! INVARIANTS:
//!   - A thread is either `Normal` or `EmulatingAccess(depth)`; only a step
//!     trap (`resume`) leaves `EmulatingAccess`
//!   - The frame stack is checked for room before the sink is asked to emulate
//!   - Any other signal reaching the handler is fatal
//!
//! An access to a backed region page raises SIGSEGV (the page has no host
//! access). The handler lets the sink grant the intended protection with the
//! backing content copied in and arms the trap flag. The faulting instruction
//! re-executes, then SIGTRAP fires and the sink copies the page back and
//! revokes access again.

use core::cell::RefCell;
use core::ffi::{c_int, c_void};
use std::sync::OnceLock;

use log::trace;

use crate::error::{fatal, FatalError};
use crate::fault_frame::{FaultFrame, FaultFrameStack};
use crate::layout::page_base;
use crate::sys;

/// `si_code` of a SIGSEGV caused by a protection violation.
const SEGV_ACCERR: c_int = 2;

/// Receiver of the two trap kinds.
pub trait TrapSink: Sync {
    /// The address belongs to the emulated region.
    fn owns(&self, addr: u64) -> bool;
    /// Makes `page` accessible with its intended protection and current content.
    fn emulate_access(&self, page: u64) -> Result<FaultFrame, FatalError>;
    /// Writes the page back and revokes access again.
    fn retire_access(&self, frame: FaultFrame) -> Result<(), FatalError>;
}

/// What the handler observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapEvent {
    AccessViolation { addr: u64 },
    StepTrap,
    Other { signo: i32 },
}

/// How to leave the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SingleStep {
    Arm,
    Disarm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulationState {
    Normal,
    EmulatingAccess(usize),
}

/// Per-thread trap bookkeeping.
#[derive(Debug, Default)]
pub struct ThreadTrapState {
    frames: FaultFrameStack,
}

impl ThreadTrapState {
    pub const fn new() -> Self {
        Self { frames: FaultFrameStack::new() }
    }

    pub fn state(&self) -> EmulationState {
        match self.frames.depth() {
            0 => EmulationState::Normal,
            depth => EmulationState::EmulatingAccess(depth),
        }
    }

    fn enter(&mut self, frame: FaultFrame) -> Result<(), FatalError> {
        self.frames.push(frame)
    }

    /// Leaves the innermost emulated access.
    pub fn resume(&mut self) -> Result<FaultFrame, FatalError> {
        self.frames.pop().ok_or(FatalError::UnexpectedSignal { signo: libc::SIGTRAP })
    }
}

/// Drives one trap through the per-thread state machine.
pub fn dispatch(sink: &dyn TrapSink, state: &mut ThreadTrapState, event: TrapEvent) -> Result<SingleStep, FatalError> {
    match event {
        TrapEvent::AccessViolation { addr } if sink.owns(addr) => {
            if state.frames.is_full() {
                return Err(FatalError::FaultFrameOverflow);
            }
            let frame = sink.emulate_access(page_base(addr))?;
            state.enter(frame)?;
            trace!("trap: emulating {:#x} (depth {})", frame.virt, state.frames.depth());
            Ok(SingleStep::Arm)
        }
        TrapEvent::StepTrap if state.state() != EmulationState::Normal => {
            let frame = state.resume()?;
            sink.retire_access(frame)?;
            trace!("trap: retired {:#x}", frame.virt);
            Ok(SingleStep::Disarm)
        }
        TrapEvent::AccessViolation { .. } => Err(FatalError::UnexpectedSignal { signo: libc::SIGSEGV }),
        TrapEvent::StepTrap => Err(FatalError::UnexpectedSignal { signo: libc::SIGTRAP }),
        TrapEvent::Other { signo } => Err(FatalError::UnexpectedSignal { signo }),
    }
}

static SINK: OnceLock<&'static dyn TrapSink> = OnceLock::new();

thread_local! {
    static TRAP_STATE: RefCell<ThreadTrapState> = const { RefCell::new(ThreadTrapState::new()) };
}

/// Makes `sink` the receiver of every trap in the process. Only one sink may
/// ever be registered.
pub fn register_sink(sink: &'static dyn TrapSink) -> Result<(), FatalError> {
    SINK.set(sink).map_err(|_| FatalError::AlreadyInstalled)
}

/// Installs the SIGSEGV and SIGTRAP handlers.
pub fn install_handlers() -> Result<(), FatalError> {
    if !cfg!(target_arch = "x86_64") {
        return Err(FatalError::Unsupported);
    }
    sys::install_handler(libc::SIGSEGV, on_signal)?;
    sys::install_handler(libc::SIGTRAP, on_signal)
}

/// # Safety
///
/// `info` must be the siginfo the kernel passed to the handler.
unsafe fn classify(signo: c_int, info: *const libc::siginfo_t) -> TrapEvent {
    match signo {
        libc::SIGSEGV if (*info).si_code == SEGV_ACCERR => TrapEvent::AccessViolation { addr: (*info).si_addr() as u64 },
        libc::SIGTRAP => TrapEvent::StepTrap,
        _ => TrapEvent::Other { signo },
    }
}

extern "C" fn on_signal(signo: c_int, info: *mut libc::siginfo_t, uctx: *mut c_void) {
    // SAFETY: called by the kernel with a valid siginfo.
    let event = unsafe { classify(signo, info) };
    let Some(sink) = SINK.get().copied() else {
        fatal(&FatalError::UnexpectedSignal { signo });
    };
    let outcome = TRAP_STATE.with(|state| dispatch(sink, &mut state.borrow_mut(), event));
    // SAFETY: `uctx` is the ucontext the kernel passed to this handler.
    match outcome.and_then(|step| unsafe { set_single_step(uctx, step) }) {
        Ok(()) => {}
        Err(err) => fatal(&err),
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn set_single_step(uctx: *mut c_void, step: SingleStep) -> Result<(), FatalError> {
    const TRAP_FLAG: i64 = 0x100;
    let uctx = uctx.cast::<libc::ucontext_t>();
    let eflags = &mut (*uctx).uc_mcontext.gregs[libc::REG_EFL as usize];
    match step {
        SingleStep::Arm => *eflags |= TRAP_FLAG,
        SingleStep::Disarm => *eflags &= !TRAP_FLAG,
    }
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn set_single_step(_uctx: *mut c_void, _step: SingleStep) -> Result<(), FatalError> {
    Err(FatalError::Unsupported)
}

// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Error taxonomy of the soft-MMU
//! INVARIANTS: `MapError` is always recoverable; `FatalError` always ends the process

use std::io;

use thiserror::Error;

/// A request through the address-space API was malformed. The caller is told
/// and the process carries on.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MapError {
    /// Address is not page aligned.
    #[error("address is malformed")]
    Unaligned,
    /// Address falls in the protected head of the region.
    #[error("addr is in protected area")]
    Protected,
    /// Readable mapping requested inside the protected head without the internal marker.
    #[error("cannot allocate within readable zone")]
    ReadableZone,
    /// Address lies outside the emulated region.
    #[error("bad address.")]
    OutOfRange,
    /// Address was already registered.
    #[error("address is already allocated")]
    Duplicate,
    /// Address was never registered (or was unregistered).
    #[error("address is not present")]
    NotRegistered,
    /// The user mapping table is full.
    #[error("too many active allocations")]
    TooManyMappings,
    /// Protection value outside `0..=3`.
    #[error("invalid permissions")]
    InvalidProtection,
    /// Payload longer than a page.
    #[error("too long, sorry")]
    TooLong,
    /// Write payload is not a whole number of 8-byte words.
    #[error("data must be multiple of 8")]
    NotWordMultiple,
    /// Internal allocation size is not a non-zero page multiple.
    #[error("size must be multiple of page size and at least PAGE_SIZE")]
    BadAllocationSize,
}

/// The emulation's safety contract was broken or a pool ran dry. There is no
/// recovery; see [`fatal`].
#[derive(Debug, Error)]
pub enum FatalError {
    /// A walk reached an entry with the valid bit clear.
    #[error("invalid entry detected, aborting")]
    InvalidEntry {
        /// Virtual address being translated.
        va: u64,
        /// Level at which the walk stopped.
        level: u32,
    },
    /// An access hit a page whose intended protection is none.
    #[error("page is mapped PROT_NONE")]
    ProtectionNone {
        /// Faulting page.
        page: u64,
    },
    /// A store hit a page mapped without write permission.
    #[error("write to a page mapped without PROT_WRITE")]
    WriteProtected {
        /// Faulting page.
        page: u64,
    },
    /// A thread nested more protection faults than its frame stack holds.
    #[error("fault frame stack overflow")]
    FaultFrameOverflow,
    /// The kernel materialised less than a full page.
    #[error("kernel failed to copy the full page ({copied} bytes)")]
    ShortCopy {
        /// Bytes the kernel reported as copied.
        copied: i64,
    },
    /// A signal arrived that the soft-MMU does not own.
    #[error("unexpected signal.")]
    UnexpectedSignal {
        /// Signal number.
        signo: i32,
    },
    /// The fault channel delivered something other than a page fault.
    #[error("unexpected userfaultfd event {0:#x}")]
    UnexpectedEvent(u8),
    /// Address handed to the translator lies outside the region.
    #[error("address {0:#x} outside the emulated region")]
    OutOfRegion(u64),
    /// A table pointer or frame escaped the backing range.
    #[error("table base {0:#x} outside the physical range")]
    CorruptTable(u64),
    /// A cached translation violates the key/value range invariant.
    #[error("corrupt TLB entry at slot {slot:#x}")]
    CorruptTlbEntry {
        /// Slot index of the offending entry.
        slot: u16,
    },
    /// Physical frame pool exhausted.
    #[error("out of physical frames")]
    FramesExhausted,
    /// Translation-node pool exhausted.
    #[error("out of translation table nodes")]
    NodesExhausted,
    /// Internal allocation ran into the translation-node sub-range.
    #[error("internal allocation ran into the translation nodes at {0:#x}")]
    AllocationOverrun(u64),
    /// Internal allocation request itself was malformed.
    #[error("internal allocation rejected: {0}")]
    Allocation(MapError),
    /// The runtime was installed twice in one process.
    #[error("soft-MMU runtime already installed")]
    AlreadyInstalled,
    /// The host does not support the single-step machinery.
    #[error("single-step emulation is unsupported on this target")]
    Unsupported,
    /// A host call failed.
    #[error("{op} failed: {source}")]
    Os {
        /// Name of the failing call.
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl FatalError {
    /// Captures `errno` for the failed call `op`.
    pub fn last_os(op: &'static str) -> Self {
        Self::Os { op, source: io::Error::last_os_error() }
    }
}

/// Failure of an address-space operation.
#[derive(Debug, Error)]
pub enum AddressSpaceError {
    /// The request was rejected; nothing changed.
    #[error("{0}")]
    Rejected(#[from] MapError),
    /// The request tripped an invariant.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl AddressSpaceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Returns the rejection reason, if this was a rejection.
    pub fn rejection(&self) -> Option<MapError> {
        match self {
            Self::Rejected(err) => Some(*err),
            Self::Fatal(_) => None,
        }
    }

    /// Treats a rejection as fatal. Used where the soft-MMU itself made the
    /// request, so a rejection means its own bookkeeping is wrong.
    pub fn into_fatal(self) -> FatalError {
        match self {
            Self::Rejected(err) => FatalError::Allocation(err),
            Self::Fatal(err) => err,
        }
    }
}

/// Terminates the process after reporting `err`.
///
/// Every fatal path in the soft-MMU ends here, including the ones taken from
/// the signal handler and the pager threads.
pub fn fatal(err: &FatalError) -> ! {
    log::error!("softmmu: fatal: {err:?}");
    println!("[!] {err}");
    std::process::exit(1)
}

// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Demand paging of the emulated region
//! OWNERS: @kernel-mm-team
//! PUBLIC API: spawn_monitor(), resolve_missing(), PageInstaller
//! INVARIANTS:
//!   - Only missing-page faults arrive here; permission faults go to the trap handler
//!   - The monitor (and every worker it spawns) has SIGSEGV and SIGTRAP blocked
//!   - A materialised page is left with no host access

use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::context::{CachePolicy, MmuContext};
use crate::error::{fatal, FatalError};
use crate::layout::{page_base, PAGE_SIZE};
use crate::mm::{PhysMemory, Protection};
use crate::sys::{self, Uffd, UffdMsg, UFFD_EVENT_PAGEFAULT};

/// Host side of resolving one missing page.
pub trait PageInstaller {
    /// Revokes all host access to `page`.
    fn deny(&self, page: u64) -> Result<(), FatalError>;
    /// Materialises the page at `src` into `dst`; returns bytes copied.
    fn install(&self, dst: u64, src: u64) -> Result<i64, FatalError>;
}

impl PageInstaller for Uffd {
    fn deny(&self, page: u64) -> Result<(), FatalError> {
        sys::protect(page, PAGE_SIZE, Protection::NONE)
    }

    fn install(&self, dst: u64, src: u64) -> Result<i64, FatalError> {
        self.copy(dst, src, PAGE_SIZE)
    }
}

/// Handles one fault message: translate, deny, copy in.
pub fn resolve_missing<M: PhysMemory>(
    ctx: &MmuContext<M>,
    installer: &impl PageInstaller,
    msg: &UffdMsg,
) -> Result<(), FatalError> {
    if msg.event != UFFD_EVENT_PAGEFAULT {
        return Err(FatalError::UnexpectedEvent(msg.event));
    }
    let page = page_base(msg.address);
    let translation = ctx.translate(page, CachePolicy::Fill)?;
    debug!("pager: {page:#x} <- {:#x}", translation.phys);
    installer.deny(page)?;
    let copied = installer.install(page, translation.phys)?;
    if copied != PAGE_SIZE as i64 {
        return Err(FatalError::ShortCopy { copied });
    }
    Ok(())
}

/// Starts the monitor thread. Every message is handled on its own worker so
/// concurrent faults do not queue behind each other.
pub fn spawn_monitor<M: PhysMemory + 'static>(
    ctx: &'static MmuContext<M>,
    uffd: &'static Uffd,
) -> Result<JoinHandle<()>, FatalError> {
    thread::Builder::new()
        .name("softmmu-monitor".into())
        .spawn(move || {
            if let Err(err) = monitor(ctx, uffd) {
                error!("pager: this is an error, not part of the game, alert an admin");
                fatal(&err);
            }
        })
        .map_err(|source| FatalError::Os { op: "spawn monitor", source })
}

fn monitor<M: PhysMemory + 'static>(ctx: &'static MmuContext<M>, uffd: &'static Uffd) -> Result<(), FatalError> {
    sys::block_signals(&[libc::SIGSEGV, libc::SIGTRAP])?;
    loop {
        uffd.wait_readable()?;
        let msg = uffd.read_msg()?;
        thread::Builder::new()
            .name("softmmu-pager".into())
            .spawn(move || {
                if let Err(err) = resolve_missing(ctx, uffd, &msg) {
                    fatal(&err);
                }
            })
            .map_err(|source| FatalError::Os { op: "spawn pager", source })?;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::MmuConfig;
    use crate::layout::REGION_PROTECTED_END;
    use crate::mm::{InsertMode, SparsePhys};

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(&'static str, u64, u64)>>,
        copied: i64,
    }

    impl PageInstaller for Recorder {
        fn deny(&self, page: u64) -> Result<(), FatalError> {
            self.calls.borrow_mut().push(("deny", page, 0));
            Ok(())
        }

        fn install(&self, dst: u64, src: u64) -> Result<i64, FatalError> {
            self.calls.borrow_mut().push(("install", dst, src));
            Ok(self.copied)
        }
    }

    const VA: u64 = REGION_PROTECTED_END + 0x7000;

    fn mapped_context() -> MmuContext<SparsePhys> {
        let ctx = MmuContext::new(SparsePhys::new(), MmuConfig::default());
        ctx.insert(VA, Protection::READ_WRITE, InsertMode::Overwrite).unwrap();
        ctx
    }

    #[test]
    fn fault_denies_then_copies_translated_page() {
        let ctx = mapped_context();
        let recorder = Recorder { copied: PAGE_SIZE as i64, ..Recorder::default() };
        resolve_missing(&ctx, &recorder, &UffdMsg::page_fault(VA + 0x18)).unwrap();
        let phys = ctx.translate(VA, CachePolicy::Bypass).unwrap().phys;
        assert_eq!(*recorder.calls.borrow(), vec![("deny", VA, 0), ("install", VA, phys)]);
    }

    #[test]
    fn short_copy_is_fatal() {
        let ctx = mapped_context();
        let recorder = Recorder { copied: 12, ..Recorder::default() };
        let err = resolve_missing(&ctx, &recorder, &UffdMsg::page_fault(VA)).unwrap_err();
        assert!(matches!(err, FatalError::ShortCopy { copied: 12 }));
    }

    #[test]
    fn other_events_are_fatal_and_touch_nothing() {
        let ctx = mapped_context();
        let recorder = Recorder::default();
        let mut msg = UffdMsg::page_fault(VA);
        msg.event = 0x14;
        assert!(matches!(resolve_missing(&ctx, &recorder, &msg), Err(FatalError::UnexpectedEvent(0x14))));
        assert!(recorder.calls.borrow().is_empty());
    }

    #[test]
    fn fault_on_unmapped_page_is_fatal() {
        let ctx = mapped_context();
        let recorder = Recorder::default();
        let msg = UffdMsg::page_fault(VA + 0x10_0000);
        assert!(matches!(resolve_missing(&ctx, &recorder, &msg), Err(FatalError::InvalidEntry { .. })));
        assert!(recorder.calls.borrow().is_empty());
    }
}

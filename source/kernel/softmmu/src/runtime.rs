// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-wide installation of the soft-MMU
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Runtime::install(), Runtime::context(), Runtime::address_space(), LiveRegion
//! INVARIANTS: installed at most once; the region and backing range stay mapped until exit

use std::sync::OnceLock;

use log::info;

use crate::config::MmuConfig;
use crate::context::{CachePolicy, MmuContext};
use crate::error::FatalError;
use crate::fault_frame::FaultFrame;
use crate::layout::{in_region, page_base, PAGE_SIZE, PHYSICAL_BASE, PHYSICAL_END, REGION_BASE, REGION_END};
use crate::mm::{AddressSpace, MappedPhys, Protection, RegionAccess};
use crate::paging;
use crate::sys::{self, Uffd};
use crate::trap::{self, TrapSink};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The installed soft-MMU: shared context plus the fault channel.
pub struct Runtime {
    ctx: MmuContext<MappedPhys>,
    uffd: Uffd,
}

impl Runtime {
    /// Maps both ranges, wires up demand paging and the trap handlers, and
    /// returns the process-wide runtime.
    pub fn install(config: MmuConfig) -> Result<&'static Runtime, FatalError> {
        if RUNTIME.get().is_some() {
            return Err(FatalError::AlreadyInstalled);
        }
        let uffd = Uffd::open()?;
        sys::map_fixed(REGION_BASE, REGION_END - REGION_BASE)?;
        sys::map_fixed(PHYSICAL_BASE, PHYSICAL_END - PHYSICAL_BASE)?;
        uffd.register_missing(REGION_BASE, REGION_END - REGION_BASE)?;

        // SAFETY: the backing range was mapped read+write above and is never unmapped.
        let mem = unsafe { MappedPhys::new() };
        let runtime = Runtime { ctx: MmuContext::new(mem, config), uffd };
        RUNTIME.set(runtime).map_err(|_| FatalError::AlreadyInstalled)?;
        let runtime = RUNTIME.get().ok_or(FatalError::AlreadyInstalled)?;

        paging::spawn_monitor(&runtime.ctx, &runtime.uffd)?;
        sys::disable_huge_pages(REGION_BASE, REGION_END - REGION_BASE);
        sys::disable_huge_pages(PHYSICAL_BASE, PHYSICAL_END - PHYSICAL_BASE);
        trap::register_sink(runtime)?;
        trap::install_handlers()?;
        info!("softmmu: installed ({} levels, {:?})", config.levels.get(), config.semantics);
        Ok(runtime)
    }

    pub fn context(&self) -> &MmuContext<MappedPhys> {
        &self.ctx
    }

    /// A fresh user address space over the live region.
    pub fn address_space(&'static self) -> AddressSpace<'static, MappedPhys, LiveRegion> {
        AddressSpace::new(&self.ctx, LiveRegion::new())
    }

    /// Region accessor for code running on top of this runtime.
    pub fn region(&self) -> LiveRegion {
        LiveRegion::new()
    }
}

impl TrapSink for Runtime {
    fn owns(&self, addr: u64) -> bool {
        in_region(addr)
    }

    fn emulate_access(&self, page: u64) -> Result<FaultFrame, FatalError> {
        self.ctx.record_access();
        let translation = self.ctx.translate(page, CachePolicy::Fill)?;
        if translation.prot.access().is_empty() {
            return Err(FatalError::ProtectionNone { page });
        }
        sys::protect(page, PAGE_SIZE, Protection::READ_WRITE)?;
        // SAFETY: `page` was just made writable; the backing page lies in the mapped backing range.
        unsafe { sys::copy_page(translation.phys, page) };
        sys::protect(page, PAGE_SIZE, translation.prot)?;
        Ok(FaultFrame { virt: page, phys: translation.phys })
    }

    fn retire_access(&self, frame: FaultFrame) -> Result<(), FatalError> {
        // SAFETY: the page still carries the protection granted in `emulate_access`.
        unsafe { sys::copy_page(frame.virt, frame.phys) };
        sys::protect(frame.virt, PAGE_SIZE, Protection::NONE)
    }
}

/// Direct word access to the live region. Every access goes through the
/// host fault path and therefore through the soft-MMU.
#[derive(Debug)]
pub struct LiveRegion {
    _private: (),
}

impl LiveRegion {
    fn new() -> Self {
        Self { _private: () }
    }
}

impl RegionAccess for LiveRegion {
    fn load_u64(&self, va: u64) -> Result<u64, FatalError> {
        let va = checked(va)?;
        // SAFETY: `va` lies in the mapped region; faults are resolved by the runtime.
        Ok(unsafe { core::ptr::read_volatile(va as *const u64) })
    }

    fn store_u64(&self, va: u64, value: u64) -> Result<(), FatalError> {
        let va = checked(va)?;
        // SAFETY: see `load_u64`.
        unsafe { core::ptr::write_volatile(va as *mut u64, value) };
        Ok(())
    }

    fn load_u32(&self, va: u64) -> Result<u32, FatalError> {
        let va = checked(va)?;
        // SAFETY: see `load_u64`.
        Ok(unsafe { core::ptr::read_volatile(va as *const u32) })
    }

    fn store_u32(&self, va: u64, value: u32) -> Result<(), FatalError> {
        let va = checked(va)?;
        // SAFETY: see `load_u64`.
        unsafe { core::ptr::write_volatile(va as *mut u32, value) };
        Ok(())
    }
}

fn checked(va: u64) -> Result<u64, FatalError> {
    if in_region(va) && in_region(page_base(va) + PAGE_SIZE - 1) {
        Ok(va)
    } else {
        Err(FatalError::OutOfRegion(va))
    }
}

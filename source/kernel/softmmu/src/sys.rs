// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin wrappers over the host calls the soft-MMU needs: fixed anonymous
//! mappings, protection changes, userfaultfd and signal plumbing.
//!
//! Everything here returns [`FatalError::Os`] on failure; callers decide
//! nothing, they only propagate.

use core::ffi::{c_int, c_void};
use core::mem;
use core::ptr;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use log::{debug, warn};
use static_assertions::assert_eq_size;

use crate::error::FatalError;
use crate::layout::PAGE_SIZE;
use crate::mm::Protection;

const UFFD_USER_MODE_ONLY: c_int = 1;
const UFFD_API: u64 = 0xaa;
const UFFDIO_API: u64 = 0xc018_aa3f;
const UFFDIO_REGISTER: u64 = 0xc020_aa00;
const UFFDIO_COPY: u64 = 0xc028_aa03;
const UFFDIO_REGISTER_MODE_MISSING: u64 = 1;

/// `uffd_msg.event` of a page fault.
pub const UFFD_EVENT_PAGEFAULT: u8 = 0x12;

#[repr(C)]
struct UffdioApi {
    api: u64,
    features: u64,
    ioctls: u64,
}

#[repr(C)]
struct UffdioRegister {
    start: u64,
    len: u64,
    mode: u64,
    ioctls: u64,
}

#[repr(C)]
struct UffdioCopy {
    dst: u64,
    src: u64,
    len: u64,
    mode: u64,
    copy: i64,
}

/// One message read from a userfaultfd. Only the page-fault arm of the
/// kernel's union is decoded.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UffdMsg {
    pub event: u8,
    _reserved1: u8,
    _reserved2: u16,
    _reserved3: u32,
    pub flags: u64,
    pub address: u64,
    pub ptid: u32,
    _pad: u32,
}

assert_eq_size!(UffdioApi, [u8; 0x18]);
assert_eq_size!(UffdioRegister, [u8; 0x20]);
assert_eq_size!(UffdioCopy, [u8; 0x28]);
assert_eq_size!(UffdMsg, [u8; 32]);

impl UffdMsg {
    /// A page-fault message for `address`.
    pub fn page_fault(address: u64) -> Self {
        Self { event: UFFD_EVENT_PAGEFAULT, address, ..Self::default() }
    }
}

/// Owned userfaultfd descriptor.
#[derive(Debug)]
pub struct Uffd {
    fd: OwnedFd,
}

impl Uffd {
    /// Opens a descriptor restricted to user-mode faults when the kernel
    /// allows it, and negotiates the API.
    pub fn open() -> Result<Self, FatalError> {
        // SAFETY: plain syscall with integer flags.
        let mut raw = unsafe { libc::syscall(libc::SYS_userfaultfd, libc::O_CLOEXEC | UFFD_USER_MODE_ONLY) };
        if raw < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EINVAL) {
            warn!("userfaultfd: user-mode-only unsupported, falling back");
            // SAFETY: as above.
            raw = unsafe { libc::syscall(libc::SYS_userfaultfd, libc::O_CLOEXEC) };
        }
        if raw < 0 {
            return Err(FatalError::last_os("userfaultfd"));
        }
        // SAFETY: the kernel just handed us this descriptor and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw as c_int) };
        let mut api = UffdioApi { api: UFFD_API, features: 0, ioctls: 0 };
        // SAFETY: `api` is a live, correctly sized UFFDIO_API argument.
        if unsafe { libc::ioctl(fd.as_raw_fd(), UFFDIO_API as _, &mut api) } < 0 {
            return Err(FatalError::last_os("UFFDIO_API"));
        }
        debug!("userfaultfd: api {:#x} ioctls {:#x}", api.api, api.ioctls);
        Ok(Self { fd })
    }

    /// Reports missing-page faults in `[start, start + len)`.
    pub fn register_missing(&self, start: u64, len: u64) -> Result<(), FatalError> {
        let mut reg = UffdioRegister { start, len, mode: UFFDIO_REGISTER_MODE_MISSING, ioctls: 0 };
        // SAFETY: `reg` is a live, correctly sized UFFDIO_REGISTER argument.
        if unsafe { libc::ioctl(self.fd.as_raw_fd(), UFFDIO_REGISTER as _, &mut reg) } < 0 {
            return Err(FatalError::last_os("UFFDIO_REGISTER"));
        }
        Ok(())
    }

    /// Blocks until a message is ready.
    pub fn wait_readable(&self) -> Result<(), FatalError> {
        let mut pollfd = libc::pollfd { fd: self.fd.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        loop {
            // SAFETY: one valid pollfd.
            let ready = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if ready >= 0 {
                return Ok(());
            }
            if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                return Err(FatalError::last_os("poll"));
            }
        }
    }

    pub fn read_msg(&self) -> Result<UffdMsg, FatalError> {
        let mut msg = UffdMsg::default();
        // SAFETY: `msg` is plain old data of exactly one message.
        let read = unsafe {
            libc::read(self.fd.as_raw_fd(), (&mut msg as *mut UffdMsg).cast::<c_void>(), mem::size_of::<UffdMsg>())
        };
        if read < 0 {
            return Err(FatalError::last_os("read(userfaultfd)"));
        }
        if read as usize != mem::size_of::<UffdMsg>() {
            return Err(FatalError::Os {
                op: "read(userfaultfd)",
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
            });
        }
        Ok(msg)
    }

    /// Resolves a missing page by copying `len` bytes from `src` into `dst`.
    /// Returns what the kernel reports as copied.
    pub fn copy(&self, dst: u64, src: u64, len: u64) -> Result<i64, FatalError> {
        let mut copy = UffdioCopy { dst, src, len, mode: 0, copy: 0 };
        // SAFETY: `copy` is a live, correctly sized UFFDIO_COPY argument; `src`
        // lies in the backing range, which stays mapped.
        if unsafe { libc::ioctl(self.fd.as_raw_fd(), UFFDIO_COPY as _, &mut copy) } < 0 {
            return Err(FatalError::last_os("UFFDIO_COPY"));
        }
        Ok(copy.copy)
    }
}

/// Maps `[addr, addr + len)` read+write, private, anonymous and unreserved
/// at exactly `addr`, refusing to replace an existing mapping.
pub fn map_fixed(addr: u64, len: u64) -> Result<(), FatalError> {
    // SAFETY: MAP_FIXED_NOREPLACE never clobbers existing mappings.
    let ptr = unsafe {
        libc::mmap(
            addr as *mut c_void,
            len as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_FIXED_NOREPLACE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(FatalError::last_os("mmap"));
    }
    if ptr as u64 != addr {
        // Kernels without MAP_FIXED_NOREPLACE treat the address as a hint.
        // SAFETY: `ptr` is the mapping we just created.
        unsafe { libc::munmap(ptr, len as usize) };
        return Err(FatalError::Os { op: "mmap", source: io::Error::from(io::ErrorKind::AddrInUse) });
    }
    debug!("mapped {addr:#x}..{:#x}", addr + len);
    Ok(())
}

/// Changes the host protection of `[addr, addr + len)`.
pub fn protect(addr: u64, len: u64, prot: Protection) -> Result<(), FatalError> {
    // SAFETY: callers only pass page-aligned ranges inside the region.
    if unsafe { libc::mprotect(addr as *mut c_void, len as usize, prot.host_prot()) } < 0 {
        return Err(FatalError::last_os("mprotect"));
    }
    Ok(())
}

/// Asks the kernel not to back `[addr, addr + len)` with huge pages.
pub fn disable_huge_pages(addr: u64, len: u64) {
    // SAFETY: advisory only.
    if unsafe { libc::madvise(addr as *mut c_void, len as usize, libc::MADV_NOHUGEPAGE) } < 0 {
        warn!("madvise(NOHUGEPAGE) {addr:#x}: {}", io::Error::last_os_error());
    }
}

/// Copies one page from `src` to `dst`.
///
/// # Safety
///
/// Both pages must be mapped, `src` readable and `dst` writable, and they must
/// not overlap.
pub unsafe fn copy_page(src: u64, dst: u64) {
    ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_SIZE as usize);
}

/// Signature of an `SA_SIGINFO` handler.
pub type SigHandler = extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void);

/// Installs `handler` for `signo` with `SA_SIGINFO | SA_NODEFER`.
pub fn install_handler(signo: c_int, handler: SigHandler) -> Result<(), FatalError> {
    // SAFETY: zeroed sigaction is a valid starting point; every field we rely
    // on is set below.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER;
    // SAFETY: `action.sa_mask` is a valid sigset and `action` outlives the call.
    let rc = unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signo, &action, ptr::null_mut())
    };
    if rc < 0 {
        return Err(FatalError::last_os("sigaction"));
    }
    Ok(())
}

/// Blocks `signals` for the calling thread and every thread it spawns.
pub fn block_signals(signals: &[c_int]) -> Result<(), FatalError> {
    // SAFETY: `set` is initialised by sigemptyset before use.
    let rc = unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        for signo in signals {
            libc::sigaddset(&mut set, *signo);
        }
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut())
    };
    if rc != 0 {
        return Err(FatalError::Os { op: "pthread_sigmask", source: io::Error::from_raw_os_error(rc) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fault_message_layout() {
        let msg = UffdMsg::page_fault(0x1000_0004_2000);
        // SAFETY: UffdMsg is repr(C) plain data.
        let bytes: [u8; 32] = unsafe { mem::transmute(msg) };
        assert_eq!(bytes[0], UFFD_EVENT_PAGEFAULT);
        assert_eq!(u64::from_ne_bytes(bytes[16..24].try_into().unwrap()), 0x1000_0004_2000);
    }
}

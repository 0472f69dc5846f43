// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall allow-list for the thread that consumes untrusted input.
//!
//! Installed without `TSYNC`: threads that already exist (the soft-MMU
//! monitor and its pagers) keep their unfiltered view.

use core::ffi::c_long;

use log::info;
use softmmu::FatalError;

const AUDIT_ARCH_X86_64: u32 = 0xc000_003e;

const BPF_LD_W_ABS: u16 = 0x20;
const BPF_JEQ_K: u16 = 0x15;
const BPF_RET_K: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;

const OFFSET_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

/// Calls the input thread keeps once the filter is in place.
pub const ALLOWED: &[c_long] = &[
    libc::SYS_rt_sigreturn,
    libc::SYS_exit_group,
    libc::SYS_exit,
    libc::SYS_mprotect,
    libc::SYS_gettid,
    libc::SYS_read,
    libc::SYS_write,
    libc::SYS_futex,
    libc::SYS_sched_yield,
    libc::SYS_brk,
    libc::SYS_mmap,
    libc::SYS_munmap,
    libc::SYS_madvise,
    libc::SYS_sigaltstack,
    libc::SYS_rt_sigprocmask,
    libc::SYS_clock_gettime,
];

fn stmt(code: u16, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt: 0, jf: 0, k }
}

fn jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Builds the BPF program: check the architecture, allow `allowed`, kill
/// on anything else.
pub fn program(allowed: &[c_long]) -> Vec<libc::sock_filter> {
    let mut filter = vec![
        stmt(BPF_LD_W_ABS, OFFSET_ARCH),
        jump(BPF_JEQ_K, AUDIT_ARCH_X86_64, 1, 0),
        stmt(BPF_RET_K, SECCOMP_RET_KILL_PROCESS),
        stmt(BPF_LD_W_ABS, OFFSET_NR),
    ];
    for nr in allowed {
        filter.push(jump(BPF_JEQ_K, *nr as u32, 0, 1));
        filter.push(stmt(BPF_RET_K, SECCOMP_RET_ALLOW));
    }
    filter.push(stmt(BPF_RET_K, SECCOMP_RET_KILL_PROCESS));
    filter
}

/// Sets `no_new_privs` and installs the filter on the calling thread.
pub fn enforce() -> Result<(), FatalError> {
    if !cfg!(target_arch = "x86_64") {
        return Err(FatalError::Unsupported);
    }
    let filter = program(ALLOWED);
    let prog = libc::sock_fprog { len: filter.len() as u16, filter: filter.as_ptr() as *mut libc::sock_filter };
    // SAFETY: integer-only prctl.
    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
        return Err(FatalError::last_os("prctl(PR_SET_NO_NEW_PRIVS)"));
    }
    // SAFETY: `prog` points at `filter`, which outlives the call; the kernel copies it.
    if unsafe { libc::prctl(libc::PR_SET_SECCOMP, libc::SECCOMP_MODE_FILTER, &prog as *const libc::sock_fprog) } != 0 {
        return Err(FatalError::last_os("prctl(PR_SET_SECCOMP)"));
    }
    info!("sandbox: enforcing seccomp ({} calls allowed)", ALLOWED.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_checks_arch_then_each_call() {
        let filter = program(&[libc::SYS_read, libc::SYS_write]);
        assert_eq!(filter.len(), 4 + 2 * 2 + 1);
        assert_eq!(filter[1].k, AUDIT_ARCH_X86_64);
        assert_eq!(filter[4].k, libc::SYS_read as u32);
        assert_eq!((filter[4].jt, filter[4].jf), (0, 1));
        assert_eq!(filter[5].k, SECCOMP_RET_ALLOW);
        assert_eq!(filter.last().map(|f| f.k), Some(SECCOMP_RET_KILL_PROCESS));
    }

    #[test]
    fn allow_list_has_no_duplicates() {
        let mut calls = ALLOWED.to_vec();
        calls.sort_unstable();
        calls.dedup();
        assert_eq!(calls.len(), ALLOWED.len());
    }
}

//! Classic-BPF filter programs for the kernel syscall layers
//!
//! Layer A is a default-kill allowlist covering process termination,
//! memory management, stream sockets, and read-only name-resolution file
//! access. Layer B returns `SECCOMP_RET_TRAP` for the path-bearing
//! syscalls unless they were issued from the trampoline page, handing
//! their string arguments to the in-process interceptor. The layers are
//! stacked; the kernel runs both and applies the most severe action.

use super::{abi::*, intercept::PATH_SYSCALLS};
use crate::errors::SandboxError;
use std::{convert::TryInto, io, ops::Range};

pub const fn stmt(code: u16, k: u32) -> SockFilter {
    SockFilter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}

pub const fn load(k: u32) -> SockFilter {
    stmt(BPF_LD + BPF_W + BPF_ABS, k)
}

pub const fn ret(k: u32) -> SockFilter {
    stmt(BPF_RET + BPF_K, k)
}

/// Incremental builder for one filter program
pub struct ProgramBuffer {
    program: Vec<SockFilter>,
}

impl ProgramBuffer {
    pub fn new() -> Self {
        ProgramBuffer {
            program: Vec::new(),
        }
    }

    pub fn inst(&mut self, instruction: SockFilter) {
        self.program.push(instruction);
    }

    pub fn block(&mut self, block: &[SockFilter]) {
        for instruction in block {
            self.inst(*instruction);
        }
    }

    /// Run `block` only when the accumulator equals `k`. Every path
    /// through the block must end in a return; fall-through would leave
    /// the accumulator in an unexpected state for later comparisons.
    pub fn if_eq(&mut self, k: u32, block: &[SockFilter]) {
        let offset: u8 = block
            .len()
            .try_into()
            .expect("conditional block exceeding jump range");
        self.inst(jump(BPF_JMP + BPF_JEQ + BPF_K, k, 0, offset));
        self.block(block);
    }

    pub fn instructions(&self) -> &[SockFilter] {
        &self.program
    }

    fn install(self) -> Result<(), SandboxError> {
        if self.program.len() > BPF_MAXINSNS {
            return Err(SandboxError::FilterTooLarge);
        }
        let len: u16 = self
            .program
            .len()
            .try_into()
            .map_err(|_| SandboxError::FilterTooLarge)?;
        let prog = SockFilterProg {
            len,
            filter: self.program.as_ptr(),
        };
        let result = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                SECCOMP_MODE_FILTER,
                &prog as *const SockFilterProg as libc::c_ulong,
            )
        };
        if result != 0 {
            return Err(SandboxError::FilterInstall(io::Error::last_os_error()));
        }
        Ok(())
    }
}

// Syscalls allowed without argument inspection: termination and memory
// management, stream sockets and the calls issued during name resolution.
#[cfg(target_arch = "x86_64")]
const PLAIN_ALLOWED: &[u32] = &[
    libc::SYS_brk as u32,
    libc::SYS_exit_group as u32,
    libc::SYS_mmap as u32,
    libc::SYS_munmap as u32,
    libc::SYS_mprotect as u32,
    libc::SYS_lseek as u32,
    libc::SYS_futex as u32,
    libc::SYS_uname as u32,
    // the SIGSYS interceptor cannot return without this one
    libc::SYS_rt_sigreturn as u32,
    libc::SYS_socket as u32,
    libc::SYS_setsockopt as u32,
    libc::SYS_connect as u32,
    libc::SYS_select as u32,
    libc::SYS_poll as u32,
    libc::SYS_read as u32,
    libc::SYS_recvfrom as u32,
    libc::SYS_write as u32,
    libc::SYS_sendto as u32,
    libc::SYS_sendmsg as u32,
    libc::SYS_close as u32,
    libc::SYS_stat as u32,
    libc::SYS_lstat as u32,
    libc::SYS_fstat as u32,
];

// aarch64 has no legacy open/stat/poll/select family; the equivalents
// take their place.
#[cfg(target_arch = "aarch64")]
const PLAIN_ALLOWED: &[u32] = &[
    libc::SYS_brk as u32,
    libc::SYS_exit_group as u32,
    libc::SYS_mmap as u32,
    libc::SYS_munmap as u32,
    libc::SYS_mprotect as u32,
    libc::SYS_lseek as u32,
    libc::SYS_futex as u32,
    libc::SYS_uname as u32,
    // the SIGSYS interceptor cannot return without this one
    libc::SYS_rt_sigreturn as u32,
    libc::SYS_socket as u32,
    libc::SYS_setsockopt as u32,
    libc::SYS_connect as u32,
    libc::SYS_pselect6 as u32,
    libc::SYS_ppoll as u32,
    libc::SYS_read as u32,
    libc::SYS_recvfrom as u32,
    libc::SYS_write as u32,
    libc::SYS_sendto as u32,
    libc::SYS_sendmsg as u32,
    libc::SYS_close as u32,
    libc::SYS_newfstatat as u32,
    libc::SYS_fstat as u32,
];

fn flags_readonly_block(flags_arg: usize) -> [SockFilter; 5] {
    [
        load(seccomp_data_arg_lo(flags_arg)),
        stmt(BPF_ALU + BPF_AND + BPF_K, libc::O_ACCMODE as u32),
        jump(BPF_JMP + BPF_JEQ + BPF_K, libc::O_RDONLY as u32, 0, 1),
        ret(SECCOMP_RET_ALLOW),
        ret(SECCOMP_RET_KILL_PROCESS),
    ]
}

/// Layer A: the fixed syscall allowlist, default kill
pub fn allowlist_program() -> ProgramBuffer {
    let mut p = ProgramBuffer::new();

    // A filter compiled for one architecture must never run on another
    p.inst(load(SECCOMP_DATA_ARCH));
    p.inst(jump(BPF_JMP + BPF_JEQ + BPF_K, AUDIT_ARCH_CURRENT, 1, 0));
    p.inst(ret(SECCOMP_RET_KILL_PROCESS));

    p.inst(load(SECCOMP_DATA_NR));
    for nr in PLAIN_ALLOWED {
        p.if_eq(*nr, &[ret(SECCOMP_RET_ALLOW)]);
    }

    // ioctl is limited to the byte-count query
    p.if_eq(
        libc::SYS_ioctl as u32,
        &[
            load(seccomp_data_arg_lo(1)),
            jump(BPF_JMP + BPF_JEQ + BPF_K, libc::FIONREAD as u32, 0, 1),
            ret(SECCOMP_RET_ALLOW),
            ret(SECCOMP_RET_KILL_PROCESS),
        ],
    );

    // open and openat only with a read-only access mode
    #[cfg(target_arch = "x86_64")]
    p.if_eq(libc::SYS_open as u32, &flags_readonly_block(1));
    p.if_eq(libc::SYS_openat as u32, &flags_readonly_block(2));

    p.inst(ret(SECCOMP_RET_KILL_PROCESS));
    p
}

/// Layer B: trap path-bearing syscalls to the SIGSYS interceptor unless
/// the instruction pointer lies inside the trampoline page
pub fn intercept_program(exempt: &Range<usize>) -> ProgramBuffer {
    let mut p = ProgramBuffer::new();

    p.inst(load(SECCOMP_DATA_ARCH));
    p.inst(jump(BPF_JMP + BPF_JEQ + BPF_K, AUDIT_ARCH_CURRENT, 1, 0));
    p.inst(ret(SECCOMP_RET_KILL_PROCESS));

    p.inst(load(SECCOMP_DATA_NR));
    let ip_check = ip_check_block(exempt);
    for (nr, _path_arg) in PATH_SYSCALLS {
        p.if_eq(*nr, &ip_check);
    }
    p.inst(ret(SECCOMP_RET_ALLOW));
    p
}

// Allow when the 64-bit instruction pointer falls in [start, end), trap
// otherwise. The exempt range is one page, so it never straddles a
// 4 GiB boundary and the high words of start and end-1 are equal.
fn ip_check_block(exempt: &Range<usize>) -> Vec<SockFilter> {
    let start = exempt.start as u64;
    let end = exempt.end as u64;
    let hi = (start >> 32) as u32;
    let lo = start as u32;
    let end_lo = end as u32;

    if end_lo != 0 {
        vec![
            load(SECCOMP_DATA_IP_HI),
            jump(BPF_JMP + BPF_JEQ + BPF_K, hi, 0, 4),
            load(SECCOMP_DATA_IP_LO),
            jump(BPF_JMP + BPF_JGE + BPF_K, lo, 0, 2),
            jump(BPF_JMP + BPF_JGE + BPF_K, end_lo, 1, 0),
            ret(SECCOMP_RET_ALLOW),
            ret(SECCOMP_RET_TRAP),
        ]
    } else {
        // end wrapped to a 4 GiB boundary: the low-word range is open
        vec![
            load(SECCOMP_DATA_IP_HI),
            jump(BPF_JMP + BPF_JEQ + BPF_K, hi, 0, 3),
            load(SECCOMP_DATA_IP_LO),
            jump(BPF_JMP + BPF_JGE + BPF_K, lo, 0, 1),
            ret(SECCOMP_RET_ALLOW),
            ret(SECCOMP_RET_TRAP),
        ]
    }
}

/// Load both layers, in trap-then-allowlist order, after opting out of
/// privilege elevation. There is no way to unload a filter.
pub(crate) fn install(exempt: Range<usize>) -> Result<(), SandboxError> {
    let result = unsafe {
        libc::prctl(
            libc::PR_SET_NO_NEW_PRIVS,
            1 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if result != 0 {
        return Err(SandboxError::FilterInstall(io::Error::last_os_error()));
    }
    intercept_program(&exempt).install()?;
    allowlist_program().install()
}

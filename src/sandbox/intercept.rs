//! SIGSYS handler that validates path arguments before letting the
//! original syscall through
//!
//! Seccomp cannot dereference pointer arguments, so the kernel layer
//! traps the path-bearing syscalls back into the process. The handler
//! compares the path against the expanded allowlist by exact string
//! equality: on a match the call is re-issued through the trampoline
//! page, otherwise it returns `-EPERM` without entering the kernel.

use super::{
    abi::{SigSysInfo, SYS_SECCOMP},
    allowlist, trampoline,
};
use crate::errors::SandboxError;
use std::{
    ffi::CStr,
    io,
    os::raw::{c_char, c_int, c_void},
    ptr,
};

/// Path-bearing syscalls and the argument slot holding the path
#[cfg(target_arch = "x86_64")]
pub(crate) const PATH_SYSCALLS: &[(u32, usize)] = &[
    (libc::SYS_open as u32, 0),
    (libc::SYS_stat as u32, 0),
    (libc::SYS_lstat as u32, 0),
    (libc::SYS_openat as u32, 1),
];

#[cfg(target_arch = "aarch64")]
pub(crate) const PATH_SYSCALLS: &[(u32, usize)] = &[
    (libc::SYS_openat as u32, 1),
    (libc::SYS_newfstatat as u32, 1),
];

pub(crate) fn install_handler() -> Result<(), SandboxError> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = on_sigsys as usize;
    action.sa_flags = libc::SA_SIGINFO;
    let result = unsafe { libc::sigaction(libc::SIGSYS, &action, ptr::null_mut()) };
    if result != 0 {
        return Err(SandboxError::HandlerInstall(io::Error::last_os_error()));
    }
    Ok(())
}

extern "C" fn on_sigsys(_signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    unsafe {
        let info = &*(info as *const SigSysInfo);
        if info.si_code != SYS_SECCOMP {
            return;
        }

        let nr = info.syscall as u32;
        let args = syscall_args(context);
        let path_arg = match PATH_SYSCALLS.iter().find(|(trapped, _)| *trapped == nr) {
            Some((_, slot)) => args[*slot],
            None => {
                set_result(context, -(libc::ENOSYS as i64));
                return;
            }
        };
        if path_arg == 0 {
            set_result(context, -(libc::EFAULT as i64));
            return;
        }

        let path = CStr::from_ptr(path_arg as *const c_char);
        let result = if allowlist::is_allowed(path) {
            trampoline::syscall6(nr as u64, args)
        } else {
            -(libc::EPERM as i64)
        };
        set_result(context, result);
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn syscall_args(context: *mut c_void) -> [u64; 6] {
    let ucontext = &*(context as *const libc::ucontext_t);
    let gregs = &ucontext.uc_mcontext.gregs;
    [
        gregs[libc::REG_RDI as usize] as u64,
        gregs[libc::REG_RSI as usize] as u64,
        gregs[libc::REG_RDX as usize] as u64,
        gregs[libc::REG_R10 as usize] as u64,
        gregs[libc::REG_R8 as usize] as u64,
        gregs[libc::REG_R9 as usize] as u64,
    ]
}

#[cfg(target_arch = "x86_64")]
unsafe fn set_result(context: *mut c_void, value: i64) {
    let ucontext = &mut *(context as *mut libc::ucontext_t);
    ucontext.uc_mcontext.gregs[libc::REG_RAX as usize] = value;
}

#[cfg(target_arch = "aarch64")]
unsafe fn syscall_args(context: *mut c_void) -> [u64; 6] {
    let ucontext = &*(context as *const libc::ucontext_t);
    let regs = &ucontext.uc_mcontext.regs;
    [regs[0], regs[1], regs[2], regs[3], regs[4], regs[5]]
}

#[cfg(target_arch = "aarch64")]
unsafe fn set_result(context: *mut c_void, value: i64) {
    let ucontext = &mut *(context as *mut libc::ucontext_t);
    ucontext.uc_mcontext.regs[0] = value as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{abi::*, filter};

    #[test]
    fn trapped_syscalls_are_also_in_the_kernel_allowlist() {
        // Every trapped syscall must be admitted by layer A, otherwise a
        // validated re-issue from the trampoline would be killed instead
        // of dispatched
        let program = filter::allowlist_program();
        for (nr, _path_arg) in PATH_SYSCALLS {
            let admitted = program
                .instructions()
                .iter()
                .any(|inst| inst.code == BPF_JMP + BPF_JEQ + BPF_K && inst.k == *nr);
            assert!(admitted, "syscall {} missing from the allowlist", nr);
        }
    }
}

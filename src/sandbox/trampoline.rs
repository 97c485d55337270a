//! Executable stub page for re-issuing validated syscalls
//!
//! The interceptor's kernel filter exempts instruction pointers inside
//! this page, so a syscall re-issued from here reaches the kernel while
//! the same syscall from anywhere else traps back to the SIGSYS handler.
//! The page is mapped writable, stamped with the stub, then flipped to
//! read+execute before the filters are loaded.

use crate::errors::SandboxError;
use std::{
    io, mem,
    ops::Range,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

lazy_static! {
    static ref PAGE_SIZE: usize = determine_page_size();
}

fn determine_page_size() -> usize {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
    assert_eq!(page_size & (page_size - 1), 0);
    page_size
}

// extern "C" fn(nr, a0..a5) -> raw kernel result; the seventh argument
// arrives on the stack in the SysV ABI
#[cfg(target_arch = "x86_64")]
const STUB: &[u8] = &[
    0x48, 0x89, 0xf8, // mov rax, rdi  (syscall number)
    0x48, 0x89, 0xf7, // mov rdi, rsi
    0x48, 0x89, 0xd6, // mov rsi, rdx
    0x48, 0x89, 0xca, // mov rdx, rcx
    0x4d, 0x89, 0xc2, // mov r10, r8
    0x4d, 0x89, 0xc8, // mov r8, r9
    0x4c, 0x8b, 0x4c, 0x24, 0x08, // mov r9, [rsp+8]
    0x0f, 0x05, // syscall
    0xc3, // ret
];

#[cfg(target_arch = "aarch64")]
const STUB: &[u8] = &[
    0xe8, 0x03, 0x00, 0xaa, // mov x8, x0  (syscall number)
    0xe0, 0x03, 0x01, 0xaa, // mov x0, x1
    0xe1, 0x03, 0x02, 0xaa, // mov x1, x2
    0xe2, 0x03, 0x03, 0xaa, // mov x2, x3
    0xe3, 0x03, 0x04, 0xaa, // mov x3, x4
    0xe4, 0x03, 0x05, 0xaa, // mov x4, x5
    0xe5, 0x03, 0x06, 0xaa, // mov x5, x6
    0x01, 0x00, 0x00, 0xd4, // svc #0
    0xc0, 0x03, 0x5f, 0xd6, // ret
];

static PAGE: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init() -> Result<(), SandboxError> {
    if PAGE.load(Ordering::SeqCst) != 0 {
        return Ok(());
    }
    let size = *PAGE_SIZE;
    let page = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if page == libc::MAP_FAILED {
        return Err(SandboxError::TrampolineMap(io::Error::last_os_error()));
    }
    unsafe {
        ptr::copy_nonoverlapping(STUB.as_ptr(), page as *mut u8, STUB.len());
        if libc::mprotect(page, size, libc::PROT_READ | libc::PROT_EXEC) != 0 {
            let err = io::Error::last_os_error();
            libc::munmap(page, size);
            return Err(SandboxError::TrampolineMap(err));
        }
    }
    PAGE.store(page as usize, Ordering::SeqCst);
    Ok(())
}

/// Instruction-pointer range the kernel filter exempts
pub(crate) fn range() -> Range<usize> {
    let page = PAGE.load(Ordering::SeqCst);
    page..page + *PAGE_SIZE
}

/// Re-issue a syscall from inside the exempted page.
///
/// Returns the raw kernel result: a negative errno value on failure.
/// Only meaningful after [init]; the caller (the SIGSYS handler) runs
/// strictly after sandbox installation.
pub(crate) unsafe fn syscall6(nr: u64, args: [u64; 6]) -> i64 {
    let stub: extern "C" fn(u64, u64, u64, u64, u64, u64, u64) -> i64 =
        mem::transmute(PAGE.load(Ordering::SeqCst));
    stub(nr, args[0], args[1], args[2], args[3], args[4], args[5])
}

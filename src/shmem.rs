//! Anonymous shared memory for handing UDF output across `fork()`
//!
//! The region is the sole channel between the UDF child and the parent:
//! single writer (the child), then a single reader (the parent) after
//! `waitpid` provides the synchronization point.

use std::{io, ops::Deref, ptr, slice};

/// A `MAP_SHARED | MAP_ANONYMOUS` mapping, read+write on both sides of a
/// `fork()`, unmapped on drop
#[derive(Debug)]
pub struct SharedRegion {
    ptr: *mut u8,
    len: usize,
}

impl SharedRegion {
    /// Allocate `len` bytes of zero-filled fork-shared memory
    pub fn new(len: usize) -> Result<SharedRegion, io::Error> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(SharedRegion {
            ptr: ptr as *mut u8,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Deref for SharedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

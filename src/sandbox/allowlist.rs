//! Sandbox policy: the absolute paths a UDF may touch
//!
//! Entries containing `*` are expanded through the filesystem once, at
//! sandbox init. Afterwards path comparison is exact string equality:
//! no prefix matching and no symlink interpretation.

use std::{
    ffi::{CStr, CString},
    os::unix::ffi::OsStrExt,
    path::Path,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

/// The host's resolver configuration, allowed by default so a UDF can
/// look up the names of the servers it fetches data from
const DEFAULT_ALLOWED: &[&str] = &["/etc/resolv.conf"];

/// Which files a UDF child is permitted to open or stat
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    patterns: Vec<String>,
}

impl SandboxPolicy {
    /// The policy for a UDF attached to the given host container file.
    ///
    /// Per-file trust lookups hang off this constructor; for now every
    /// host file maps to the default allowlist.
    pub fn for_file(host_file: &Path) -> Self {
        log::debug!("sandbox policy lookup for {:?}", host_file);
        SandboxPolicy::default()
    }

    /// Permit one more absolute path, or a shell-style glob of paths
    pub fn allow(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Expand glob entries into the flat list used for exact matching
    pub(crate) fn expand(&self) -> Vec<CString> {
        let mut files = Vec::new();
        for pattern in &self.patterns {
            if !pattern.contains('*') {
                if let Ok(entry) = CString::new(pattern.as_bytes()) {
                    files.push(entry);
                }
                continue;
            }
            let matches = match glob::glob(pattern) {
                Ok(matches) => matches,
                Err(err) => {
                    log::warn!("ignoring allowlist pattern {:?}: {}", pattern, err);
                    continue;
                }
            };
            for path in matches.filter_map(Result::ok) {
                if let Ok(entry) = CString::new(path.as_os_str().as_bytes()) {
                    files.push(entry);
                }
            }
        }
        files
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        SandboxPolicy {
            patterns: DEFAULT_ALLOWED.iter().map(|entry| entry.to_string()).collect(),
        }
    }
}

// Published once, before lockdown, then only ever read again from the
// SIGSYS handler. An AtomicPtr keeps the reader lock-free; the list is
// intentionally never reclaimed, it lives as long as the sandbox does.
static EXPANDED: AtomicPtr<Vec<CString>> = AtomicPtr::new(ptr::null_mut());

pub(crate) fn publish(policy: &SandboxPolicy) {
    let expanded = Box::into_raw(Box::new(policy.expand()));
    EXPANDED.swap(expanded, Ordering::SeqCst);
}

/// Exact-match test against the published allowlist. Async-signal-safe:
/// no locks, no allocation.
pub(crate) fn is_allowed(path: &CStr) -> bool {
    let expanded = EXPANDED.load(Ordering::SeqCst);
    if expanded.is_null() {
        return false;
    }
    matches(unsafe { &*expanded }, path)
}

fn matches(entries: &[CString], path: &CStr) -> bool {
    entries.iter().any(|entry| entry.as_c_str() == path)
}

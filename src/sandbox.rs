//! Two-layer confinement for UDF child processes
//!
//! Layer A is a kernel seccomp allowlist with a default-kill action.
//! Layer B is an in-process interceptor that checks the string arguments
//! the kernel filter cannot see: path-bearing syscalls trap to a SIGSYS
//! handler, which matches the path against a glob-expanded allowlist and
//! either re-issues the call through an exempted trampoline page or fails
//! it with EPERM. Neither layer subsumes the other.

mod abi;
mod allowlist;
mod filter;
mod intercept;
mod trampoline;

pub use self::allowlist::SandboxPolicy;

use crate::errors::SandboxError;
use std::sync::atomic::{AtomicBool, Ordering};

static INSTALLED: AtomicBool = AtomicBool::new(false);

pub struct Sandbox;

impl Sandbox {
    /// Install both confinement layers in the calling process.
    ///
    /// Idempotent: the first successful install wins. Must run in the
    /// UDF child after the runtime tables are populated and before the
    /// entry point is called; there is no way back once the filters are
    /// loaded. Any failure is a fatal pre-run error for the child.
    pub fn init(policy: &SandboxPolicy) -> Result<(), SandboxError> {
        if INSTALLED.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Everything that needs the filesystem or fresh mappings has to
        // happen before lockdown: glob expansion walks directories and
        // the trampoline needs an executable mapping.
        allowlist::publish(policy);
        trampoline::init()?;
        intercept::install_handler()?;
        filter::install(trampoline::range())?;
        INSTALLED.store(true, Ordering::SeqCst);
        Ok(())
    }
}

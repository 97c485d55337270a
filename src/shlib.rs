//! Loading compiled UDF artifacts and resolving their exported symbols

use libloading::os::unix::{Library, Symbol, RTLD_GLOBAL, RTLD_NOW};
use std::path::Path;

/// An open UDF shared object.
///
/// The library is loaded with `RTLD_NOW | RTLD_GLOBAL` so that the
/// runtime tables declared by the template are visible to the UDF's own
/// relocations. Closed (dlclose) on drop; the executor's child never
/// drops it, leaving teardown to `_exit`.
pub struct SharedLibrary {
    library: Library,
}

impl SharedLibrary {
    pub fn open(path: &Path) -> Result<SharedLibrary, libloading::Error> {
        let library = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }?;
        Ok(SharedLibrary { library })
    }

    /// Resolve a nullary entry point, `None` when the symbol is missing
    pub fn entry(&self, name: &str) -> Option<unsafe extern "C" fn()> {
        let symbol: Symbol<unsafe extern "C" fn()> =
            unsafe { self.library.get(name.as_bytes()) }.ok()?;
        Some(*symbol)
    }

    /// Resolve a data symbol as a raw pointer to its first element,
    /// `None` when the symbol is missing.
    ///
    /// The returned pointer is only valid while this library stays open.
    pub fn data_ptr<T>(&self, name: &str) -> Option<*mut T> {
        let symbol: Symbol<*mut T> = unsafe { self.library.get(name.as_bytes()) }.ok()?;
        Some(*symbol)
    }
}

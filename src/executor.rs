//! Run-time orchestration of one UDF invocation
//!
//! decompress → materialize the shared object → map a shared region →
//! fork → (child) load symbols, populate the runtime tables, confine,
//! call the entry point → (parent) wait, copy the region into the
//! caller's buffer, clean up. The child is disposable: a crash or
//! sandbox kill leaves the parent free to copy whatever reached the
//! shared region, which starts out zero-filled.

use crate::{
    backend::CppBackend,
    codec,
    dataset::DatasetInfo,
    errors::ExecError,
    shlib::SharedLibrary,
    shmem::SharedRegion,
};
use std::{
    ffi::CString,
    io, iter,
    os::raw::{c_char, c_void},
    path::Path,
    ptr,
};

// Capacities of the fixed runtime tables in the template
const MAX_DATASETS: usize = 64;
const MAX_RANK: usize = 8;

const ENTRY_SYMBOL: &str = "udf_entry";
const DATA_TABLE: &str = "udf_data";
const NAMES_TABLE: &str = "udf_names";
const TYPES_TABLE: &str = "udf_types";
const DIMS_TABLE: &str = "udf_dims";

/// Execute the UDF embedded in `blob`, filling the output dataset's
/// buffer with the synthesized grid.
///
/// `filterpath` identifies the host container file for sandbox policy
/// lookups. `output_cast` is the host driver's post-hoc reinterpretation
/// hint; it is accepted and logged but takes no part in execution.
///
/// Returns false only on parent-side failures, with the output buffer
/// unmodified. A child that crashes or is killed by the sandbox still
/// counts as success: the caller receives the zero-filled (or partial)
/// contents of the shared region, and the child's fate is logged.
pub fn run(
    filterpath: &Path,
    input_datasets: &[DatasetInfo],
    output_dataset: &DatasetInfo,
    output_cast: Option<&str>,
    blob: &[u8],
) -> bool {
    if let Some(cast) = output_cast {
        log::debug!("output cast datatype {:?} requested", cast);
    }
    match run_inner(filterpath, input_datasets, output_dataset, blob) {
        Ok(()) => true,
        Err(err) => {
            log::error!("UDF execution failed: {}", err);
            false
        }
    }
}

fn run_inner(
    filterpath: &Path,
    input_datasets: &[DatasetInfo],
    output_dataset: &DatasetInfo,
    blob: &[u8],
) -> Result<(), ExecError> {
    if output_dataset.data().is_null() {
        return Err(ExecError::NoOutputBuffer);
    }

    let shared_object = codec::decompress(blob)?;

    // The loader needs a real file on disk; mode 0755 so it can be mapped
    // for execution
    let so_file = CppBackend.write_to_disk(&shared_object)?;

    let room = output_dataset.room();
    let region = SharedRegion::new(room).map_err(ExecError::Map)?;

    match unsafe { libc::fork() } {
        -1 => Err(ExecError::Fork(io::Error::last_os_error())),
        0 => {
            // Child. _exit skips at-exit handlers inherited from the
            // parent, so process-global resources are neither flushed
            // nor double-freed on this side of the fork.
            let code =
                child_main(so_file.path(), input_datasets, output_dataset, &region, filterpath);
            unsafe { libc::_exit(code) }
        }
        child => {
            let status = wait_for(child);
            describe_exit(status);
            unsafe {
                ptr::copy_nonoverlapping(region.as_ptr(), output_dataset.data(), room);
            }
            Ok(())
        }
    }
}

fn wait_for(child: libc::pid_t) -> libc::c_int {
    let mut status = 0;
    loop {
        let waited = unsafe { libc::waitpid(child, &mut status, 0) };
        if waited == child {
            return status;
        }
        if waited == -1 && io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            log::warn!("waitpid failed: {}", io::Error::last_os_error());
            return status;
        }
    }
}

// The child's fate is diagnostic only; a dead UDF yields a zero-filled
// output rather than a host-visible error
fn describe_exit(status: libc::c_int) {
    if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => log::debug!("UDF child completed"),
            code => log::warn!("UDF child exited with code {}", code),
        }
    } else if libc::WIFSIGNALED(status) {
        log::warn!("UDF child killed by signal {}", libc::WTERMSIG(status));
    }
}

fn child_main(
    so_file: &Path,
    input_datasets: &[DatasetInfo],
    output_dataset: &DatasetInfo,
    region: &SharedRegion,
    filterpath: &Path,
) -> i32 {
    let shlib = match SharedLibrary::open(so_file) {
        Ok(shlib) => shlib,
        Err(err) => {
            eprintln!("udfbox: {}", err);
            return 1;
        }
    };

    let entry = shlib.entry(ENTRY_SYMBOL);
    let data_table = shlib.data_ptr::<*mut c_void>(DATA_TABLE);
    let names_table = shlib.data_ptr::<*const c_char>(NAMES_TABLE);
    let types_table = shlib.data_ptr::<*const c_char>(TYPES_TABLE);
    let dims_table = shlib.data_ptr::<u64>(DIMS_TABLE);
    let (entry, data_table, names_table, types_table, dims_table) =
        match (entry, data_table, names_table, types_table, dims_table) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => {
                eprintln!("udfbox: artifact is missing required symbols");
                return 1;
            }
        };

    // The UDF writes through index 0 into the shared region; the parent
    // copies it into the real output buffer after the wait
    let mut output_copy = output_dataset.clone();
    unsafe { output_copy.set_data(region.as_ptr()) };

    let datasets: Vec<&DatasetInfo> =
        iter::once(&output_copy).chain(input_datasets.iter()).collect();
    if datasets.len() > MAX_DATASETS {
        eprintln!("udfbox: too many datasets for the runtime tables");
        return 1;
    }

    let mut names = Vec::with_capacity(datasets.len());
    let mut types = Vec::with_capacity(datasets.len());
    for dataset in &datasets {
        if dataset.dimensions.len() > MAX_RANK {
            eprintln!("udfbox: dataset {:?} exceeds the supported rank", dataset.name);
            return 1;
        }
        match CString::new(dataset.name.as_bytes()) {
            Ok(name) => names.push(name),
            Err(_) => {
                eprintln!("udfbox: dataset name contains an interior nul");
                return 1;
            }
        }
        // type tags are static strings, never contain nul
        types.push(CString::new(dataset.datatype.symbol()).unwrap());
    }

    // All four tables share the index space: 0 is the output dataset,
    // 1..N the inputs in caller order. Unused dimension slots stay zero
    // (static storage), terminating each row.
    for (index, dataset) in datasets.iter().enumerate() {
        unsafe {
            *data_table.add(index) = dataset.data() as *mut c_void;
            *names_table.add(index) = names[index].as_ptr();
            *types_table.add(index) = types[index].as_ptr();
            for (axis, extent) in dataset.dimensions.iter().enumerate() {
                *dims_table.add(index * MAX_RANK + axis) = *extent;
            }
        }
    }

    #[cfg(feature = "sandbox")]
    {
        let policy = crate::sandbox::SandboxPolicy::for_file(filterpath);
        if let Err(err) = crate::sandbox::Sandbox::init(&policy) {
            eprintln!("udfbox: {}", err);
            return 1;
        }
    }
    #[cfg(not(feature = "sandbox"))]
    let _ = filterpath;

    unsafe { entry() };
    0
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("udfbox only works on linux or android");

#[macro_use]
extern crate lazy_static;

mod backend;
mod codec;
mod dataset;
mod errors;
mod executor;
#[cfg(feature = "sandbox")]
mod sandbox;
mod shlib;
mod shmem;

pub use crate::{
    backend::CppBackend,
    dataset::{DataType, DatasetInfo},
    errors::{CodecError, ExecError, PackError},
    executor::run,
};

#[cfg(feature = "sandbox")]
pub use crate::{
    errors::SandboxError,
    sandbox::{Sandbox, SandboxPolicy},
};

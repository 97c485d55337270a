//! Error types you might see while packing or executing a UDF

use std::path::PathBuf;
use thiserror::Error;

/// Errors in the compressed blob codec
#[derive(Error, Debug)]
pub enum CodecError {
    /// buffer compression failed
    #[error("buffer compression failed: {0}")]
    Compress(std::io::Error),

    /// buffer decompression failed
    #[error("buffer decompression failed: {0}")]
    Decompress(std::io::Error),

    /// blob too short to carry a length trailer
    #[error("blob too short to carry a length trailer")]
    TruncatedBlob,

    /// decompressed length disagrees with the blob trailer
    #[error("decompressed length {actual} disagrees with the blob trailer {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// blob trailer exceeds any possible expansion of the payload
    #[error("blob trailer {expected} exceeds any possible expansion of {payload} payload bytes")]
    ImplausibleTrailer { expected: u64, payload: u64 },
}

/// Errors while turning UDF source text into an embeddable blob
#[derive(Error, Debug)]
pub enum PackError {
    /// io error on a build artifact
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// placeholder token missing from the runtime template
    #[error("placeholder {0:?} missing from template {1:?}")]
    MissingPlaceholder(String, PathBuf),

    /// failed to spawn the system compiler
    #[error("failed to spawn the system compiler: {0}")]
    CompilerSpawn(std::io::Error),

    /// compiler produced no shared object
    #[error("compiler produced no shared object at {0:?}")]
    NoCompilerOutput(PathBuf),
}

/// Errors that occur in the parent while executing an embedded UDF
#[derive(Error, Debug)]
pub enum ExecError {
    /// io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// failed to load the UDF shared object
    #[error("failed to load the UDF shared object: {0}")]
    Load(#[from] libloading::Error),

    /// shared region allocation error
    #[error("shared region allocation error: {0}")]
    Map(std::io::Error),

    /// process creation error
    #[error("process creation error: {0}")]
    Fork(std::io::Error),

    /// sandbox install error
    #[cfg(feature = "sandbox")]
    #[error("sandbox install error: {0}")]
    Sandbox(#[from] SandboxError),

    /// output dataset has no writable buffer
    #[error("output dataset has no writable buffer")]
    NoOutputBuffer,
}

/// Errors while installing the confinement layers in a UDF child process
#[cfg(feature = "sandbox")]
#[derive(Error, Debug)]
pub enum SandboxError {
    /// seccomp filter rejected by the kernel
    #[error("seccomp filter rejected by the kernel: {0}")]
    FilterInstall(std::io::Error),

    /// filter program exceeds the classic-BPF size limit
    #[error("filter program exceeds the classic-BPF size limit")]
    FilterTooLarge,

    /// failed to install the SIGSYS handler
    #[error("failed to install the SIGSYS handler: {0}")]
    HandlerInstall(std::io::Error),

    /// failed to map the syscall trampoline page
    #[error("failed to map the syscall trampoline page: {0}")]
    TrampolineMap(std::io::Error),
}

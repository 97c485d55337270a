//! Assembly, compilation, and scanning of C++ UDF sources
//!
//! The backend merges user source text with the runtime template, drives
//! the system compiler to a position-independent shared object, and packs
//! the result into a compressed blob suitable for embedding in the host
//! container file.

use crate::{codec, errors::PackError};
use memmap::Mmap;
use regex::Regex;
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
};

const COMPILER: &str = "g++";

/// Token in the template replaced by the user's source text
const PLACEHOLDER: &str = "// user_callback_placeholder";

/// Counter feeding collision-free temporary names across concurrent packs
static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_path(tag: &str, extension: &str) -> PathBuf {
    let serial = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = unsafe { libc::getpid() };
    std::env::temp_dir().join(format!("udfbox-{}-{}-{}{}", tag, pid, serial, extension))
}

/// A temporary build artifact, unlinked by its creator on drop
#[derive(Debug)]
pub(crate) struct ScopedFile(PathBuf);

impl ScopedFile {
    pub(crate) fn path(&self) -> &Path {
        &self.0
    }

    /// Give up ownership: the file is no longer unlinked on drop
    fn into_path(self) -> PathBuf {
        let path = self.0.clone();
        std::mem::forget(self);
        path
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        // A guard can outlive its file (a failed compile never creates
        // the output path); only a file we cannot remove is a leak
        if let Err(err) = fs::remove_file(&self.0) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("leaking temporary file {:?}: {}", self.0, err);
            }
        }
    }
}

/// C++ backend: turns UDF source text into embeddable blobs
pub struct CppBackend;

impl CppBackend {
    /// Name of this backend
    pub fn name(&self) -> &'static str {
        "C++"
    }

    /// Source extension managed by this backend
    pub fn extension(&self) -> &'static str {
        ".cpp"
    }

    /// The runtime template compiled into every UDF shared object
    pub fn default_template(&self) -> &'static str {
        include_str!("udf_template.cpp")
    }

    /// Splice the UDF source into the template at the placeholder token.
    ///
    /// Returns the path of the assembled translation unit, a fresh
    /// temporary file owned by the caller.
    pub fn assemble(&self, udf_path: &Path, template_path: &Path) -> Result<PathBuf, PackError> {
        Ok(self.assemble_scoped(udf_path, template_path)?.into_path())
    }

    fn assemble_scoped(
        &self,
        udf_path: &Path,
        template_path: &Path,
    ) -> Result<ScopedFile, PackError> {
        let udf_text = fs::read_to_string(udf_path)?;
        let template_text = fs::read_to_string(template_path)?;
        if !template_text.contains(PLACEHOLDER) {
            return Err(PackError::MissingPlaceholder(
                PLACEHOLDER.to_string(),
                template_path.to_path_buf(),
            ));
        }
        let assembled_text = template_text.replacen(PLACEHOLDER, &udf_text, 1);
        let path = unique_path("assembled", self.extension());
        fs::write(&path, assembled_text)?;
        Ok(ScopedFile(path))
    }

    /// Compile a UDF to a shared object and return it as a compressed blob
    pub fn compile(&self, udf_path: &Path, template_path: &Path) -> Result<Vec<u8>, PackError> {
        let assembled = self.assemble_scoped(udf_path, template_path)?;
        let output = ScopedFile(unique_path("object", ".so"));

        // Diagnostics stream through to our own stderr unparsed. The exit
        // status is advisory only; presence of the output file decides.
        let status = Command::new(COMPILER)
            .arg("-rdynamic")
            .arg("-shared")
            .arg("-fPIC")
            .arg("-flto")
            .arg("-Os")
            .arg("-o")
            .arg(output.path())
            .arg(assembled.path())
            .status()
            .map_err(PackError::CompilerSpawn)?;
        if !status.success() {
            log::warn!("{} exited with {}", COMPILER, status);
        }

        let file = match File::open(output.path()) {
            Ok(file) => file,
            Err(_) => return Err(PackError::NoCompilerOutput(output.path().to_path_buf())),
        };
        // Mmap rejects zero-length mappings; an empty artifact still
        // counts as present and flows through to the loader
        if file.metadata()?.len() == 0 {
            return Ok(codec::compress(&[])?);
        }
        let bytecode = unsafe { Mmap::map(&file)? };
        Ok(codec::compress(&bytecode)?)
    }

    /// Scan UDF source for references to input dataset names.
    ///
    /// The compiler's preprocessor strips comments and normalizes
    /// whitespace; every surviving `lib.getData` call contributes the
    /// first double-quoted string on its line, duplicates preserved in
    /// source order. This API is advisory: if the compiler cannot be
    /// spawned the list is simply empty.
    pub fn scan(&self, udf_path: &Path) -> Vec<String> {
        lazy_static! {
            static ref GETDATA: Regex =
                Regex::new(r#"lib\.getData[^"\n]*"([^"]*)""#).unwrap();
        }

        let output = match Command::new(COMPILER)
            .arg("-fpreprocessed")
            .arg("-dD")
            .arg("-E")
            .arg(udf_path)
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                log::warn!("failed to spawn {} for scanning: {}", COMPILER, err);
                return Vec::new();
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let mut names = Vec::new();
        for line in text.lines() {
            for capture in GETDATA.captures_iter(line) {
                names.push(capture[1].to_string());
            }
        }
        names
    }

    /// Materialize artifact bytes into an executable temporary file with
    /// this backend's extension, ready for the loader.
    pub(crate) fn write_to_disk(&self, bytes: &[u8]) -> Result<ScopedFile, io::Error> {
        use std::os::unix::fs::PermissionsExt;

        let path = unique_path("artifact", self.extension());
        fs::write(&path, bytes)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(ScopedFile(path))
    }
}

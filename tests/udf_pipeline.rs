//! End-to-end UDF pipeline: compile source text to a blob, execute it in
//! a sandboxed child, and check what lands in the output buffer.
//!
//! Compilation needs the system C++ compiler and execution needs seccomp;
//! every test probes for what it needs and returns early when the machine
//! cannot run it.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{Mutex, MutexGuard},
};
use udfbox::{run, CppBackend, DataType, DatasetInfo};

// The harness runs tests on several threads; forking a child that will
// dlopen and allocate is only safe while the other threads are parked.
static FORK_LOCK: Mutex<()> = Mutex::new(());

fn fork_lock() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn compiler_available() -> bool {
    Command::new("g++")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn seccomp_available() -> bool {
    unsafe { libc::prctl(libc::PR_GET_SECCOMP) != -1 }
}

struct TempSource(PathBuf);

impl TempSource {
    fn new(tag: &str, contents: &str) -> TempSource {
        let path = std::env::temp_dir().join(format!(
            "udfbox-test-{}-{}.cpp",
            tag,
            unsafe { libc::getpid() }
        ));
        fs::write(&path, contents).unwrap();
        TempSource(path)
    }
}

impl Drop for TempSource {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

fn compile_udf(tag: &str, body: &str) -> Vec<u8> {
    let backend = CppBackend;
    let template = TempSource::new(&format!("{}-tpl", tag), backend.default_template());
    let udf = TempSource::new(tag, body);
    backend
        .compile(&udf.0, &template.0)
        .expect("UDF compilation failed")
}

fn int32_output(name: &str, buffer: &mut Vec<i32>) -> DatasetInfo {
    let mut dataset = DatasetInfo::new(name, DataType::Int32, vec![buffer.len() as u64]);
    unsafe { dataset.set_data(buffer.as_mut_ptr() as *mut u8) };
    dataset
}

fn int32_input(name: &str, buffer: &mut Vec<i32>) -> DatasetInfo {
    int32_output(name, buffer)
}

#[test]
fn constant_udf_fills_the_grid() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }
    let _ = env_logger::builder().is_test(true).try_init();

    let blob = compile_udf(
        "constant",
        concat!(
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    size_t count = lib.getGridSize(\"result\");\n",
            "    for (size_t i = 0; i < count; ++i)\n",
            "        out[i] = 42;\n",
            "}\n",
        ),
    );

    let mut buffer = vec![0i32; 4];
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &[], &output, None, &blob));
    assert_eq!(buffer, vec![42, 42, 42, 42]);
}

#[test]
fn passthrough_udf_copies_its_input() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }

    let blob = compile_udf(
        "passthrough",
        concat!(
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    int *src = lib.getData<int>(\"src\");\n",
            "    size_t count = lib.getGridSize(\"src\");\n",
            "    for (size_t i = 0; i < count; ++i)\n",
            "        out[i] = src[i];\n",
            "}\n",
        ),
    );

    let mut source = vec![1i32, 2, 3];
    let mut buffer = vec![0i32; 3];
    let input = int32_input("src", &mut source);
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &[input], &output, None, &blob));
    assert_eq!(buffer, vec![1, 2, 3]);
}

#[test]
fn multi_input_sum() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }

    let blob = compile_udf(
        "sum",
        concat!(
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    int *a = lib.getData<int>(\"a\");\n",
            "    int *b = lib.getData<int>(\"b\");\n",
            "    size_t count = lib.getGridSize(\"result\");\n",
            "    for (size_t i = 0; i < count; ++i)\n",
            "        out[i] = a[i] + b[i];\n",
            "}\n",
        ),
    );

    let mut a = vec![1i32, 2, 3];
    let mut b = vec![10i32, 20, 30];
    let mut buffer = vec![0i32; 3];
    let inputs = vec![int32_input("a", &mut a), int32_input("b", &mut b)];
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &inputs, &output, None, &blob));
    assert_eq!(buffer, vec![11, 22, 33]);
}

#[test]
fn type_tags_and_dims_reach_the_udf() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }

    // Encode what the runtime tables report back into the output grid
    let blob = compile_udf(
        "introspect",
        concat!(
            "#include <string.h>\n",
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    out[0] = strcmp(lib.getType(\"result\"), \"int32\") == 0;\n",
            "    out[1] = (int) lib.getDims(\"result\")[0];\n",
            "    out[2] = lib.getData<int>(\"no_such_dataset\") == 0;\n",
            "}\n",
        ),
    );

    let mut buffer = vec![0i32; 3];
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &[], &output, None, &blob));
    assert_eq!(buffer, vec![1, 3, 1]);
}

#[cfg(feature = "sandbox")]
#[test]
fn sandbox_denies_files_outside_the_allowlist() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }

    let blob = compile_udf(
        "deny",
        concat!(
            "#include <fcntl.h>\n",
            "#include <errno.h>\n",
            "#include <unistd.h>\n",
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    errno = 0;\n",
            "    int fd = open(\"/etc/passwd\", O_RDONLY);\n",
            "    out[0] = (fd < 0 && errno == EPERM) ? 1 : -1;\n",
            "    if (fd >= 0) close(fd);\n",
            "    errno = 0;\n",
            "    int allowed = open(\"/etc/resolv.conf\", O_RDONLY);\n",
            "    out[1] = (allowed >= 0 || errno != EPERM) ? 1 : -1;\n",
            "    if (allowed >= 0) close(allowed);\n",
            "}\n",
        ),
    );

    let mut buffer = vec![0i32; 2];
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &[], &output, None, &blob));
    assert_eq!(buffer[0], 1, "open of /etc/passwd must fail with EPERM");
    assert_eq!(buffer[1], 1, "the default allowlist must pass /etc/resolv.conf through");
}

#[cfg(feature = "sandbox")]
#[test]
fn sandbox_kills_disallowed_syscalls() {
    let _guard = fork_lock();
    if !compiler_available() || !seccomp_available() {
        return;
    }

    // The write to out[0] lands in the shared region before the kill;
    // the parent copies the partial result and still reports success
    let blob = compile_udf(
        "kill",
        concat!(
            "#include <unistd.h>\n",
            "void dynamic_dataset()\n",
            "{\n",
            "    int *out = lib.getData<int>(\"result\");\n",
            "    out[0] = 7;\n",
            "    unlink(\"/tmp/udfbox-kill-probe\");\n",
            "    out[1] = 9;\n",
            "}\n",
        ),
    );

    let mut buffer = vec![0i32; 3];
    let output = int32_output("result", &mut buffer);
    assert!(run(Path::new("/tmp/host.h5"), &[], &output, None, &blob));
    assert_eq!(buffer, vec![7, 0, 0]);
}

#[test]
fn garbage_blob_fails_without_touching_the_buffer() {
    let _guard = fork_lock();
    let mut buffer = vec![0x77777777i32; 4];
    let output = int32_output("result", &mut buffer);
    assert!(!run(
        Path::new("/tmp/host.h5"),
        &[],
        &output,
        None,
        b"definitely not a blob"
    ));
    assert_eq!(buffer, vec![0x77777777; 4]);
}

#[test]
fn missing_output_buffer_fails() {
    let _guard = fork_lock();
    let output = DatasetInfo::new("result", DataType::Int32, vec![4]);
    let blob = udfbox::CppBackend.default_template();
    assert!(!run(
        Path::new("/tmp/host.h5"),
        &[],
        &output,
        None,
        blob.as_bytes()
    ));
}

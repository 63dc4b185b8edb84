//! Debug output capture.
//!
//! A fuzzer owns the target's stdout and stderr, so anything the guest
//! prints normally disappears. For chasing a misbehaving harness, both
//! streams can be pointed at a file for the duration of a closure and
//! inspected after the run.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    os::fd::{AsRawFd, RawFd},
    path::Path,
};

use aflguest_bolts::{
    os::{dup, dup2},
    Error,
};

/// Where [`with_stdio_to_file`] writes when nobody picks a path
pub const DEFAULT_DEBUG_LOG_FILE: &str = "/tmp/aflguest-debug.log";

/// Saved stdout/stderr descriptors that go back in place on drop, so
/// restoration also happens while unwinding out of a captured closure.
struct SavedStdio {
    stdout: RawFd,
    stderr: RawFd,
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        // What the buffered streams still hold must land in the file, not
        // on the restored descriptors.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let _ = dup2(self.stdout, libc::STDOUT_FILENO);
        let _ = dup2(self.stderr, libc::STDERR_FILENO);
        let _ = nix::unistd::close(self.stdout);
        let _ = nix::unistd::close(self.stderr);
    }
}

/// Run `f` with stdout and stderr pointed at the file at `path`. The
/// original descriptors come back when the closure is done, even when
/// it panics.
///
/// Every call truncates the file, so a long campaign cannot fill the
/// disk. Keep `tail -f` running on the file to follow captures live.
pub fn with_stdio_to_file<T, F>(path: &Path, f: F) -> Result<T, Error>
where
    F: FnOnce() -> T,
{
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let saved_stdout = dup(libc::STDOUT_FILENO)?;
    let saved_stderr = match dup(libc::STDERR_FILENO) {
        Ok(fd) => fd,
        Err(err) => {
            let _ = nix::unistd::close(saved_stdout);
            return Err(err);
        }
    };
    let saved = SavedStdio {
        stdout: saved_stdout,
        stderr: saved_stderr,
    };

    dup2(file.as_raw_fd(), libc::STDOUT_FILENO)?;
    dup2(file.as_raw_fd(), libc::STDERR_FILENO)?;

    let result = f();
    drop(saved);
    Ok(result)
}

/// [`with_stdio_to_file`] with the default path
pub fn with_stdio_to_default_file<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> T,
{
    with_stdio_to_file(Path::new(DEFAULT_DEBUG_LOG_FILE), f)
}

#[cfg(test)]
mod tests {
    use std::{
        env, fs,
        os::fd::BorrowedFd,
        panic::{catch_unwind, AssertUnwindSafe},
        process,
    };

    use serial_test::serial;

    use super::with_stdio_to_file;

    // The test harness captures println! above the descriptor level, so
    // these write to fd 1 directly.
    fn write_raw_to_stdout(bytes: &[u8]) {
        let stdout = unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) };
        let _ = nix::unistd::write(stdout, bytes);
    }

    #[test]
    #[serial]
    fn captures_and_restores() {
        let path = env::temp_dir().join(format!("aflguest-stdio-{}.log", process::id()));
        let _ = fs::remove_file(&path);

        with_stdio_to_file(&path, || {
            write_raw_to_stdout(b"into the file\n");
        })
        .unwrap();

        // the harness itself may print progress into the window, so the
        // file can hold more than our own line
        let captured = fs::read_to_string(&path).unwrap();
        assert!(captured.contains("into the file\n"));

        write_raw_to_stdout(b"back on the real stdout\n");
        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(captured, after);

        let _ = fs::remove_file(&path);
    }

    #[test]
    #[serial]
    fn each_capture_starts_fresh() {
        let path = env::temp_dir().join(format!("aflguest-stdio-fresh-{}.log", process::id()));
        let _ = fs::remove_file(&path);

        with_stdio_to_file(&path, || write_raw_to_stdout(b"first capture\n")).unwrap();
        with_stdio_to_file(&path, || write_raw_to_stdout(b"second capture\n")).unwrap();

        // each call truncates; the earlier capture must not linger
        let all = fs::read_to_string(&path).unwrap();
        assert!(all.contains("second capture\n"));
        assert!(!all.contains("first capture\n"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    #[serial]
    fn a_panicking_closure_still_restores_stdio() {
        let path = env::temp_dir().join(format!("aflguest-stdio-panic-{}.log", process::id()));
        let _ = fs::remove_file(&path);

        let unwound = catch_unwind(AssertUnwindSafe(|| {
            with_stdio_to_file(&path, || {
                write_raw_to_stdout(b"before the panic\n");
                panic!("harness exploded");
            })
        }));
        assert!(unwound.is_err());

        let captured = fs::read_to_string(&path).unwrap();
        assert!(captured.contains("before the panic\n"));

        // fd 1 must point back at the real stdout
        write_raw_to_stdout(b"back outside the capture\n");
        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(captured, after);

        let _ = fs::remove_file(&path);
    }
}

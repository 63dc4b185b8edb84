//! Operating system helpers: forking, waiting on children, and file
//! descriptor redirection.

use std::os::fd::RawFd;

use libc::pid_t;

use crate::Error;

pub mod pipes;

/// A handle to a forked child process
#[derive(Debug)]
pub struct ChildHandle {
    /// The pid of the child
    pub pid: pid_t,
}

impl ChildHandle {
    /// Block until the child exited, returning the raw `waitpid` status word.
    ///
    /// The word is deliberately left undecoded. A consumer that relays it to
    /// a fuzzer must pass the kernel encoding through unchanged; the
    /// `libc::WIF*` family decodes it where a local decision is needed.
    pub fn wait_raw(&self) -> Result<i32, Error> {
        let mut status = -1;
        if unsafe { libc::waitpid(self.pid, &mut status, 0) } < 0 {
            return Err(Error::last_os_error(format!(
                "Failed to wait for child {}",
                self.pid
            )));
        }
        Ok(status)
    }
}

/// The result of a call to [`fork`]
#[derive(Debug)]
pub enum ForkResult {
    /// The fork finished, we are the parent process.
    /// The child has the handle [`ChildHandle`].
    Parent(ChildHandle),
    /// The fork finished, we are the child process.
    Child,
}

/// Fork the current process once.
///
/// # Safety
/// A normal fork. Has all the usual side effects: the child starts with a
/// copy of the parent's address space and diverges from there. The caller
/// must make sure no other thread holds locks the child will need.
pub unsafe fn fork() -> Result<ForkResult, Error> {
    match unsafe { libc::fork() } {
        pid if pid > 0 => Ok(ForkResult::Parent(ChildHandle { pid })),
        pid if pid < 0 => Err(Error::last_os_error(format!("Fork failed ({pid})"))),
        _ => Ok(ForkResult::Child),
    }
}

/// Safe wrapper around `dup`, returning a fresh descriptor aliasing `fd`
pub fn dup(fd: RawFd) -> Result<RawFd, Error> {
    match unsafe { libc::dup(fd) } {
        -1 => Err(Error::last_os_error(format!("Failed to dup {fd}"))),
        new_fd => Ok(new_fd),
    }
}

/// Safe wrapper around `dup2`, making `device` an alias of `fd`
pub fn dup2(fd: RawFd, device: RawFd) -> Result<(), Error> {
    match unsafe { libc::dup2(fd, device) } {
        -1 => Err(Error::last_os_error(format!(
            "Failed to dup2 {fd} onto {device}"
        ))),
        _ => Ok(()),
    }
}

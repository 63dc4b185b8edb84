//! The target side of the AFL fork server protocol.
//!
//! The fuzzer owns two pipes wired to a pair of reserved descriptors. The
//! target phones home once, then serves run requests forever: read one
//! request word, fork, report the child pid, wait, report the raw exit
//! status. Every message is exactly 4 bytes in host byte order.
//!
//! The request payload is irrelevant, but the read is not optional: a
//! 64 KiB pipe buffer holds 2^14 unread request words, and once it is
//! full the fuzzer's next write blocks forever and the campaign stalls.

use std::os::fd::{BorrowedFd, RawFd};

use aflguest_bolts::{
    os::{fork, ChildHandle, ForkResult},
    Error,
};

/// Descriptor on which the target reads run requests from the fuzzer.
/// Status traffic flows back on the next one up.
pub const FORKSRV_FD: RawFd = 198;

/// The hello word sent at startup: no extended capabilities
const HELLO: u32 = 0;

/// The pair of descriptors the fork server talks over.
///
/// Defaults to the reserved pair; arbitrary descriptors are possible so
/// the protocol loop can be driven over plain pipes.
#[derive(Debug)]
pub struct ForkserverChannel {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Default for ForkserverChannel {
    fn default() -> Self {
        Self::over(FORKSRV_FD, FORKSRV_FD + 1)
    }
}

impl ForkserverChannel {
    /// A channel over the given descriptors, which must stay open for the
    /// channel's whole lifetime
    #[must_use]
    pub const fn over(read_fd: RawFd, write_fd: RawFd) -> Self {
        Self { read_fd, write_fd }
    }

    fn read_u32(&self) -> Result<u32, Error> {
        let mut buf = [0_u8; 4];
        let bytes_read = nix::unistd::read(self.read_fd, &mut buf)?;
        if bytes_read != buf.len() {
            return Err(Error::illegal_state(format!(
                "Truncated fork server message: expected {} bytes, got {bytes_read}",
                buf.len()
            )));
        }
        Ok(u32::from_ne_bytes(buf))
    }

    fn write_u32(&self, message: u32) -> Result<(), Error> {
        let buf = message.to_ne_bytes();
        let fd = unsafe { BorrowedFd::borrow_raw(self.write_fd) };
        let bytes_written = nix::unistd::write(fd, &buf)?;
        if bytes_written != buf.len() {
            return Err(Error::illegal_state(format!(
                "Truncated fork server write: expected {} bytes, wrote {bytes_written}",
                buf.len()
            )));
        }
        Ok(())
    }

    /// Close both descriptors. Only the forked child does this; the
    /// channel must not be used afterwards.
    fn close(&self) {
        let _ = nix::unistd::close(self.read_fd);
        let _ = nix::unistd::close(self.write_fd);
    }
}

/// What the protocol loop does between draining a request and reporting
/// a status.
///
/// The production implementation forks. Tests substitute a spawner that
/// fabricates children, so the loop can be driven tens of thousands of
/// iterations without leaving the process.
pub trait Spawner {
    /// Create one worker, telling the caller which side of it we are on
    fn spawn(&mut self) -> Result<ForkResult, Error>;

    /// Wait for the spawned worker, returning the raw `waitpid` status word
    fn wait_child(&mut self, child: &ChildHandle) -> Result<i32, Error>;
}

/// The production [`Spawner`]: plain `fork` and `waitpid`
#[derive(Debug, Default)]
pub struct ForkSpawner;

impl Spawner for ForkSpawner {
    fn spawn(&mut self) -> Result<ForkResult, Error> {
        // Single-threaded at this point; the embedding runtime calls init
        // before it spins up worker threads.
        unsafe { fork() }
    }

    fn wait_child(&mut self, child: &ChildHandle) -> Result<i32, Error> {
        child.wait_raw()
    }
}

/// Run the fork server: phone home once, then serve run requests forever.
///
/// Only a forked child ever gets `Ok` back; it should run one iteration of
/// target logic and exit. In the parent the loop only ends on a protocol
/// error, which the caller must treat as fatal, there is no fuzzer left to
/// talk to.
pub fn run<S: Spawner>(channel: &ForkserverChannel, spawner: &mut S) -> Result<(), Error> {
    channel.write_u32(HELLO).inspect_err(|_| {
        log::error!("Could not phone home; fork server descriptors not wired up?");
    })?;

    loop {
        // The request word must be drained even though its payload goes
        // unused; the fuzzer blocks on this write once the pipe fills.
        let _was_killed = channel.read_u32()?;

        match spawner.spawn()? {
            ForkResult::Child => {
                // The channel belongs to the serving parent. A child
                // keeping it open would hold the fuzzer's pipes alive
                // past the parent's death.
                channel.close();
                return Ok(());
            }
            ForkResult::Parent(child) => {
                channel.write_u32(child.pid as u32).inspect_err(|_| {
                    log::error!("Could not report the child pid to the fuzzer");
                })?;

                let status = spawner.wait_child(&child)?;

                channel.write_u32(status as u32).inspect_err(|_| {
                    log::error!("Could not report the child status to the fuzzer");
                })?;
            }
        }
    }
}

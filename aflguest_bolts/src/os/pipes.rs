//! Unix `pipe` wrapper, with separately closable ends.

use std::{
    io::{self, Read, Write},
    os::fd::{AsRawFd, OwnedFd, RawFd},
};

use nix::unistd::{pipe, read, write};

use crate::Error;

/// A unidirectional pipe.
///
/// Each end can be closed on its own, which is what a fork server needs:
/// after forking, parent and child close the ends they must not keep.
/// Ends still open are closed when the [`Pipe`] is dropped.
#[derive(Debug)]
pub struct Pipe {
    read_end: Option<OwnedFd>,
    write_end: Option<OwnedFd>,
}

impl Pipe {
    /// Create a new [`Pipe`]
    pub fn new() -> Result<Self, Error> {
        let (read_end, write_end) = pipe()?;
        Ok(Self {
            read_end: Some(read_end),
            write_end: Some(write_end),
        })
    }

    /// Close the read end of the pipe
    pub fn close_read_end(&mut self) {
        self.read_end = None;
    }

    /// Close the write end of the pipe
    pub fn close_write_end(&mut self) {
        self.write_end = None;
    }

    /// The read end's raw descriptor, if still open
    #[must_use]
    pub fn read_end(&self) -> Option<RawFd> {
        self.read_end.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// The write end's raw descriptor, if still open
    #[must_use]
    pub fn write_end(&self) -> Option<RawFd> {
        self.write_end.as_ref().map(AsRawFd::as_raw_fd)
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.read_end {
            Some(read_end) => read(read_end.as_raw_fd(), buf).map_err(io::Error::other),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "The read end of this pipe was already closed",
            )),
        }
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.write_end {
            Some(write_end) => write(write_end, buf).map_err(io::Error::other),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "The write end of this pipe was already closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

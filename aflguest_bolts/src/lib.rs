/*!
* Welcome to `aflguest_bolts`
*
* The low-level plumbing for running a managed-runtime program under an
* AFL-style fork server: the crate-wide [`Error`] type, SysV shared memory
* maps ([`shmem`]), and process helpers ([`os`]) for forking, waiting and
* pipe juggling.
*/
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]
#![cfg_attr(
    not(test),
    warn(
        missing_debug_implementations,
        missing_docs,
        trivial_numeric_casts,
        unused_import_braces,
        unused_qualifications
    )
)]

use std::{
    env::VarError,
    fmt::{self, Display},
    io,
};

pub mod os;
pub mod shmem;

/// Main error type for the `aflguest` crates
#[derive(Debug)]
pub enum Error {
    /// File related error
    File(io::Error),
    /// Optional val was supposed to be set, but isn't.
    Empty(String),
    /// You're holding it wrong
    IllegalState(String),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String),
    /// An OS level call went wrong, `errno` wrapped up with some context
    OsError(io::Error, String),
    /// Something else happened
    Unknown(String),
}

impl Error {
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg)
    }

    /// Optional val was supposed to be set, but isn't.
    #[must_use]
    pub fn empty<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Empty(arg.into())
    }

    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }

    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }

    /// Grab the last OS error (`errno`) and wrap it up with some context
    #[must_use]
    pub fn last_os_error<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(io::Error::last_os_error(), arg.into())
    }

    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::File(err) => write!(f, "File IO failed: {err:?}"),
            Self::Empty(s) => write!(f, "Optional value `{s}` was not set"),
            Self::IllegalState(s) => write!(f, "Illegal state: {s}"),
            Self::IllegalArgument(s) => write!(f, "Illegal argument: {s}"),
            Self::OsError(err, s) => write!(f, "OS error: {s}: {err:?}"),
            Self::Unknown(s) => write!(f, "Unknown error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::unknown(format!("Unix error: {err:?}"))
    }
}

impl From<VarError> for Error {
    fn from(err: VarError) -> Self {
        Self::empty(format!("Could not get env var: {err:?}"))
    }
}

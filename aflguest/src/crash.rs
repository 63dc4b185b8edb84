//! Turning guest failures into something a fuzzer can see.
//!
//! A fuzzer watching a forked child only sees the exit status word. An
//! uncaught failure inside the managed program must therefore leave the
//! process by fatal signal; a nonzero exit code would be filed as a
//! boring error, not a crash.

use std::{fmt::Debug, panic, process};

use nix::sys::signal::{raise, Signal};

/// The signal used to flag a guest failure to the fuzzer
pub const CRASH_SIGNAL: Signal = Signal::SIGUSR1;

/// Kill the current process in a way the fuzzer records as a crash.
///
/// Does not return. Should the signal fail to fire, the process aborts
/// instead, which still terminates by signal.
pub fn report_crash() -> ! {
    let _ = raise(CRASH_SIGNAL);
    // Only reachable with the crash signal blocked or ignored.
    process::abort()
}

/// Run one iteration of target logic, translating failures into crashes.
///
/// Both an `Err` and a panic end the process via [`report_crash`]; only a
/// clean `Ok` value comes back. Pair this with a plain `exit(0)` at the
/// end of the iteration and the status word can never confuse a failure
/// with a clean run.
pub fn with_failures_as_crashes<T, E, F>(f: F) -> T
where
    F: FnOnce() -> Result<T, E>,
    E: Debug,
{
    match panic::catch_unwind(panic::AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            log::error!("Guest iteration failed: {err:?}");
            report_crash()
        }
        Err(_panic) => {
            // The panic hook already wrote the payload to stderr.
            report_crash()
        }
    }
}

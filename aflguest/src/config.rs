//! The environment interface of the bridge.
//!
//! Everything a fuzzer or an operator configures about the bridge travels
//! through environment variables, the same names the wider AFL tool family
//! understands.

use std::env;

/// Carries the id of the fuzzer-allocated coverage segment.
///
/// Absent when no fuzzer is listening; the bridge then traces into a
/// process-local sink instead.
pub const SHM_ENV_VAR: &str = "__AFL_SHM_ID";

/// When set, [`crate::init`] skips the fork server entirely and the
/// program runs exactly once
pub const NO_FORKSRV_ENV_VAR: &str = "AFL_NO_FORKSRV";

/// Consumed by the fuzzer side: tolerate crashes that fail to reproduce
/// during calibration. Exported so orchestration code can set it when
/// launching a fuzzer against a bridge-instrumented target, whose crash
/// timing depends on interpreter state.
pub const CALIBRATION_ENV_VAR: &str = "AFL_I_DONT_CARE_ABOUT_MISSING_CRASHES";

/// Consumed by the fuzzer side: skip the instrumentation check on the
/// target binary, which would reject an interpreter wrapping this bridge
pub const SKIP_BIN_CHECK_ENV_VAR: &str = "AFL_SKIP_BIN_CHECK";

/// Whether the fork server was disabled for this run
#[must_use]
pub fn forkserver_disabled() -> bool {
    env::var_os(NO_FORKSRV_ENV_VAR).is_some()
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::{forkserver_disabled, NO_FORKSRV_ENV_VAR};

    #[test]
    #[serial]
    fn forkserver_toggle_follows_the_environment() {
        env::remove_var(NO_FORKSRV_ENV_VAR);
        assert!(!forkserver_disabled());
        env::set_var(NO_FORKSRV_ENV_VAR, "1");
        assert!(forkserver_disabled());
        env::remove_var(NO_FORKSRV_ENV_VAR);
    }
}

/*!
* Welcome to `aflguest`
*
* `aflguest` lets a program built on a managed runtime be fuzzed by an
* external coverage guided fuzzer, the AFL way: it attaches the fuzzer's
* coverage map, traces visited locations into it as edges, serves the
* fork server protocol so every iteration starts from a warm process
* image, and turns guest failures into fatal signals the fuzzer files as
* crashes.
*
* The embedding runtime calls [`init`] once, as late as possible; reports
* visited locations from its call interceptor through [`trace_call`] or
* [`trace_location`]; and wraps each iteration of target logic in
* [`with_failures_as_crashes`].
*
* # Usage
*
* ```no_run
* use std::io::Read;
*
* fn fuzz_one(input: &[u8]) -> Result<(), String> {
*     aflguest::trace_call(file!(), line!());
*     if input.first() == Some(&b'!') {
*         return Err("bad byte".into());
*     }
*     Ok(())
* }
*
* // Expensive runtime setup runs first; the bridge forks from here on.
* aflguest::init().expect("bridge init failed");
*
* let mut input = Vec::new();
* std::io::stdin().read_to_end(&mut input).expect("no input");
* aflguest::with_failures_as_crashes(|| fuzz_one(&input));
* std::process::exit(0);
* ```
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

use std::process;

pub use aflguest_bolts::Error;

pub mod config;
pub mod coverage;
pub mod crash;
pub mod forkserver;
pub mod stdio;

pub use coverage::{location_hash, trace_call, trace_location, CoverageMap, EdgeTracer, MAP_SIZE};
pub use crash::{report_crash, with_failures_as_crashes, CRASH_SIGNAL};
pub use stdio::{with_stdio_to_default_file, with_stdio_to_file, DEFAULT_DEBUG_LOG_FILE};

use crate::forkserver::{ForkSpawner, ForkserverChannel};

/// Bring the bridge up. Call once, as late as possible.
///
/// Attaches the coverage map advertised in the environment (or a local
/// sink when none is), installs the edge tracer, and, unless
/// [`config::NO_FORKSRV_ENV_VAR`] is set, phones home and starts serving
/// the fuzzer's run requests. Everything expensive the program does
/// before this call is paid once instead of once per iteration.
///
/// Returns in the forked child of each iteration, or right away in
/// single shot mode, with tracing live either way. A protocol failure in
/// the serving parent does not return: it is logged and the process
/// exits, there is no fuzzer left to serve.
pub fn init() -> Result<(), Error> {
    let map = CoverageMap::from_env()?;
    coverage::install(EdgeTracer::new(map))?;

    if !config::forkserver_disabled() {
        let channel = ForkserverChannel::default();
        let mut spawner = ForkSpawner;
        if let Err(err) = forkserver::run(&channel, &mut spawner) {
            log::error!("Fork server terminated: {err}");
            process::exit(1);
        }
    }

    coverage::reset_edge_state();
    coverage::enable();
    Ok(())
}

/// Take the bridge down again: the trace hooks go dead, the coverage map
/// stays attached so the fuzzer can still read what was traced.
pub fn deinit() {
    coverage::disable();
}

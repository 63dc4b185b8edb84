//! Edge coverage tracking.
//!
//! Plays the role AFL's compile-time instrumentation plays for native
//! binaries, for programs whose instrumentation arrives at runtime: every
//! visited location hashes to a map slot, every (previous, current) pair
//! to an edge slot, and an 8 bit hit counter per slot lives in a map the
//! fuzzer reads after each run.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use aflguest_bolts::{
    shmem::{NopShMem, UnixShMem},
    Error,
};

use crate::config::SHM_ENV_VAR;

/// The size of the coverage map, one byte per edge slot.
///
/// Must match what the fuzzer on the other side of the segment assumes.
pub const MAP_SIZE: usize = 65536;

const LHASH_INIT: u32 = 0x811C9DC5;
const LHASH_MAGIC_MULT: u32 = 0x01000193;

/// Hash a source location down to a map slot.
///
/// 32 bit FNV-1a over the path bytes, then over the offset bytes from low
/// to high while nonzero, reduced mod [`MAP_SIZE`]. The folding order is
/// shared with the other guest bridges of the AFL family, so one source
/// location lands in the same slot no matter which bridge reports it.
#[must_use]
pub fn location_hash(path: &str, offset: u64) -> u32 {
    let mut hash = LHASH_INIT;
    for &byte in path.as_bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(LHASH_MAGIC_MULT);
    }
    let mut offset = offset;
    while offset != 0 {
        hash ^= (offset & 0xFF) as u32;
        hash = hash.wrapping_mul(LHASH_MAGIC_MULT);
        offset >>= 8;
    }
    hash % MAP_SIZE as u32
}

/// Storage behind the tracer: the fuzzer's shared segment, or a local
/// sink when nobody is listening.
#[derive(Debug)]
pub enum CoverageMap {
    /// Hit counts land in the fuzzer-allocated shared segment
    Shared(UnixShMem),
    /// Hit counts land in a process-local buffer and die with the process
    Sink(NopShMem),
}

impl CoverageMap {
    /// Build the map from the environment.
    ///
    /// An advertised segment id gets attached; no advertised id means a
    /// sink. An id that is advertised but cannot be attached is an error,
    /// not a fallback.
    pub fn from_env() -> Result<Self, Error> {
        if std::env::var_os(SHM_ENV_VAR).is_some() {
            let shmem = UnixShMem::existing_from_env(SHM_ENV_VAR, MAP_SIZE)?;
            Ok(Self::Shared(shmem))
        } else {
            Ok(Self::Sink(NopShMem::new(MAP_SIZE)))
        }
    }
}

impl Deref for CoverageMap {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Shared(map) => map,
            Self::Sink(map) => map,
        }
    }
}

impl DerefMut for CoverageMap {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Shared(map) => map,
            Self::Sink(map) => map,
        }
    }
}

/// Per-process edge state plus the map it writes into.
///
/// The slot for one recorded visit is the XOR of the current location with
/// the right-shifted previous one, so the edges A to B and B to A count
/// separately.
#[derive(Debug)]
pub struct EdgeTracer {
    map: CoverageMap,
    previous_location: u32,
}

impl EdgeTracer {
    /// Wrap a map into a tracer with pristine edge state
    #[must_use]
    pub fn new(map: CoverageMap) -> Self {
        Self {
            map,
            previous_location: 0,
        }
    }

    /// Record one visit of `location_id`.
    ///
    /// Counters saturate at 255; a hot edge stays hot instead of wrapping
    /// back to zero.
    pub fn record_edge(&mut self, location_id: u32) {
        let slot = ((location_id ^ self.previous_location) as usize) & (MAP_SIZE - 1);
        let counter = &mut self.map[slot];
        *counter = counter.saturating_add(1);
        self.previous_location = location_id >> 1;
    }

    /// Forget the previous location, as a freshly forked child must
    pub fn reset_edge_state(&mut self) {
        self.previous_location = 0;
    }

    /// Read access to the map, for inspection
    #[must_use]
    pub fn map(&self) -> &CoverageMap {
        &self.map
    }
}

/// Fast gate the trace hooks consult before touching the tracer
static TRACING_ENABLED: AtomicBool = AtomicBool::new(false);

/// The process-wide tracer, installed by [`crate::init`]
static TRACER: Mutex<Option<EdgeTracer>> = Mutex::new(None);

/// Install `tracer` as the process-wide tracer, still disabled.
///
/// Installing over an already installed tracer is an error.
pub fn install(tracer: EdgeTracer) -> Result<(), Error> {
    let mut guard = TRACER
        .lock()
        .map_err(|_| Error::illegal_state("The tracer lock is poisoned"))?;
    if guard.is_some() {
        return Err(Error::illegal_state("An edge tracer is already installed"));
    }
    *guard = Some(tracer);
    Ok(())
}

/// Turn the trace hooks live
pub fn enable() {
    TRACING_ENABLED.store(true, Ordering::SeqCst);
}

/// Turn the trace hooks off; the map stays where it is
pub fn disable() {
    TRACING_ENABLED.store(false, Ordering::SeqCst);
}

/// Reset the edge state of the installed tracer, if any
pub fn reset_edge_state() {
    if let Ok(mut guard) = TRACER.lock() {
        if let Some(tracer) = guard.as_mut() {
            tracer.reset_edge_state();
        }
    }
}

/// Drop the installed tracer so another test can install its own
#[cfg(test)]
pub(crate) fn clear_installed() {
    if let Ok(mut guard) = TRACER.lock() {
        *guard = None;
    }
}

/// Trace hook for runtimes that already hashed their locations.
///
/// Never panics and never blocks. With the tracer disabled, missing or
/// busy the event is dropped; a lost count is acceptable, breaking the
/// traced program is not.
pub fn trace_location(location_id: u32) {
    if !TRACING_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    if let Ok(mut guard) = TRACER.try_lock() {
        if let Some(tracer) = guard.as_mut() {
            tracer.record_edge(location_id);
        }
    }
}

/// Trace hook for runtimes reporting raw call sites as path and line
pub fn trace_call(path: &str, line: u32) {
    trace_location(location_hash(path, u64::from(line)));
}

#[cfg(test)]
mod tests {
    use aflguest_bolts::shmem::{NopShMem, ShMem, UnixShMem};
    use serial_test::serial;

    use super::{
        clear_installed, install, location_hash, trace_location, CoverageMap, EdgeTracer,
        LHASH_INIT, MAP_SIZE,
    };
    use crate::config::SHM_ENV_VAR;

    fn sink_tracer() -> EdgeTracer {
        EdgeTracer::new(CoverageMap::Sink(NopShMem::new(MAP_SIZE)))
    }

    fn touched_slots(tracer: &EdgeTracer) -> Vec<usize> {
        tracer
            .map()
            .iter()
            .enumerate()
            .filter(|(_, &count)| count != 0)
            .map(|(slot, _)| slot)
            .collect()
    }

    #[test]
    fn empty_location_hashes_to_the_seed() {
        assert_eq!(location_hash("", 0), LHASH_INIT % MAP_SIZE as u32);
    }

    #[test]
    fn location_hash_is_stable_and_in_range() {
        let a = location_hash("lib/target.rb", 42);
        assert_eq!(a, location_hash("lib/target.rb", 42));
        assert!(a < MAP_SIZE as u32);
        assert_ne!(a, location_hash("lib/other.rb", 42));
        assert_ne!(a, location_hash("lib/target.rb", 43));
    }

    #[test]
    fn location_hash_matches_independently_folded_values() {
        // folded outside this crate from the same seed and multiplier;
        // the last one runs the offset loop over two bytes
        assert_eq!(location_hash("lib/target.rb", 42), 27600);
        assert_eq!(location_hash("a", 1), 53719);
        assert_eq!(location_hash("src/main.rs", 0xDEAD), 34535);
    }

    #[test]
    fn edge_direction_matters() {
        let mut forward = sink_tracer();
        forward.record_edge(2);
        forward.record_edge(4);

        let mut backward = sink_tracer();
        backward.record_edge(4);
        backward.record_edge(2);

        assert_ne!(touched_slots(&forward), touched_slots(&backward));
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        let mut tracer = sink_tracer();
        for _ in 0..300 {
            tracer.record_edge(42);
        }
        // first visit hits slot 42, every further one the 42 -> 42 edge
        assert_eq!(tracer.map()[42], 1);
        assert_eq!(tracer.map()[42 ^ (42 >> 1)], 255);
    }

    #[test]
    fn reset_forgets_the_previous_location() {
        let mut tracer = sink_tracer();
        tracer.record_edge(2);
        tracer.reset_edge_state();
        tracer.record_edge(2);
        assert_eq!(tracer.map()[2], 2);
    }

    #[test]
    #[serial]
    fn missing_segment_id_means_a_sink() {
        std::env::remove_var(SHM_ENV_VAR);
        let map = CoverageMap::from_env().unwrap();
        assert!(matches!(map, CoverageMap::Sink(_)));
    }

    #[test]
    #[serial]
    fn mangled_segment_id_is_fatal() {
        std::env::set_var(SHM_ENV_VAR, "not-a-segment");
        assert!(CoverageMap::from_env().is_err());
        std::env::remove_var(SHM_ENV_VAR);
    }

    #[test]
    #[serial]
    fn traced_edges_land_in_the_advertised_segment() {
        let mut segment = UnixShMem::new(MAP_SIZE).unwrap();
        segment.fill(0);
        segment.write_to_env(SHM_ENV_VAR).unwrap();

        let map = CoverageMap::from_env().unwrap();
        assert!(matches!(map, CoverageMap::Shared(_)));
        let mut tracer = EdgeTracer::new(map);
        tracer.record_edge(5);

        assert_eq!(segment[5], 1);
        std::env::remove_var(SHM_ENV_VAR);
    }

    #[test]
    #[serial]
    fn installing_twice_is_rejected() {
        install(sink_tracer()).unwrap();
        assert!(install(sink_tracer()).is_err());
        clear_installed();
    }

    #[test]
    fn hooks_without_a_tracer_are_harmless() {
        trace_location(123);
    }
}

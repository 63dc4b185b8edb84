//! SysV shared memory wrappers.
//!
//! A coverage-guided fuzzer allocates one shared segment per target and
//! advertises its id through an environment variable; the target attaches
//! the segment and writes hit counts into it. The segment belongs to the
//! fuzzer: an attached [`UnixShMem`] only detaches on drop, while a
//! self-allocated one also removes the segment.

use std::{
    env,
    fmt::{self, Debug, Display},
    ops::{Deref, DerefMut},
    ptr, slice,
};

use libc::{shmat, shmctl, shmdt, shmget};

use crate::Error;

/// An id usable to attach an existing shared memory segment.
///
/// For SysV segments this is the decimal `shmget` id, stored as a
/// nul-padded byte string so it can travel through the environment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ShMemId {
    id: [u8; 20],
}

impl ShMemId {
    /// Create a new id from an int
    #[must_use]
    pub fn from_int(val: i32) -> Self {
        Self::from_string(&val.to_string())
    }

    /// Create a new id from a string, truncated to 20 bytes
    #[must_use]
    pub fn from_string(val: &str) -> Self {
        let mut slice: [u8; 20] = [0; 20];
        for (dst, src) in slice.iter_mut().zip(val.as_bytes()) {
            *dst = *src;
        }
        Self { id: slice }
    }

    /// The id as a string slice, up to the first nul byte
    #[must_use]
    pub fn as_str(&self) -> &str {
        let nul_pos = self
            .id
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.id.len());
        core::str::from_utf8(&self.id[..nul_pos]).unwrap_or("")
    }

    /// Parse the id back into the OS-level segment id.
    ///
    /// Fails for ids that did not come out of `shmget`, for example a
    /// mangled environment variable.
    pub fn to_int(self) -> Result<i32, Error> {
        self.as_str()
            .parse()
            .map_err(|_| Error::illegal_argument(format!("Invalid shared memory id `{self}`")))
    }
}

impl Display for ShMemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An interface to a shared map
pub trait ShMem: Sized + Debug + DerefMut<Target = [u8]> {
    /// Get the id of this shared memory mapping
    fn id(&self) -> ShMemId;

    /// Advertise this map's id through the given environment variable, so
    /// a child process can attach the same segment
    fn write_to_env(&self, env_name: &str) -> Result<(), Error> {
        env::set_var(env_name, self.id().to_string());
        Ok(())
    }
}

/// A shared map backed by a SysV shared memory segment
pub struct UnixShMem {
    id: ShMemId,
    map: *mut u8,
    map_size: usize,
    owned: bool,
}

// The mapping stays valid until `Drop` detaches it, from any thread.
unsafe impl Send for UnixShMem {}

impl UnixShMem {
    /// Allocate a fresh segment of `map_size` bytes, using `shmget`/`shmat`.
    ///
    /// The new segment is owned: dropping the map removes it.
    pub fn new(map_size: usize) -> Result<Self, Error> {
        unsafe {
            let os_id = shmget(
                libc::IPC_PRIVATE,
                map_size,
                libc::IPC_CREAT | libc::IPC_EXCL | libc::SHM_R | libc::SHM_W,
            );
            if os_id < 0 {
                return Err(Error::last_os_error(format!(
                    "Failed to allocate a shared segment of size {map_size}"
                )));
            }

            let map = shmat(os_id, ptr::null(), 0).cast::<u8>();
            if map as isize == -1 || map.is_null() {
                shmctl(os_id, libc::IPC_RMID, ptr::null_mut());
                return Err(Error::last_os_error(
                    "Failed to attach the fresh shared segment",
                ));
            }

            Ok(Self {
                id: ShMemId::from_int(os_id),
                map,
                map_size,
                owned: true,
            })
        }
    }

    /// Attach the existing segment identified by `id`.
    ///
    /// The segment stays owned by whoever allocated it: dropping the map
    /// only detaches.
    pub fn from_id_and_size(id: ShMemId, map_size: usize) -> Result<Self, Error> {
        let id_int = id.to_int()?;
        unsafe {
            let map = shmat(id_int, ptr::null(), 0).cast::<u8>();
            if map as isize == -1 || map.is_null() {
                return Err(Error::last_os_error(format!(
                    "Failed to attach the shared segment with id {id_int}"
                )));
            }

            Ok(Self {
                id,
                map,
                map_size,
                owned: false,
            })
        }
    }

    /// Attach the segment whose id is advertised in the environment
    /// variable `env_name`
    pub fn existing_from_env(env_name: &str, map_size: usize) -> Result<Self, Error> {
        let id_str = env::var(env_name)?;
        Self::from_id_and_size(ShMemId::from_string(&id_str), map_size)
    }
}

impl ShMem for UnixShMem {
    fn id(&self) -> ShMemId {
        self.id
    }
}

impl Deref for UnixShMem {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.map, self.map_size) }
    }
}

impl DerefMut for UnixShMem {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.map, self.map_size) }
    }
}

impl Debug for UnixShMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixShMem")
            .field("id", &self.id)
            .field("map_size", &self.map_size)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Drop for UnixShMem {
    fn drop(&mut self) {
        unsafe {
            if self.owned {
                if let Ok(id_int) = self.id.to_int() {
                    shmctl(id_int, libc::IPC_RMID, ptr::null_mut());
                }
            }
            shmdt(self.map.cast());
        }
    }
}

/// A map with no shared backing, a plain process-local buffer.
///
/// Stands in for the coverage map when no fuzzer advertised a segment:
/// writes succeed and are discarded with the process.
#[derive(Clone, Debug, Default)]
pub struct NopShMem {
    id: ShMemId,
    buf: Vec<u8>,
}

impl NopShMem {
    /// Create a new buffer-backed map of `map_size` bytes
    #[must_use]
    pub fn new(map_size: usize) -> Self {
        Self {
            id: ShMemId::from_string("nop"),
            buf: vec![0; map_size],
        }
    }
}

impl ShMem for NopShMem {
    fn id(&self) -> ShMemId {
        self.id
    }
}

impl Deref for NopShMem {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for NopShMem {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

//! Typed shared memory: where the primitives actually live.
//!
//! The rest of the crate is built so that a zero-filled byte range is a
//! valid, ready-to-use object — this module is what produces such ranges.
//! Two flavors:
//!
//! - [`Shm<T, Mode>`]: a named POSIX shared-memory object (`shm_open` +
//!   `mmap`), for unrelated processes that rendezvous by path. The
//!   [`Creator`] / [`Opener`] typestate decides who unlinks the name.
//! - [`AnonShm<T>`]: an anonymous `MAP_SHARED` mapping, for a parent that
//!   forks its collaborators and hands the region down by inheritance.
//!
//! In both cases the kernel hands back zero-filled pages and **no
//! constructor ever runs inside the region** — for [`ShmSafe`] types the
//! all-zero image already is the initial state. That is what lets a process
//! crash, restart, and remap without wondering which constructors did or
//! did not run the first time.
//!
//! ```no_run
//! use std::sync::atomic::Ordering;
//! use vigil::{ProcLock, SharedAtomic, ShmSafe};
//! use vigil::shm::{Creator, Opener, Shm};
//!
//! #[derive(ShmSafe)]
//! #[repr(C)]
//! struct Slot {
//!     lock: ProcLock,
//!     hits: SharedAtomic<u64>,
//! }
//!
//! // Daemon: create the region; it starts all-zero, i.e. unlocked and 0.
//! let daemon_slot = Shm::<Slot, Creator>::create("/my-daemon-slot")?;
//!
//! // Any client: open it and coordinate.
//! let slot = Shm::<Slot, Opener>::open("/my-daemon-slot")?;
//! let guard = slot.lock.guard();
//! slot.hits.fetch_add(1, Ordering::SeqCst);
//! drop(guard);
//! # Ok::<(), vigil::shm::ShmError>(())
//! ```

use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{NonNull, null_mut};

use rustix::fd::OwnedFd;
use rustix::fs::{Mode, fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap};
use rustix::shm;
use thiserror::Error;

use crate::atomic::{AtomicValue, SharedAtomic};

/// Result alias for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors from creating, opening, or sizing shared memory.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The POSIX object name is malformed.
    #[error("invalid shared memory path `{path}`: {reason}")]
    InvalidPath {
        path: String,
        reason: &'static str,
    },
    /// A syscall refused.
    #[error("{op} failed for `{path}`")]
    Os {
        op: &'static str,
        path: String,
        #[source]
        errno: Errno,
    },
    /// An existing object is not `size_of::<T>()` bytes — somebody else's
    /// layout, or somebody else's version of ours.
    #[error("shared memory `{path}` holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: u64,
    },
}

impl ShmError {
    fn os(op: &'static str, path: &str, errno: Errno) -> Self {
        Self::Os {
            op,
            path: path.to_owned(),
            errno,
        }
    }
}

/// Types that may live in memory shared between processes.
///
/// # Safety
///
/// Implementers must guarantee all of the following:
///
/// - **Stable layout**: `#[repr(C)]` or `#[repr(transparent)]`; the
///   processes mapping the region may be separate builds.
/// - **Zero-valid**: the all-zero byte pattern is the type's valid initial
///   state. Regions are created zero-filled and no constructor ever runs
///   inside them.
/// - **No addresses**: no references, raw pointers, `Box`/`Vec`/`String`,
///   or anything else holding a process-local address.
/// - **Self-synchronizing**: concurrent access from several processes must
///   be mediated by the type itself (atomics, not `std::sync` types, which
///   are process-local).
/// - **Drop-independent**: a crashed process runs no destructors; the type
///   must not rely on `Drop` for soundness.
///
/// Use `#[derive(ShmSafe)]` for record types: it checks the layout and
/// address rules at compile time and emits recursive field bounds. The
/// zero-validity and synchronization rules remain the implementer's
/// promise.
pub unsafe trait ShmSafe: Send + Sync {}

macro_rules! impl_shm_safe {
    ($($ty:ty),* $(,)?) => {$(
        // SAFETY: plain inline data; all-zero is a valid (zero) value.
        unsafe impl ShmSafe for $ty {}
    )*};
}

impl_shm_safe! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool,
}

// SAFETY: element-wise application of the same contract.
unsafe impl<T: ShmSafe, const N: usize> ShmSafe for [T; N] {}

// SAFETY: the cell is the crate's unit of cross-process mutation; its
// AtomicValue contract already demands zero-validity and bitwise plainness.
unsafe impl<T: AtomicValue + Send> ShmSafe for SharedAtomic<T> {}

/// Unlink behavior, decided at the type level.
///
/// Internal to the typestate pattern; use the [`Creator`] and [`Opener`]
/// markers rather than implementing this.
pub trait ShmMode {
    /// Whether dropping the mapping also removes the POSIX name.
    const UNLINK_ON_DROP: bool;
}

/// Marker: this handle created the object and unlinks the name on drop.
pub struct Creator;

impl ShmMode for Creator {
    const UNLINK_ON_DROP: bool = true;
}

/// Marker: this handle opened an existing object and leaves the name alone.
pub struct Opener;

impl ShmMode for Opener {
    const UNLINK_ON_DROP: bool = false;
}

const POSIX_NAME_MAX: usize = 255;

fn validate_path(path: &str) -> Result<()> {
    let reason = if !path.starts_with('/') {
        "must start with '/'"
    } else if path[1..].contains('/') {
        "must not contain '/' after the first byte"
    } else if path.len() > POSIX_NAME_MAX {
        "must be at most 255 bytes"
    } else {
        return Ok(());
    };
    Err(ShmError::InvalidPath {
        path: path.to_owned(),
        reason,
    })
}

fn map_fd<T>(fd: &OwnedFd) -> std::result::Result<NonNull<T>, Errno> {
    // SAFETY: a fresh MAP_SHARED mapping of exactly size_of::<T>() bytes
    // over a descriptor of that size; page alignment satisfies any T; the
    // new mapping aliases no existing Rust object.
    let ptr = unsafe {
        mmap(
            null_mut(),
            size_of::<T>(),
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )?
    };
    // mmap never returns null on success.
    Ok(unsafe { NonNull::new_unchecked(ptr.cast()) })
}

/// A `T` living in a named POSIX shared-memory object.
///
/// Dereferences to `&T` for as long as the handle lives; the `Mode`
/// parameter ([`Creator`] or [`Opener`]) fixes the cleanup obligation at
/// compile time. Dropping unmaps, and a `Creator` additionally unlinks the
/// name — the memory itself persists until every process has unmapped.
pub struct Shm<T: ShmSafe, Mode: ShmMode> {
    ptr: NonNull<T>,
    path: String,
    _mode: PhantomData<Mode>,
}

// SAFETY: the pointer targets shared memory, not thread-local state, and
// T: ShmSafe already requires Send + Sync.
unsafe impl<T: ShmSafe, Mode: ShmMode> Send for Shm<T, Mode> {}
// SAFETY: as above.
unsafe impl<T: ShmSafe, Mode: ShmMode> Sync for Shm<T, Mode> {}

impl<T: ShmSafe> Shm<T, Creator> {
    /// Creates the object, sizes it, and maps it.
    ///
    /// `ftruncate` extends the fresh object with zero bytes, and for
    /// [`ShmSafe`] types the all-zero image is the initial state — there is
    /// no separate initialization step to race with.
    ///
    /// # Errors
    ///
    /// [`ShmError::InvalidPath`] for malformed names, [`ShmError::Os`] when
    /// the object already exists, permissions refuse, or resources run out.
    pub fn create(path: &str) -> Result<Self> {
        validate_path(path)?;

        let fd = shm::open(
            path,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|errno| ShmError::os("shm_open", path, errno))?;

        if let Err(errno) = ftruncate(&fd, size_of::<T>() as u64) {
            let _ = shm::unlink(path);
            return Err(ShmError::os("ftruncate", path, errno));
        }

        match map_fd::<T>(&fd) {
            Ok(ptr) => Ok(Self {
                ptr,
                path: path.to_owned(),
                _mode: PhantomData,
            }),
            Err(errno) => {
                let _ = shm::unlink(path);
                Err(ShmError::os("mmap", path, errno))
            }
        }
    }
}

impl<T: ShmSafe> Shm<T, Opener> {
    /// Opens and maps an object some other process created.
    ///
    /// # Errors
    ///
    /// [`ShmError::Os`] when the object is missing or permissions refuse;
    /// [`ShmError::SizeMismatch`] when it exists but is not exactly
    /// `size_of::<T>()` bytes.
    pub fn open(path: &str) -> Result<Self> {
        validate_path(path)?;

        let fd = shm::open(path, shm::OFlags::RDWR, Mode::empty())
            .map_err(|errno| ShmError::os("shm_open", path, errno))?;

        let stat = fstat(&fd).map_err(|errno| ShmError::os("fstat", path, errno))?;
        if stat.st_size as u64 != size_of::<T>() as u64 {
            return Err(ShmError::SizeMismatch {
                path: path.to_owned(),
                expected: size_of::<T>(),
                actual: stat.st_size as u64,
            });
        }

        let ptr = map_fd::<T>(&fd).map_err(|errno| ShmError::os("mmap", path, errno))?;
        Ok(Self {
            ptr,
            path: path.to_owned(),
            _mode: PhantomData,
        })
    }
}

impl<T: ShmSafe, Mode: ShmMode> Drop for Shm<T, Mode> {
    fn drop(&mut self) {
        // SAFETY: mapped at construction with exactly this length.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), size_of::<T>());
        }
        if Mode::UNLINK_ON_DROP {
            let _ = shm::unlink(&self.path);
        }
    }
}

impl<T: ShmSafe, Mode: ShmMode> Deref for Shm<T, Mode> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: mapped for the lifetime of self; ShmSafe types mediate
        // their own concurrent access.
        unsafe { self.ptr.as_ref() }
    }
}

/// A `T` living in an anonymous `MAP_SHARED` mapping.
///
/// Invisible to the filesystem and inherited across `fork()`: map before
/// forking and parent and children address the same physical pages. This is
/// the natural home for a [`ProcLock`](crate::lock::ProcLock) coordinating
/// a process tree.
pub struct AnonShm<T: ShmSafe> {
    ptr: NonNull<T>,
}

// SAFETY: as for Shm.
unsafe impl<T: ShmSafe> Send for AnonShm<T> {}
// SAFETY: as for Shm.
unsafe impl<T: ShmSafe> Sync for AnonShm<T> {}

impl<T: ShmSafe> AnonShm<T> {
    /// Maps a fresh zero-filled shared region sized for `T`.
    ///
    /// # Errors
    ///
    /// [`ShmError::Os`] when the kernel refuses the mapping.
    pub fn new() -> Result<Self> {
        // SAFETY: anonymous mapping, no descriptor, aliases nothing.
        let ptr = unsafe {
            mmap_anonymous(
                null_mut(),
                size_of::<T>(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
            )
        }
        .map_err(|errno| ShmError::os("mmap", "<anonymous>", errno))?;

        // SAFETY: mmap never returns null on success.
        Ok(Self {
            ptr: unsafe { NonNull::new_unchecked(ptr.cast()) },
        })
    }
}

impl<T: ShmSafe> Drop for AnonShm<T> {
    fn drop(&mut self) {
        // SAFETY: mapped at construction with exactly this length.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), size_of::<T>());
        }
    }
}

impl<T: ShmSafe> Deref for AnonShm<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: as for Shm.
        unsafe { self.ptr.as_ref() }
    }
}

//! Expanded process identity.
//!
//! A bare `pid_t` wraps and gets recycled; any protocol that stores "who
//! owns this" as a pid alone will eventually point at the wrong process.
//! [`ProcId`] closes that hole by packing the pid together with the
//! process's wall-clock start time into a single word that fits in a
//! [`SharedAtomic`], so ownership can be published, compared, and stolen
//! with one compare-exchange.
//!
//! Two processes would need the same pid *and* the same start time to
//! collide. Start-time resolution depends on the packed width:
//!
//! - on targets with statically lock-free 16-byte atomics the id is 128
//!   bits — pid in the high half, microseconds since the Unix epoch in the
//!   low half;
//! - elsewhere it is 64 bits — pid in the high half, whole seconds rebased
//!   to 2024-01-01 in the low 32, sub-second precision discarded.
//!
//! The width is fixed at compile time; ids from differently built binaries
//! do not mix.
//!
//! The all-zero value is the distinguished **null** id, which is what makes
//! a zero-filled shared region a meaningful initial state for types built
//! on top (see [`ProcLock`](crate::lock::ProcLock)).
//!
//! # Observability
//!
//! Asking the OS for a start time can fail: the process may be gone, a
//! zombie, or hidden by permissions. These cases are deliberately not told
//! apart — an unobservable process is treated as dead. Cooperating
//! processes must therefore be able to see each other (same user, or
//! a ptrace-readable relationship on hardened systems).

use core::fmt;
use core::sync::atomic::Ordering;
use std::sync::Once;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustix::io::Errno;
use thiserror::Error;

use vigil_derive::ShmSafe;

use crate::atomic::{AtomicValue, SharedAtomic};
use crate::trace;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use self::linux as sys;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use self::macos as sys;

/// Raw OS process number, as the kernel hands it out.
pub type RawPid = i32;

/// Packed representation: 128 bits where 16-byte atomics are statically
/// lock-free, 64 bits otherwise. Must stay in lockstep with the `u128`
/// gating in `atomic::repr`.
#[cfg(any(
    target_arch = "aarch64",
    all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
))]
type Packed = u128;
#[cfg(not(any(
    target_arch = "aarch64",
    all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
)))]
type Packed = u64;

/// Pid lives in the high half of the packed word.
const SHIFT: u32 = Packed::BITS / 2;

/// Seconds from the Unix epoch to 2024-01-01T00:00:00Z. The narrow variant
/// rebases its 32-bit seconds field here to extend its reach.
#[cfg(not(any(
    target_arch = "aarch64",
    all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
)))]
const EPOCH_OFFSET: u32 = 1_704_067_200;

/// A process identity that survives pid reuse.
///
/// Compact (one atomically exchangeable word), plain (`Copy`, zero-valid,
/// no destructor), and bitwise comparable: two ids are equal exactly when
/// both the pid and the (width-narrowed) start time match. The derived
/// order is total but carries no meaning beyond that.
///
/// An id outlives the process it names. Whether that process still exists
/// is a separate question — ask [`ProcId::observe`].
#[derive(ShmSafe, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ProcId(Packed);

// SAFETY: transparent over its packed unsigned integer; any bit pattern is
// a valid (if possibly meaningless) identifier, and all-zero is null.
unsafe impl AtomicValue for ProcId {
    type Repr = Packed;
}

impl ProcId {
    /// The null id: all-zero bytes, pid 0. Names no real process.
    pub const NULL: Self = Self(0);

    /// Identifies the running process `pid`, querying its start time now.
    ///
    /// # Errors
    ///
    /// [`NotObservable`] when the start time cannot be read — no such
    /// process, a terminal (zombie/dead) state, or insufficient
    /// permissions.
    pub fn new(pid: RawPid) -> Result<Self, NotObservable> {
        sys::start_time_of(pid).map(|stamp| Self::pack(pid, stamp))
    }

    /// Like [`ProcId::new`], with the failure collapsed to `None`.
    ///
    /// A `None` does not prove the process is gone — it proves the caller
    /// cannot see it, which protocols here treat as the same thing.
    #[must_use]
    pub fn observe(pid: RawPid) -> Option<Self> {
        sys::start_time_of(pid).ok().map(|stamp| Self::pack(pid, stamp))
    }

    /// Packs a pid and start time as given, without consulting the OS.
    ///
    /// For deserialization and tests. The result only compares equal to a
    /// live-queried id when the inputs came from one (modulo the narrow
    /// variant's truncation to whole seconds).
    #[must_use]
    pub fn from_parts(pid: RawPid, start_time: SystemTime) -> Self {
        Self::pack(pid, Stamp::from_system_time(start_time))
    }

    /// The calling process's own id.
    ///
    /// Computed once and cached for the life of the process; a fork hook
    /// resets the cache so a child observes itself, not its parent.
    ///
    /// # Panics
    ///
    /// Panics if the calling process cannot observe itself — on the
    /// supported platforms that means `/proc` is not mounted or the
    /// environment is broken in some equally fundamental way.
    #[must_use]
    pub fn current() -> Self {
        let cached = CURRENT.load(Ordering::Acquire);
        if !cached.is_null() {
            return cached;
        }
        refresh_current()
    }

    /// The pid field. The process need not be running.
    #[must_use]
    pub fn pid(self) -> RawPid {
        (self.0 >> SHIFT) as u32 as i32
    }

    /// The start-time field, at whatever precision the packing kept
    /// (microseconds for the wide variant, whole seconds for the narrow
    /// one).
    #[must_use]
    pub fn start_time(self) -> SystemTime {
        self.unpack_stamp().to_system_time()
    }

    /// Whether this is the null id.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    fn pack(pid: RawPid, stamp: Stamp) -> Self {
        let micros = stamp.secs * 1_000_000 + u64::from(stamp.micros);
        Self((Packed::from(pid as u32) << SHIFT) | Packed::from(micros))
    }

    #[cfg(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    ))]
    fn unpack_stamp(self) -> Stamp {
        let micros = self.0 as u64;
        Stamp {
            secs: micros / 1_000_000,
            micros: (micros % 1_000_000) as u32,
        }
    }

    #[cfg(not(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    )))]
    fn pack(pid: RawPid, stamp: Stamp) -> Self {
        // The wrapping cast keeps equality bitwise-stable even for clocks
        // set before the rebase point.
        let secs = (stamp.secs as u32).wrapping_sub(EPOCH_OFFSET);
        Self((Packed::from(pid as u32) << SHIFT) | Packed::from(secs))
    }

    #[cfg(not(any(
        target_arch = "aarch64",
        all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
    )))]
    fn unpack_stamp(self) -> Stamp {
        Stamp {
            secs: u64::from(EPOCH_OFFSET) + u64::from(self.0 as u32),
            micros: 0,
        }
    }
}

impl fmt::Debug for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("ProcId(null)");
        }
        f.debug_struct("ProcId")
            .field("pid", &self.pid())
            .field("start_time", &self.start_time())
            .finish()
    }
}

/// The start time of a process could not be read.
///
/// Covers "no such process", terminal (zombie/dead) states, and permission
/// failures alike; the distinction is deliberately not surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot observe start time of process {pid}")]
pub struct NotObservable {
    /// The pid the query was about.
    pub pid: RawPid,
    /// The OS error, when the failure came out of a syscall rather than a
    /// terminal process state.
    #[source]
    pub errno: Option<Errno>,
}

/// Wall-clock instant as seconds + microseconds since the Unix epoch; the
/// common currency between the OS queries and the packing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Stamp {
    pub(crate) secs: u64,
    pub(crate) micros: u32,
}

impl Stamp {
    fn from_system_time(t: SystemTime) -> Self {
        // Real start times never precede the epoch; a nonsense input just
        // packs as the origin.
        let d = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self {
            secs: d.as_secs(),
            micros: d.subsec_micros(),
        }
    }

    fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.secs, self.micros * 1_000)
    }
}

/// Process-local cache for [`ProcId::current`]; null means "not computed".
static CURRENT: SharedAtomic<ProcId> = SharedAtomic::zeroed();

#[cold]
fn refresh_current() -> ProcId {
    static HOOK: Once = Once::new();

    // The child-side hook must be installed before the first value is ever
    // cached: a forked child can then never inherit a stale id without also
    // inheriting the hook that clears it.
    HOOK.call_once(|| {
        // SAFETY: registering a handler whose body is a single atomic store.
        unsafe { libc::pthread_atfork(None, None, Some(clear_current_after_fork)) };
    });

    let pid = os_pid();
    let id = match ProcId::new(pid) {
        Ok(id) => id,
        Err(err) => panic!("cannot identify the calling process: {err}"),
    };
    CURRENT.store(id, Ordering::Release);
    trace::trace!("cached identity of pid {pid}");
    id
}

/// Runs in the child after `fork()`, where exactly one thread exists. The
/// next `current()` call recomputes the child's own identity.
unsafe extern "C" fn clear_current_after_fork() {
    CURRENT.store(ProcId::NULL, Ordering::Release);
}

fn os_pid() -> RawPid {
    rustix::process::getpid().as_raw_nonzero().get()
}

#[cfg(feature = "serde")]
mod serde_impl {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{ProcId, RawPid, Stamp};

    /// Wire form: explicit parts, independent of the packed width.
    #[derive(Serialize, Deserialize)]
    #[serde(rename = "ProcId")]
    struct Parts {
        pid: RawPid,
        secs: u64,
        micros: u32,
    }

    impl Serialize for ProcId {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let stamp = self.unpack_stamp();
            Parts {
                pid: self.pid(),
                secs: stamp.secs,
                micros: stamp.micros,
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for ProcId {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let parts = Parts::deserialize(deserializer)?;
            Ok(ProcId::pack(
                parts.pid,
                Stamp {
                    secs: parts.secs,
                    micros: parts.micros,
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_properties() {
        assert!(ProcId::NULL.is_null());
        assert_eq!(ProcId::NULL.pid(), 0);
        assert_eq!(ProcId::default(), ProcId::NULL);
        assert_eq!(format!("{:?}", ProcId::NULL), "ProcId(null)");
    }

    #[test]
    fn packed_width_matches_target() {
        assert_eq!(size_of::<ProcId>(), size_of::<Packed>());
        #[cfg(any(
            target_arch = "aarch64",
            all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
        ))]
        assert_eq!(size_of::<ProcId>(), 16);
        #[cfg(not(any(
            target_arch = "aarch64",
            all(target_arch = "x86_64", target_feature = "cmpxchg16b"),
        )))]
        assert_eq!(size_of::<ProcId>(), 8);
    }

    #[test]
    fn current_matches_the_os_pid() {
        let me = ProcId::current();
        assert_eq!(me.pid(), os_pid());
        assert!(!me.is_null());
        // Stable across calls within one process.
        assert_eq!(me, ProcId::current());
    }

    #[test]
    fn observing_ourselves_agrees_with_current() {
        let me = ProcId::current();
        assert_eq!(ProcId::observe(os_pid()), Some(me));
        assert_eq!(ProcId::new(os_pid()).unwrap(), me);
    }

    #[test]
    fn parts_round_trip() {
        let me = ProcId::current();
        let rebuilt = ProcId::from_parts(me.pid(), me.start_time());
        assert_eq!(rebuilt, me);
        assert_eq!(rebuilt.pid(), me.pid());
        assert_eq!(rebuilt.start_time(), me.start_time());
    }

    #[test]
    fn pid_survives_packing_for_edge_values() {
        let t = UNIX_EPOCH + Duration::from_secs(1_750_000_000);
        for pid in [1, 2, 0x7fff_ffff] {
            assert_eq!(ProcId::from_parts(pid, t).pid(), pid);
        }
    }

    #[test]
    fn equality_is_bitwise_on_both_fields() {
        let t = UNIX_EPOCH + Duration::from_secs(1_750_000_000);
        let a = ProcId::from_parts(100, t);
        let b = ProcId::from_parts(100, t + Duration::from_secs(5));
        let c = ProcId::from_parts(101, t);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ProcId::from_parts(100, t));
    }

    #[test]
    fn not_observable_mentions_the_pid() {
        let err = NotObservable {
            pid: 1234,
            errno: Some(Errno::SRCH),
        };
        assert!(err.to_string().contains("1234"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_round_trip() {
        let me = ProcId::current();
        let json = serde_json::to_string(&me).unwrap();
        let back: ProcId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, me);
    }
}

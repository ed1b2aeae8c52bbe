//! Coordination primitives for cooperating processes that share a memory
//! region.
//!
//! Three layers, each one word of state away from the next:
//!
//! - [`SharedAtomic<T>`] — an atomic cell with the exact representation of
//!   its value, valid when materialized from zero-filled bytes, so it can
//!   live in a memory-mapped file or shared-memory segment that no Rust
//!   constructor ever touched.
//! - [`ProcId`] — a process identity that packs the pid together with the
//!   process's start time, closing the pid-reuse hole; one word, atomically
//!   exchangeable.
//! - [`ProcLock`] — a robust inter-process mutex whose entire state is a
//!   `SharedAtomic<ProcId>`: null means unlocked, anything else names the
//!   holder. If the holder dies — even holding the lock — any other
//!   process detects the stale identity and steals the lock back.
//!
//! The [`shm`] module supplies the regions themselves (named POSIX objects
//! and anonymous fork-shared mappings), and `#[derive(ShmSafe)]` checks
//! record types for cross-process placement at compile time.
//!
//! ```no_run
//! use std::sync::atomic::Ordering;
//! use vigil::shm::AnonShm;
//! use vigil::{ProcLock, SharedAtomic, ShmSafe};
//!
//! #[derive(ShmSafe)]
//! #[repr(C)]
//! struct Scoreboard {
//!     lock: ProcLock,
//!     total: SharedAtomic<u64>,
//! }
//!
//! // Zero-filled pages are a ready-to-use Scoreboard: unlocked, total 0.
//! let board = AnonShm::<Scoreboard>::new()?;
//!
//! // ... fork children; each inherits the mapping ...
//! let guard = board.lock.guard();
//! let n = board.total.load(Ordering::Relaxed);
//! board.total.store(n + 1, Ordering::Relaxed);
//! drop(guard);
//! # Ok::<(), vigil::shm::ShmError>(())
//! ```

// Allow the crate to reference itself as ::vigil for derive macro usage.
extern crate self as vigil;

pub mod atomic;
pub mod lock;
pub mod proc_id;
pub mod shm;

mod trace;

pub use trace::init_tracing;

#[doc(inline)]
pub use vigil_derive::ShmSafe;

#[doc(inline)]
pub use shm::ShmSafe;

// Hidden re-export for the derive macro.
#[doc(hidden)]
pub use shm::ShmSafe as __ShmSafePrivate;

pub use atomic::{AtomicArithmetic, AtomicBitwise, AtomicValue, SharedAtomic};
pub use lock::{ProcLock, ProcLockGuard};
pub use proc_id::{NotObservable, ProcId, RawPid};

//! A robust mutex for processes that share a memory region.
//!
//! [`ProcLock`] is one word of state: a [`SharedAtomic<ProcId>`] that is
//! either null (unlocked) or the identity of the holding process. That
//! makes it an implicit-lifetime type like everything else in this crate —
//! a zero-filled region *is* an unlocked lock — and it makes the lock
//! **robust**: when the holder dies, every other process can see a holder
//! that no longer observably exists, clear the stale claim, and move on.
//! No kernel registration, no `EOWNERDEAD` plumbing.
//!
//! # Granularity and fairness
//!
//! Ownership is per *process*: every thread of the holder looks like the
//! same owner to the protocol, and the lock is not re-entrant — a second
//! `try_lock` from the holding process returns `false`. There is no
//! fairness of any kind; [`ProcLock::lock`] is a yield loop.
//!
//! # Caveats
//!
//! A live holder whose start time the caller cannot read (crossed
//! privilege boundaries, hardened proc visibility) is indistinguishable
//! from a dead one and will be stolen from. Cooperating processes must be
//! able to observe each other. The lock also assumes cooperating writers;
//! it cannot defend the region against vandalism.
//!
//! ```
//! use vigil::ProcLock;
//!
//! let lock = ProcLock::new();
//! assert!(lock.try_lock());
//! assert!(!lock.try_lock()); // same process: no re-entry
//! lock.unlock();
//! ```

use core::fmt;
use core::sync::atomic::Ordering;
use std::thread;

use vigil_derive::ShmSafe;

use crate::atomic::SharedAtomic;
use crate::proc_id::ProcId;
use crate::trace;

/// Inter-process mutex whose entire state is the holder's [`ProcId`].
///
/// Same size and alignment as `SharedAtomic<ProcId>`; all-zero bytes are a
/// valid unlocked lock, so mapped-and-truncated shared memory needs no
/// further setup. Every transition is a sequentially consistent
/// compare-and-swap or exchange, so an acquirer sees everything the
/// previous holder published — including a holder it stole from.
#[derive(ShmSafe, Default)]
#[repr(transparent)]
pub struct ProcLock {
    holder: SharedAtomic<ProcId>,
}

impl ProcLock {
    /// A new, unlocked lock (the all-zero state).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            holder: SharedAtomic::zeroed(),
        }
    }

    /// Tries to take the lock without blocking.
    ///
    /// Returns `false` when a live process holds it — including the calling
    /// process itself; the lock is not re-entrant. A holder that cannot be
    /// observed, or whose pid now belongs to a different process, is
    /// presumed dead: its claim is cleared and acquisition is retried once
    /// before giving an answer.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.try_lock_as(ProcId::current())
    }

    /// Takes the lock, yielding to the scheduler between attempts.
    ///
    /// No timeout and no fairness; returns only with the lock held.
    pub fn lock(&self) {
        let me = ProcId::current();
        while !self.try_lock_as(me) {
            thread::yield_now();
        }
    }

    /// Releases the lock.
    ///
    /// The holder word is cleared unconditionally with an exchange, so a
    /// misuse (releasing a lock somebody else holds) clears their claim
    /// rather than deadlocking on it; debug builds assert that the prior
    /// holder really was the calling process.
    pub fn unlock(&self) {
        let prev = self.holder.swap(ProcId::NULL, Ordering::SeqCst);
        debug_assert_eq!(prev, ProcId::current(), "ProcLock released by a non-holder");
    }

    /// Takes the lock and returns a guard that releases it on drop.
    pub fn guard(&self) -> ProcLockGuard<'_> {
        self.lock();
        ProcLockGuard { lock: self }
    }

    /// Like [`guard`](Self::guard), without blocking.
    #[must_use]
    pub fn try_guard(&self) -> Option<ProcLockGuard<'_>> {
        self.try_lock().then(|| ProcLockGuard { lock: self })
    }

    /// The process currently holding the lock, if any.
    ///
    /// Purely diagnostic — the answer can be stale by the time it returns.
    #[must_use]
    pub fn holder(&self) -> Option<ProcId> {
        let seen = self.holder.load(Ordering::SeqCst);
        (!seen.is_null()).then_some(seen)
    }

    fn try_lock_as(&self, me: ProcId) -> bool {
        let seen = match self.acquire(me) {
            Ok(_) => return true,
            Err(seen) => seen,
        };

        if seen == me {
            // Some thread of this process already holds it; no re-entry.
            return false;
        }

        match ProcId::observe(seen.pid()) {
            // The holder is alive and is who the lock says it is.
            Some(live) if live == seen => false,
            // Gone, or the pid now names a different process. Peel the
            // stale claim off and retry once; losing either race to a
            // legitimate release or another stealer is fine — somebody
            // made progress, and blocking callers come back around.
            _ => {
                trace::debug!("stealing lock from unobservable holder {seen:?}");
                let _ = self
                    .holder
                    .compare_exchange(seen, ProcId::NULL, Ordering::SeqCst, Ordering::SeqCst);
                self.acquire(me).is_ok()
            }
        }
    }

    #[inline]
    fn acquire(&self, me: ProcId) -> Result<ProcId, ProcId> {
        self.holder
            .compare_exchange(ProcId::NULL, me, Ordering::SeqCst, Ordering::SeqCst)
    }
}

impl fmt::Debug for ProcLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcLock")
            .field("holder", &self.holder())
            .finish()
    }
}

/// Releases its [`ProcLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ProcLockGuard<'a> {
    lock: &'a ProcLock,
}

impl Drop for ProcLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl fmt::Debug for ProcLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcLockGuard").finish_non_exhaustive()
    }
}

//! Contended [`SharedAtomic`] counters living in shared mappings.
//!
//! The cells are never constructed in the region — the kernel's zero-fill
//! is the construction — and the arithmetic must still come out exact.

use std::sync::atomic::Ordering::{Relaxed, SeqCst};

use vigil::SharedAtomic;
use vigil::shm::AnonShm;

/// Many threads CAS-spin-incrementing one zero-initialized cell.
#[test]
fn cas_spin_increments_are_exact() {
    const THREADS: u32 = 8;
    const ITERS: u32 = 25_000;

    let cell = AnonShm::<SharedAtomic<u32>>::new().expect("anonymous mapping");
    assert_eq!(cell.load(SeqCst), 0);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ITERS {
                    let mut cur = cell.load(Relaxed);
                    loop {
                        match cell.compare_exchange_weak(cur, cur + 1, SeqCst, Relaxed) {
                            Ok(_) => break,
                            Err(seen) => cur = seen,
                        }
                    }
                }
            });
        }
    });

    assert_eq!(cell.load(SeqCst), THREADS * ITERS);
}

/// Several processes fetch_add-ing into one inherited cell.
#[test]
fn fetch_add_is_exact_across_processes() {
    const PROCS: u64 = 4;
    const ITERS: u64 = 10_000;

    let cell = AnonShm::<SharedAtomic<u64>>::new().expect("anonymous mapping");

    let mut pids = Vec::new();
    for _ in 0..PROCS {
        // SAFETY: the child only touches the shared cell and _exit.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            for _ in 0..ITERS {
                cell.fetch_add(1, SeqCst);
            }
            // SAFETY: immediate exit.
            unsafe { libc::_exit(0) };
        }
        pids.push(pid);
    }

    for pid in pids {
        let mut status = 0;
        // SAFETY: pid is an unreaped child of ours.
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0);
    }

    assert_eq!(cell.load(SeqCst), PROCS * ITERS);
}

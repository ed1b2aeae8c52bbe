//! Process identity across real fork boundaries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use vigil::shm::AnonShm;
use vigil::{ProcId, SharedAtomic};

use std::sync::atomic::Ordering::SeqCst;

fn fork() -> libc::pid_t {
    // SAFETY: children below only touch shared mappings, procfs, and _exit.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    pid
}

fn wait_for(pid: libc::pid_t) -> i32 {
    let mut status = 0;
    // SAFETY: pid is a child we forked and have not reaped.
    let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(reaped, pid, "waitpid failed");
    status
}

#[test]
fn dead_reaped_child_is_not_observable() {
    let pid = fork();
    if pid == 0 {
        // SAFETY: immediate exit; no harness state touched.
        unsafe { libc::_exit(0) };
    }
    wait_for(pid);

    // Reaped: the pid names nothing (unless the OS re-issued it in the
    // last microsecond, which the original accepts as a non-risk too).
    assert_eq!(ProcId::observe(pid), None);
    let err = ProcId::new(pid).unwrap_err();
    assert_eq!(err.pid, pid);
}

#[test]
fn child_observes_itself_not_its_parent() {
    let mailbox = AnonShm::<SharedAtomic<ProcId>>::new().expect("anonymous mapping");

    // Prime the parent's cache (and the fork hook) before forking.
    let parent = ProcId::current();

    let pid = fork();
    if pid == 0 {
        mailbox.store(ProcId::current(), SeqCst);
        // SAFETY: work done; skip the test harness entirely.
        unsafe { libc::_exit(0) };
    }
    let status = wait_for(pid);
    assert!(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0);

    let child = mailbox.load(SeqCst);
    assert_eq!(child.pid(), pid, "child must report its own pid");
    assert_ne!(child, parent, "child must not inherit the parent's cache");

    // The parent's own cache is untouched by the child's fork hook.
    assert_eq!(ProcId::current(), parent);
}

#[test]
fn running_child_round_trips_through_parts() {
    let mut fds = [0i32; 2];
    // SAFETY: plain pipe creation.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

    let pid = fork();
    if pid == 0 {
        let mut byte = 0u8;
        // SAFETY: blocking read on the inherited pipe, then exit.
        unsafe {
            libc::read(fds[0], (&raw mut byte).cast(), 1);
            libc::_exit(0);
        }
    }

    // The child is alive (parked on the pipe), so it is observable.
    let id = ProcId::new(pid).expect("a parked child is observable");
    assert_eq!(id.pid(), pid);

    let rebuilt = ProcId::from_parts(id.pid(), id.start_time());
    assert_eq!(rebuilt, id);

    // SAFETY: release the child and tidy up the pipe.
    unsafe {
        libc::write(fds[1], b"x".as_ptr().cast(), 1);
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
    wait_for(pid);
}

#[test]
fn start_time_is_plausible() {
    let start = ProcId::current().start_time();
    assert!(start > UNIX_EPOCH, "started after 1970");
    assert!(
        start <= SystemTime::now() + Duration::from_secs(2),
        "not started in the future"
    );
}

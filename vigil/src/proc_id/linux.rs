//! Start-time discovery through procfs.
//!
//! The per-pid query stays allocation-free and sticks to raw syscalls: the
//! lock's steal check runs it inside acquisition spin loops, and a hot path
//! that mallocs per retry is a hot path that eventually stalls.
//!
//! `/proc/<pid>/stat` puts the process state in field 3 and the start time
//! (clock ticks since boot) in field 22, but field 2 is the parenthesized
//! command name, which may itself contain spaces and parentheses. Scanning
//! therefore resumes after the *last* `)` in the line.

use std::ffi::CStr;
use std::sync::OnceLock;

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

use super::{NotObservable, RawPid, Stamp};

/// One stat line: the command name is capped at 16 bytes and the numeric
/// fields total well under a kilobyte, so a single fixed read suffices.
const STAT_BUF: usize = 2048;

pub(super) fn start_time_of(pid: RawPid) -> Result<Stamp, NotObservable> {
    let path = StatPath::new(pid);
    let mut buf = [0u8; STAT_BUF];
    let n = read_file(path.as_cstr(), &mut buf)
        .map_err(|errno| NotObservable { pid, errno: Some(errno) })?;
    let ticks = parse_start_ticks(&buf[..n]).ok_or(NotObservable { pid, errno: None })?;

    let hz = rustix::param::clock_ticks_per_second();
    Ok(Stamp {
        secs: boot_time_secs() + ticks / hz,
        micros: ((ticks % hz) * (1_000_000 / hz)) as u32,
    })
}

/// Boot time from the `btime` line of `/proc/stat`, read once per process.
///
/// # Panics
///
/// Panics on first use if the line is missing: start times are expressed as
/// ticks since boot and cannot be anchored without it.
fn boot_time_secs() -> u64 {
    static BOOT_TIME: OnceLock<u64> = OnceLock::new();
    *BOOT_TIME.get_or_init(|| {
        let stat = std::fs::read_to_string("/proc/stat")
            .unwrap_or_else(|err| panic!("cannot read /proc/stat: {err}"));
        stat.lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|rest| rest.trim().parse().ok())
            .expect("/proc/stat has no btime line")
    })
}

fn read_file(path: &CStr, buf: &mut [u8]) -> Result<usize, Errno> {
    let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())?;
    loop {
        match rustix::io::read(&fd, &mut *buf) {
            Ok(n) => return Ok(n),
            Err(Errno::INTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
}

/// Extracts field 22 (start ticks) from a stat line, or `None` for
/// unparseable input and for processes in a terminal state.
fn parse_start_ticks(stat: &[u8]) -> Option<u64> {
    let close = stat.iter().rposition(|&b| b == b')')?;
    // Everything after the comm is plain ASCII.
    let tail = core::str::from_utf8(&stat[close + 1..]).ok()?;
    let mut fields = tail.split_ascii_whitespace();

    match fields.next()? {
        // Zombie ('Z') and dead ('X', and 'x' on older kernels) processes
        // no longer count as observable.
        "Z" | "X" | "x" => return None,
        _ => {}
    }

    // The state was field 3; skip fields 4 through 21.
    fields.nth(18)?.parse().ok()
}

/// `/proc/<pid>/stat` rendered into a stack buffer, NUL-terminated.
struct StatPath {
    buf: [u8; 32],
    len: usize,
}

impl StatPath {
    fn new(pid: RawPid) -> Self {
        let mut buf = [0u8; 32];
        let mut len = 0;
        for &b in b"/proc/" {
            buf[len] = b;
            len += 1;
        }

        // A negative pid (decoded from corrupt shared bytes, say) renders
        // as its unsigned image and simply fails the open with ENOENT.
        let mut digits = [0u8; 10];
        let mut n = 0;
        let mut v = pid as u32;
        loop {
            digits[n] = b'0' + (v % 10) as u8;
            n += 1;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        while n > 0 {
            n -= 1;
            buf[len] = digits[n];
            len += 1;
        }

        for &b in b"/stat" {
            buf[len] = b;
            len += 1;
        }
        // The buffer started zeroed; claim one byte as the terminator.
        len += 1;
        Self { buf, len }
    }

    fn as_cstr(&self) -> &CStr {
        CStr::from_bytes_with_nul(&self.buf[..self.len]).expect("path has a single trailing NUL")
    }
}

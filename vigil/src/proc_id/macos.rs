//! Start-time discovery through `proc_pidinfo`.
//!
//! One syscall, no filesystem: the kernel fills a `proc_bsdinfo` whose
//! `pbi_start_tvsec`/`pbi_start_tvusec` are the start time directly. Any
//! short or failed read (ESRCH, EPERM, a zombie) maps to "not observable".

use std::mem::MaybeUninit;

use rustix::io::Errno;

use super::{NotObservable, RawPid, Stamp};

/// `PROC_PIDTBSDINFO` flavor from `<sys/proc_info.h>`; not exported by libc.
const PROC_PIDTBSDINFO: libc::c_int = 3;

pub(super) fn start_time_of(pid: RawPid) -> Result<Stamp, NotObservable> {
    let mut info = MaybeUninit::<libc::proc_bsdinfo>::uninit();
    let want = size_of::<libc::proc_bsdinfo>() as libc::c_int;

    // SAFETY: the buffer is sized for a proc_bsdinfo and only read back
    // after a full-length return.
    let got = unsafe {
        libc::proc_pidinfo(pid, PROC_PIDTBSDINFO, 0, info.as_mut_ptr().cast(), want)
    };
    if got != want {
        let errno = Errno::from_io_error(&std::io::Error::last_os_error());
        return Err(NotObservable { pid, errno });
    }

    // SAFETY: the kernel filled the whole structure.
    let info = unsafe { info.assume_init() };
    Ok(Stamp {
        secs: info.pbi_start_tvsec,
        micros: info.pbi_start_tvusec as u32,
    })
}

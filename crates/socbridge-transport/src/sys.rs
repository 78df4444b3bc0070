//! Thin wrappers over the libc calls shared by the device links.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Wait until `fd` reports `events` or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. Hang-up and error conditions are reported
/// as `BrokenPipe` so callers can treat the link as lost.
pub(crate) fn wait_ready(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = libc::c_int::try_from(remaining.as_millis()).unwrap_or(libc::c_int::MAX);
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of one.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device hung up",
            ));
        }
        if pfd.revents & events != 0 {
            return Ok(true);
        }
    }
}

/// Issue an `ioctl` that takes an integer argument.
#[cfg(target_os = "linux")]
pub(crate) fn ioctl_arg(fd: RawFd, request: libc::c_ulong, arg: libc::c_ulong) -> io::Result<()> {
    // SAFETY: the request codes used with this helper take their argument by
    // value, and `fd` is an open descriptor owned by the caller.
    let rc = unsafe { libc::ioctl(fd, request as _, arg) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Issue an `ioctl` that reads its argument through a pointer.
#[cfg(target_os = "linux")]
pub(crate) fn ioctl_ptr<T>(fd: RawFd, request: libc::c_ulong, arg: &T) -> io::Result<()> {
    // SAFETY: `arg` points to a live value of the size encoded in `request`,
    // and `fd` is an open descriptor owned by the caller.
    let rc = unsafe { libc::ioctl(fd, request as _, arg as *const T) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

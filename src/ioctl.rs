//! Thin wrappers over the kernel capture interface.

use std::io;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use v4l::v4l2;
use v4l::v4l2::vidioc;

/// Issue an ioctl, retrying while interrupted by a signal.
///
/// # Safety
///
/// `argp` must point to a value of the type the request expects, valid for
/// the duration of the call.
pub(crate) unsafe fn xioctl(
    fd: RawFd,
    request: vidioc::_IOC_TYPE,
    argp: *mut c_void,
) -> io::Result<()> {
    loop {
        match v4l2::ioctl(fd, request, argp) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

/// Wait for the descriptor to become readable, for up to `timeout`.
///
/// Returns `false` when the wait expired with no data ready. Interrupted
/// waits are retried with the remaining budget.
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        #[allow(clippy::cast_possible_truncation)]
        let millis = remaining.as_millis().min(i32::MAX as u128) as libc::c_int;
        let mut fds = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut fds, 1, millis) };
        match ready {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
            0 => return Ok(false),
            _ => return Ok(true),
        }
    }
}

//! Platform-specific cooperative termination

use std::io;
use tokio::process::Child;

/// Ask the worker to shut down on its own
///
/// Sends SIGTERM on Unix. A process that is already gone counts as success.
#[cfg(unix)]
pub(crate) fn request_graceful_termination(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // None once the child has been reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Ask the worker to shut down on its own
///
/// Uses the native terminate request (`TerminateProcess` on Windows).
#[cfg(not(unix))]
pub(crate) fn request_graceful_termination(child: &mut Child) -> io::Result<()> {
    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(_) if child.id().is_none() => Ok(()),
        Err(e) => Err(e),
    }
}

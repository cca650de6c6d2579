//! Process detachment

use crate::{Error, Result};

/// Detach from the controlling terminal and continue in the background
///
/// The working directory is kept so relative channel and device paths still resolve.
/// Standard streams are redirected to `/dev/null`.
pub fn daemonize() -> Result<()> {
    // SAFETY: daemon() forks and calls setsid; no other threads exist at this point.
    let ret = unsafe { libc::daemon(1, 0) };
    if ret == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

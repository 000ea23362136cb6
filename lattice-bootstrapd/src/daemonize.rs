use std::fs::{File, OpenOptions};
use std::io::Write;

use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, close, fork, setsid, ForkResult};

use crate::error::DaemonError;

/// Detach the process into a background service instance.
///
/// The PID file is opened create-or-append before the fork; the parent
/// writes the child's PID into the already-open handle and exits 0, so
/// only the child ever returns from this function. The child starts a
/// new session, moves to `/` and, unless `keep_std_streams` is set,
/// closes stdin/stdout/stderr so it runs silently.
pub fn detach(pid_file_path: &str, keep_std_streams: bool) -> Result<(), DaemonError> {
    let mut pid_file = open_pid_file(pid_file_path)?;

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            if let Err(e) = write!(pid_file, "{}", child.as_raw()) {
                tracing::error!("couldn't write PID to '{}': {}", pid_file_path, e);
                std::process::exit(1);
            }
            tracing::info!("forked successfully: PID: {}", child.as_raw());
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {
            drop(pid_file);
        }
        Err(e) => {
            return Err(DaemonError::Daemonize {
                reason: format!("fork failed: {}", e),
            });
        }
    }

    umask(Mode::empty());

    setsid().map_err(|e| DaemonError::Daemonize {
        reason: format!("couldn't create a new session: {}", e),
    })?;

    chdir("/").map_err(|e| DaemonError::Daemonize {
        reason: format!("couldn't change working directory to '/': {}", e),
    })?;

    if !keep_std_streams {
        for fd in 0..3 {
            let _ = close(fd);
        }
    }

    Ok(())
}

/// Open the PID file create-or-append. Entries from a prior run are
/// deliberately not cleared.
fn open_pid_file(path: &str) -> Result<File, DaemonError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| DaemonError::Daemonize {
            reason: format!("couldn't open the PID file '{}' for writing: {}", path, e),
        })
}

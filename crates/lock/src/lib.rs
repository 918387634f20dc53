//! Directory-based advisory lock with liveness-probe staleness
//! detection (spec.md §4.14).
//!
//! # Design
//!
//! The lock is a directory containing one file, `ior`, holding
//! `<pid>:<endpoint-or-none>`. Acquisition distinguishes three cases:
//! the directory didn't exist (acquire cleanly); it exists and `ior`
//! says `none` (owned by a non-daemon tool — only a daemon caller may
//! steal it; a tool caller fails); it exists and `ior` names a real
//! endpoint (ping it — a response means a live peer holds the lock, a
//! failure means it's stale and safe to steal).
//!
//! # Errors
//!
//! Every failure path returns [`error::ErrorKind::LockFailed`] except
//! a structurally corrupt `ior` file, which returns
//! [`error::ErrorKind::Corrupt`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use error::{ConfError, ConfResult, ErrorKind};

/// A held lock. Dropping without calling [`LockHandle::release`]
/// leaves the lock on disk for the next liveness probe to reclaim —
/// there is no `Drop`-based auto-release, matching the original's
/// explicit release call.
pub struct LockHandle {
    lockdir: PathBuf,
    pid: u32,
}

impl LockHandle {
    #[must_use]
    pub fn lockdir(&self) -> &Path {
        &self.lockdir
    }

    /// Reads `ior`; if its pid doesn't match ours, logs a warning and
    /// proceeds anyway (spec.md §4.14 "Release"). Unlinks `ior`, then
    /// removes the now-empty lock directory.
    pub fn release(self) -> ConfResult<()> {
        let ior_path = self.lockdir.join("ior");
        if let Ok(contents) = fs::read_to_string(&ior_path) {
            if let Ok((pid, _)) = parse_ior(&contents) {
                if pid != self.pid {
                    warn(&format!(
                        "releasing lock at {:?} held by pid {pid}, not our pid {}",
                        self.lockdir, self.pid
                    ));
                }
            }
        }
        let _ = fs::remove_file(&ior_path);
        fs::remove_dir(&self.lockdir).map_err(|e| ConfError::new(ErrorKind::Failed, e.to_string()))?;
        Ok(())
    }
}

fn parse_ior(s: &str) -> ConfResult<(u32, Option<String>)> {
    let s = s.trim();
    let (pid_str, endpoint) = s
        .split_once(':')
        .ok_or_else(|| ConfError::new(ErrorKind::Corrupt, format!("malformed ior contents: {s:?}")))?;
    let pid: u32 = pid_str
        .parse()
        .map_err(|_| ConfError::new(ErrorKind::Corrupt, format!("malformed ior pid: {pid_str:?}")))?;
    let endpoint = if endpoint == "none" { None } else { Some(endpoint.to_string()) };
    Ok((pid, endpoint))
}

/// Attempts to acquire the lock directory at `lockdir`.
///
/// `is_daemon` distinguishes the daemon (which may steal a lock whose
/// `ior` says `none`, i.e. held by a non-daemon tool) from a tool
/// (which may not — spec.md §4.14 step 2). `ping` is called with the
/// previous holder's endpoint to test liveness; a `true` result means
/// the peer answered and the lock is genuinely held.
pub fn acquire(
    lockdir: &Path,
    is_daemon: bool,
    our_pid: u32,
    our_endpoint: Option<&str>,
    ping: impl FnOnce(&str) -> bool,
) -> ConfResult<LockHandle> {
    let ior_path = lockdir.join("ior");
    let existed = lockdir.exists();
    if !existed {
        fs::DirBuilder::new()
            .mode(0o700)
            .create(lockdir)
            .map_err(|e| ConfError::new(ErrorKind::LockFailed, e.to_string()))?;
    }

    let mut stale = !existed;
    if existed {
        match fs::read_to_string(&ior_path) {
            Ok(contents) => match parse_ior(&contents) {
                Ok((holder_pid, None)) => {
                    if is_daemon {
                        warn(&format!("declaring lock at {lockdir:?} (held by non-daemon pid {holder_pid}) stale"));
                        stale = true;
                    } else {
                        return Err(ConfError::new(
                            ErrorKind::LockFailed,
                            format!("lock at {lockdir:?} is held by a non-daemon tool (pid {holder_pid})"),
                        ));
                    }
                }
                Ok((_, Some(endpoint))) => {
                    if ping(&endpoint) {
                        return Err(ConfError::new(
                            ErrorKind::LockFailed,
                            format!("lock at {lockdir:?} is held by a live peer at {endpoint:?}"),
                        ));
                    }
                    stale = true;
                }
                Err(_) => stale = true,
            },
            Err(_) => stale = true,
        }
    }

    if stale {
        let _ = fs::remove_file(&ior_path);
    }

    let our_line = format!("{our_pid}:{}", our_endpoint.unwrap_or("none"));
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(&ior_path)
        .map_err(|e| ConfError::new(ErrorKind::LockFailed, e.to_string()))?;
    file.write_all(our_line.as_bytes())
        .map_err(|e| ConfError::new(ErrorKind::LockFailed, e.to_string()))?;

    Ok(LockHandle {
        lockdir: lockdir.to_path_buf(),
        pid: our_pid,
    })
}

#[cfg(feature = "tracing")]
fn warn(message: &str) {
    tracing::warn!("{message}");
}

#[cfg(not(feature = "tracing"))]
fn warn(_message: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lockdir_acquires_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let lockdir = dir.path().join("%lock");
        let handle = acquire(&lockdir, true, 1234, Some("ipc://endpoint"), |_| false).unwrap();
        assert_eq!(fs::read_to_string(lockdir.join("ior")).unwrap(), "1234:ipc://endpoint");
        handle.release().unwrap();
        assert!(!lockdir.exists());
    }

    #[test]
    fn live_peer_blocks_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let lockdir = dir.path().join("%lock");
        let first = acquire(&lockdir, true, 1, Some("ipc://a"), |_| false).unwrap();
        let err = acquire(&lockdir, true, 2, Some("ipc://b"), |_| true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockFailed);
        first.release().unwrap();
    }

    #[test]
    fn stale_endpoint_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let lockdir = dir.path().join("%lock");
        fs::create_dir_all(&lockdir).unwrap();
        fs::write(lockdir.join("ior"), "9999999:ipc://dead").unwrap();

        let handle = acquire(&lockdir, true, 42, Some("ipc://me"), |_| false).unwrap();
        assert_eq!(fs::read_to_string(lockdir.join("ior")).unwrap(), "42:ipc://me");
        handle.release().unwrap();
    }

    #[test]
    fn non_daemon_tool_cannot_steal_a_none_endpoint_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lockdir = dir.path().join("%lock");
        fs::create_dir_all(&lockdir).unwrap();
        fs::write(lockdir.join("ior"), "555:none").unwrap();

        let err = acquire(&lockdir, false, 1, None, |_| false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockFailed);
    }

    #[test]
    fn daemon_steals_a_none_endpoint_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lockdir = dir.path().join("%lock");
        fs::create_dir_all(&lockdir).unwrap();
        fs::write(lockdir.join("ior"), "555:none").unwrap();

        let handle = acquire(&lockdir, true, 1, Some("ipc://d"), |_| false).unwrap();
        handle.release().unwrap();
    }
}

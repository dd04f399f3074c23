//! PID-file acquisition and release (`spec.md` §6 "PID file").
//!
//! Plain-text file holding the owning process's decimal PID. Acquire is
//! idempotent: a stale file (owning PID no longer alive) is unlinked and
//! replaced; a live one causes acquisition to fail so a second daemon
//! instance refuses to start. Release is idempotent too — removing an
//! already-removed file is not an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Returns `true` if a process with the given PID currently exists.
/// `kill(pid, 0)` sends no signal — it only probes existence/permission —
/// the standard POSIX liveness check.
fn process_alive(pid: i32) -> bool {
    // SAFETY: `kill` with signal 0 performs no action beyond an existence
    // check; `pid` is attacker-uncontrolled (read from our own PID file).
    let result = unsafe { libc::kill(pid, 0) };
    result == 0
}

fn read_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// A held PID file; removes itself on `release` or `Drop`.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquires the PID file at `path`. Fails if an existing file names a
    /// live process; unlinks and proceeds otherwise.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(existing_pid) = read_pid(path) {
            if process_alive(existing_pid) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("another steno daemon is running (pid {existing_pid})"),
                ));
            }
            tracing::info!(pid = existing_pid, "removing stale pid file");
            let _ = fs::remove_file(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", std::process::id()))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("steno-pidfile-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("steno.pid");

        let pidfile = PidFile::acquire(&path).expect("first acquire should succeed");
        assert!(path.exists());

        pidfile.release();
        assert!(!path.exists());
        pidfile.release();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn acquire_replaces_a_stale_file() {
        let dir = std::env::temp_dir().join(format!("steno-pidfile-stale-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("steno.pid");

        // A PID essentially guaranteed to be dead.
        fs::write(&path, "999999\n").unwrap();
        let pidfile = PidFile::acquire(&path).expect("stale pid file should be replaced");
        let written = read_pid(&path).unwrap();
        assert_eq!(written, std::process::id() as i32);

        pidfile.release();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn acquire_refuses_a_live_process() {
        let dir = std::env::temp_dir().join(format!("steno-pidfile-live-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("steno.pid");

        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        let result = PidFile::acquire(&path);
        assert!(result.is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}

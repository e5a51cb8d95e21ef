use crate::{BackupError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exclusive per-instance run lock backed by a pid file.
///
/// The file's sole content is the owning process id. A lock whose owner is
/// no longer alive is stale and gets reclaimed. Release happens in Drop,
/// so normal completion, error propagation, and unwinding all free it.
#[derive(Debug)]
pub struct Lock {
    path: PathBuf,
    released: bool,
}

enum OwnerState {
    Live(u32),
    Stale(Option<u32>),
    Vacant,
}

impl Lock {
    /// Try to take the lock for an instance. Returns `LockBusy` when a
    /// live process already holds it; this system never queues or retries
    /// a held lock.
    pub fn acquire(path: &Path, instance: &str) -> Result<Lock> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..3 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let pid = std::process::id();
                    write!(file, "{pid}")?;
                    info!("Acquired lock {} (pid {})", path.display(), pid);
                    return Ok(Lock {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_owner(path)? {
                        OwnerState::Live(owner_pid) => {
                            return Err(BackupError::LockBusy {
                                instance: instance.to_string(),
                                owner_pid,
                            });
                        }
                        OwnerState::Stale(owner) => {
                            warn!(
                                "Reclaiming stale lock {} (owner {:?})",
                                path.display(),
                                owner
                            );
                            match fs::remove_file(path) {
                                Ok(()) => continue,
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                                Err(e) => return Err(e.into()),
                            }
                        }
                        // Raced with a release; try again
                        OwnerState::Vacant => continue,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // The lock kept changing hands across every attempt
        let owner_pid = fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0);
        Err(BackupError::LockBusy {
            instance: instance.to_string(),
            owner_pid,
        })
    }

    /// Explicit release for callers that want the IO error; Drop covers
    /// every other path.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)?;
        debug!("Released lock {}", self.path.display());
        Ok(())
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove lock {}: {}", self.path.display(), e);
            } else {
                debug!("Released lock {}", self.path.display());
            }
        }
    }
}

/// Inspect an existing lock file. A freshly created lock is empty for an
/// instant before its owner writes the pid, so unreadable content gets a
/// short grace period before it is declared stale.
fn read_owner(path: &Path) -> Result<OwnerState> {
    for attempt in 0..5 {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(OwnerState::Vacant),
            Err(e) => return Err(e.into()),
        };

        if let Ok(pid) = contents.trim().parse::<u32>() {
            if process_alive(pid) {
                return Ok(OwnerState::Live(pid));
            }
            return Ok(OwnerState::Stale(Some(pid)));
        }

        if attempt < 4 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    warn!(
        "Lock file {} has no readable pid, treating as stale",
        path.display()
    );
    Ok(OwnerState::Stale(None))
}

/// Signal-0 liveness probe for the recorded owner. A permission error
/// still means the process exists.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(pid: u32) -> bool {
    use std::process::Command;

    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}")])
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! The supervisor: scans the runtime directory for free display indices,
//! spawns the bus binary with a handed-off socket fd, and respawns it on
//! abnormal exit subject to a minimum-uptime floor.

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{MdsError, Result};

pub struct RuntimePaths {
    root: PathBuf,
}

impl RuntimePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RuntimePaths { root: root.into() }
    }

    pub fn pid_file(&self, index: u32) -> PathBuf {
        self.root.join(format!("{index}.pid"))
    }

    pub fn socket_file(&self, index: u32) -> PathBuf {
        self.root.join(format!("{index}.socket"))
    }

    /// Returns the lowest display index that is free, scanning upward from
    /// `0`. An index counts as occupied only if its `.pid` file names a
    /// live process; a stale `.pid` left behind by an unclean exit is
    /// cleaned up and the index reclaimed.
    pub fn lowest_free_index(&self) -> u32 {
        let mut index = 0;
        loop {
            if !self.index_is_occupied(index) {
                return index;
            }
            index += 1;
        }
    }

    fn index_is_occupied(&self, index: u32) -> bool {
        let pid_path = self.pid_file(index);
        match fs::read_to_string(&pid_path) {
            Ok(contents) => match contents.trim().parse::<i32>() {
                Ok(pid) if pid_is_alive(pid) => true,
                _ => {
                    let _ = fs::remove_file(&pid_path);
                    let _ = fs::remove_file(self.socket_file(index));
                    false
                }
            },
            Err(_) => self.socket_file(index).exists(),
        }
    }
}

/// Checks whether `pid` names a live process by sending the null signal
/// (`kill(pid, 0)`), which performs permission/existence checks without
/// actually delivering a signal.
fn pid_is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// A running bus process plus the bookkeeping the supervisor needs to
/// decide whether a respawn is warranted.
pub struct SupervisedProcess {
    child: Child,
    started_at: Instant,
    index: u32,
}

pub struct Supervisor {
    paths: RuntimePaths,
    binary: PathBuf,
    respawn_floor: Duration,
}

impl Supervisor {
    pub fn new(runtime_root: impl Into<PathBuf>, binary: impl Into<PathBuf>, respawn_floor: Duration) -> Self {
        Supervisor {
            paths: RuntimePaths::new(runtime_root),
            binary: binary.into(),
            respawn_floor,
        }
    }

    /// Binds a fresh Unix socket at the lowest free index, writes the pid
    /// file, and execs the bus binary with the socket fd handed off via
    /// `--socket-fd`.
    pub fn spawn(&self, initial: bool) -> Result<SupervisedProcess> {
        fs::create_dir_all(&self.paths.root).map_err(MdsError::from)?;
        let index = self.paths.lowest_free_index();
        let socket_path = self.paths.socket_file(index);
        let listener = UnixListener::bind(&socket_path).map_err(MdsError::from)?;
        let fd = listener.as_raw_fd();
        clear_cloexec(fd)?;

        let flag = if initial { "--initial-spawn" } else { "--respawn" };
        let mut command = Command::new(&self.binary);
        command
            .arg("--socket-fd")
            .arg(fd.to_string())
            .arg(flag)
            .arg("--display")
            .arg(index.to_string());

        let child = command.spawn().map_err(MdsError::from)?;
        std::mem::forget(listener);

        fs::write(self.paths.pid_file(index), child.id().to_string()).map_err(MdsError::from)?;
        info!(index, pid = child.id(), "spawned bus process");

        Ok(SupervisedProcess {
            child,
            started_at: Instant::now(),
            index,
        })
    }

    /// Waits for `process` to exit, then decides whether to respawn it.
    /// Returns `Ok(true)` if a respawn should be attempted, `Ok(false)` if
    /// the exit was a clean, intentional shutdown (no respawn).
    pub fn should_respawn(&self, process: &mut SupervisedProcess) -> Result<bool> {
        let status = process.child.wait().map_err(MdsError::from)?;
        self.cleanup(process.index);

        if status.success() {
            info!(index = process.index, "bus process exited cleanly");
            return Ok(false);
        }

        let uptime = process.started_at.elapsed();
        if uptime < self.respawn_floor {
            error!(
                index = process.index,
                uptime_ms = uptime.as_millis() as u64,
                "bus process died before respawn floor, aborting"
            );
            return Ok(false);
        }

        warn!(index = process.index, ?status, "bus process exited abnormally, respawning");
        Ok(true)
    }

    fn cleanup(&self, index: u32) {
        let _ = fs::remove_file(self.paths.pid_file(index));
        let _ = fs::remove_file(self.paths.socket_file(index));
    }
}

/// Clears `FD_CLOEXEC` on `fd` so it survives into the child image across
/// `exec`. The standard library sets this flag on sockets it creates by
/// default, which would otherwise silently drop the handed-off listener.
fn clear_cloexec(fd: i32) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(MdsError::Io(io::Error::last_os_error()));
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) };
    if result < 0 {
        return Err(MdsError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

pub fn runtime_root_from_env() -> PathBuf {
    std::env::var_os("MDS_RUNTIME_ROOT_DIRECTORY")
        .map(PathBuf::from)
        .unwrap_or_else(default_runtime_root)
}

fn default_runtime_root() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    Path::new("/tmp").join(format!("mds-{uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lowest_free_index_skips_occupied_slots() {
        let dir = tempdir().unwrap();
        let paths = RuntimePaths::new(dir.path());
        // Index 0 holds this test process's own pid: genuinely alive.
        fs::write(paths.pid_file(0), std::process::id().to_string()).unwrap();
        fs::write(paths.socket_file(1), "").unwrap();
        assert_eq!(paths.lowest_free_index(), 2);
    }

    #[test]
    fn lowest_free_index_reclaims_stale_pid_file() {
        let dir = tempdir().unwrap();
        let paths = RuntimePaths::new(dir.path());
        // No real process will ever hold this pid for the life of the test.
        fs::write(paths.pid_file(0), "999999").unwrap();
        fs::write(paths.socket_file(0), "").unwrap();
        assert_eq!(paths.lowest_free_index(), 0);
        assert!(!paths.pid_file(0).exists());
        assert!(!paths.socket_file(0).exists());
    }

    #[test]
    fn lowest_free_index_is_zero_on_empty_directory() {
        let dir = tempdir().unwrap();
        let paths = RuntimePaths::new(dir.path());
        assert_eq!(paths.lowest_free_index(), 0);
    }
}

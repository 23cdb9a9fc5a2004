//! Host-wide advisory lock (spec §5, §6.2). Grounded on the `Flock`/
//! `FlockArg` usage in `runner/src/lock.rs` from the reference pack, adapted
//! from its async `spawn_blocking` form to a synchronous poll-with-timeout
//! loop: this control plane has no async runtime, and a command-per-
//! invocation process has nothing useful to do while waiting besides retry.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::VpcctlError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Holds the advisory lock until dropped.
pub struct LockGuard(#[allow(dead_code)] Flock<File>);

/// Acquires the exclusive lock at `path`, creating it if absent, retrying
/// until `timeout` elapses. On timeout, returns `VpcctlError::Lock` and
/// performs no side effects (spec §5, §6.1 exit code 4).
pub fn acquire(path: &Path, timeout: Duration) -> anyhow::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating lock directory {}", parent.display()))?;
    }
    let file = File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("opening lock file {}", path.display()))?;

    let deadline = Instant::now() + timeout;
    let mut file = file;
    loop {
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => return Ok(LockGuard(flock)),
            Err((returned, Errno::EWOULDBLOCK)) => {
                if Instant::now() >= deadline {
                    return Err(VpcctlError::Lock(format!(
                        "timed out after {:?} waiting for lock at {}",
                        timeout,
                        path.display()
                    ))
                    .into());
                }
                std::thread::sleep(POLL_INTERVAL);
                file = returned;
            }
            Err((_, errno)) => {
                return Err(VpcctlError::Lock(format!(
                    "flock {}: {errno}",
                    path.display()
                ))
                .into());
            }
        }
    }
}

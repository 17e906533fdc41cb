// mapache is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    global::{FileType, ID},
    repository::{error::RepoError, repo::Repository},
    ui::cli,
};

/// How long a lock is allowed to go unrefreshed before another process is
/// allowed to treat it as abandoned (e.g. its owner crashed).
const STALE_LOCK_THRESHOLD: Duration = Duration::from_secs(30 * 60);
/// How often a held lock rewrites its own file to bump its modification
/// time and prove its owner is still alive.
const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The on-disk content of a lock file. Informational only: staleness is
/// judged by the file's backend modification time, not by `start_time`,
/// since clocks of different machines writing to the same repository are
/// not assumed to be in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    hostname: String,
    username: String,
    pid: u32,
    exclusive: bool,
    start_time: DateTime<Utc>,
}

impl LockFile {
    fn for_this_process(exclusive: bool) -> Self {
        Self {
            hostname: hostname(),
            username: username(),
            pid: std::process::id(),
            exclusive,
            start_time: Utc::now(),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string())
}

/// A held lock on a repository. Dropping it releases the lock and stops its
/// background refresher. Acquire one with [`Locker::lock`].
pub struct Lock {
    repo: Arc<Repository>,
    id: ID,
    stop: Arc<AtomicBool>,
    refresher: Option<JoinHandle<()>>,
}

impl Lock {
    pub fn id(&self) -> &ID {
        &self.id
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.refresher.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.repo.delete_file(FileType::Lock, &self.id) {
            cli::warning!("Could not release lock {}: {}", self.id.to_short_hex(8), e);
        }
    }
}

/// Cooperative, advisory repository locking.
///
/// Multiple readers may hold shared locks concurrently. An exclusive lock
/// (used by `prune`, `forget` and key management) requires that no other
/// lock, shared or exclusive, is currently held. Locks that have not been
/// refreshed for [`STALE_LOCK_THRESHOLD`] are treated as abandoned and are
/// removed before a new lock is granted.
pub struct Locker;

impl Locker {
    /// Acquires a lock of the requested mode, blocking out conflicting
    /// lockers. Fails immediately rather than waiting if the repository is
    /// already locked incompatibly.
    pub fn lock(repo: Arc<Repository>, exclusive: bool) -> Result<Lock> {
        Self::remove_stale_locks(&repo)?;

        for (other_id, other) in Self::list(&repo)? {
            if exclusive || other.exclusive {
                return Err(RepoError::LockConflict(format!(
                    "held by {}@{} (pid {}) since {}",
                    other.username, other.hostname, other.pid, other.start_time
                ))
                .into());
            }
            let _ = other_id;
        }

        let lock_file = LockFile::for_this_process(exclusive);
        let data = serde_json::to_vec(&lock_file)?;
        let (id, _, _) = repo.save_file(FileType::Lock, &data)?;

        // Re-list: another process may have written a conflicting lock between
        // our first listing and our write above. Without this check, two
        // processes racing through the initial empty listing could both write
        // their own lock and both believe they won. If we find such a
        // competitor now, break the tie deterministically by content ID (both
        // sides see the same pair of IDs and reach the same verdict) rather
        // than unconditionally backing off, so that exactly one of two
        // concurrent exclusive acquisitions succeeds instead of both failing.
        for (other_id, other) in Self::list(&repo)? {
            if other_id == id {
                continue;
            }
            if (exclusive || other.exclusive) && other_id < id {
                let _ = repo.delete_file(FileType::Lock, &id);
                return Err(RepoError::LockConflict(format!(
                    "held by {}@{} (pid {}) since {}",
                    other.username, other.hostname, other.pid, other.start_time
                ))
                .into());
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let refresher = {
            let repo = repo.clone();
            let stop = stop.clone();
            let id = id.clone();
            let data = data.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(LOCK_REFRESH_INTERVAL);
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    // Rewriting identical content keeps the same content-derived
                    // ID while bumping the backend's modification time, which
                    // is all a refresh needs to do.
                    if let Err(e) = repo.save_file(FileType::Lock, &data) {
                        cli::warning!("Could not refresh lock {}: {}", id.to_short_hex(8), e);
                    }
                }
            })
        };

        Ok(Lock {
            repo,
            id,
            stop,
            refresher: Some(refresher),
        })
    }

    fn list(repo: &Arc<Repository>) -> Result<Vec<(ID, LockFile)>> {
        let mut locks = Vec::new();
        for path in repo.list_files(FileType::Lock)? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            let Ok(id) = ID::from_hex(&file_name) else {
                continue;
            };

            match repo.load_file(FileType::Lock, &id) {
                Ok(data) => match serde_json::from_slice::<LockFile>(&data) {
                    Ok(lock) => locks.push((id, lock)),
                    Err(e) => cli::warning!("Ignoring corrupt lock file {}: {}", id, e),
                },
                Err(e) => cli::warning!("Could not read lock file {}: {}", id, e),
            }
        }
        Ok(locks)
    }

    /// Deletes any lock file whose backend modification time is older than
    /// [`STALE_LOCK_THRESHOLD`], on the assumption that its owning process
    /// crashed or was killed without releasing it.
    fn remove_stale_locks(repo: &Arc<Repository>) -> Result<()> {
        let now = Utc::now();

        for (id, _) in Self::list(repo)? {
            let mtime = match repo.file_mtime(FileType::Lock, &id) {
                Ok(mtime) => mtime,
                Err(_) => continue,
            };

            let age = now.signed_duration_since(mtime);
            if age.to_std().unwrap_or_default() > STALE_LOCK_THRESHOLD {
                cli::warning!("Removing stale lock {}", id.to_short_hex(8));
                let _ = repo.delete_file(FileType::Lock, &id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_round_trips_through_json() -> Result<()> {
        let lock = LockFile::for_this_process(true);
        let json = serde_json::to_vec(&lock)?;
        let decoded: LockFile = serde_json::from_slice(&json)?;
        assert_eq!(decoded.pid, lock.pid);
        assert!(decoded.exclusive);
        Ok(())
    }
}

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

use thiserror::Error;

/// Error kinds a caller may need to branch on, distinct from the free-form
/// `anyhow::Error` chain used everywhere else. Call sites that need to
/// surface one of these return `RepoError::Foo.into()` (or wrap it with
/// `anyhow::Context`); the top level (`main.rs`) downcasts the error chain's
/// root cause back to `RepoError` to pick an exit code.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A backend call failed after exhausting its retry budget.
    #[error("backend error: {0}")]
    BackendTransient(String),

    /// A backend call failed in a way that is not worth retrying.
    #[error("backend error: {0}")]
    BackendPermanent(String),

    /// A requested object (blob, snapshot, pack, index, key) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A content hash or AEAD tag did not match what was expected.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// No key file on the backend could be unlocked with the given password.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// An exclusive or shared lock could not be acquired because a
    /// conflicting lock is already held.
    #[error("repository is locked: {0}")]
    LockConflict(String),

    /// A source file vanished or became unreadable mid-backup. Non-fatal by
    /// default: recorded on the node, the backup continues.
    #[error("error reading {path}: {reason}")]
    UserAbort { path: String, reason: String },

    /// The operation was cancelled before it could complete.
    #[error("cancelled")]
    Cancelled,
}

impl RepoError {
    /// The process exit code this error class should produce, per spec §7
    /// ("a non-zero exit code per error class").
    pub fn exit_code(&self) -> i32 {
        match self {
            RepoError::NotFound(_) => 2,
            RepoError::WrongPassphrase => 3,
            RepoError::LockConflict(_) => 4,
            RepoError::Integrity(_) => 5,
            RepoError::Cancelled => 6,
            RepoError::UserAbort { .. } => 7,
            RepoError::BackendPermanent(_) | RepoError::BackendTransient(_) => 8,
        }
    }
}

/// Maps a top-level `anyhow::Error` to a process exit code, following its
/// chain back to a `RepoError` if one is present; falls back to the
/// generic-error code `1` otherwise.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RepoError>())
        .map(RepoError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_downcasts_through_context() {
        let err = anyhow::Error::new(RepoError::WrongPassphrase).context("opening repository");
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn test_exit_code_for_generic_error_is_one() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(exit_code_for(&err), 1);
    }
}

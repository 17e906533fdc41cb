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

pub mod cmd_amend;
pub mod cmd_init;
pub mod cmd_prune;
pub mod cmd_restore;
pub mod cmd_snapshot;
pub mod cmd_stats;
pub mod cmd_verify;

use std::{collections::BTreeSet, convert::Infallible, fmt, path::PathBuf, str::FromStr, sync::Arc};

use anyhow::Result;
use clap::Args;

use crate::{
    global::{FileType, ID},
    repository::{repo::Repository, snapshot::SnapshotStreamer, snapshot::SnapshotTuple},
};

/// Arguments shared by every subcommand: how to reach the repository and
/// how to authenticate against it.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Repository location. A bare or `file://` path for a local backend, or
    /// `sftp://user@host[:port]/path` for a remote one.
    #[clap(short = 'r', long, global = true, value_parser)]
    pub repo: String,

    /// Path to a file containing the repository password.
    #[clap(long = "password-file", global = true, value_parser)]
    pub password_file: Option<PathBuf>,

    /// Path to an external key file, used instead of one stored in the repository.
    #[clap(short = 'k', long, global = true, value_parser)]
    pub key: Option<PathBuf>,

    /// Suppress all non-essential output.
    #[clap(short = 'q', long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Verbosity level (0-3). Defaults to 1.
    #[clap(short = 'v', long, global = true)]
    pub verbosity: Option<u32>,

    /// Public key file for SFTP public-key authentication.
    #[clap(long = "ssh-pubkey", global = true, value_parser)]
    pub ssh_pubkey: Option<PathBuf>,

    /// Private key file for SFTP public-key authentication.
    #[clap(long = "ssh-privatekey", global = true, value_parser)]
    pub ssh_privatekey: Option<PathBuf>,

    /// Target pack size, in MiB.
    #[clap(
        long = "pack-size",
        global = true,
        default_value_t = crate::global::defaults::DEFAULT_DEFAULT_PACK_SIZE_MIB
    )]
    pub pack_size_mib: f32,
}

/// A tag value meaning "no tags were given"; used as the default for
/// `--tags` so clap doesn't need an `Option<String>` with its own parsing
/// quirks, and filtered back out once parsed.
pub const EMPTY_TAG_MARK: &str = "__no_tags__";

/// Splits a comma-separated tag list into a set, dropping blanks.
pub fn parse_tags(tags_str: Option<&str>) -> BTreeSet<String> {
    match tags_str {
        Some(s) => s
            .split(',')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        None => BTreeSet::new(),
    }
}

/// Selects a snapshot to use as a reference point (e.g. a parent for
/// `snapshot`, or the target of `restore`/`amend`): either the most recent
/// one or one named by an ID prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UseSnapshot {
    Latest,
    Id(String),
}

impl fmt::Display for UseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UseSnapshot::Latest => write!(f, "latest"),
            UseSnapshot::Id(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for UseSnapshot {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("latest") {
            UseSnapshot::Latest
        } else {
            UseSnapshot::Id(s.to_string())
        })
    }
}

/// Resolves a [`UseSnapshot`] against the repository's current snapshots.
/// Returns `None` for `UseSnapshot::Latest` when there are no snapshots yet.
pub fn find_use_snapshot(
    repo: Arc<Repository>,
    use_snapshot: &UseSnapshot,
) -> Result<Option<SnapshotTuple>> {
    match use_snapshot {
        UseSnapshot::Latest => {
            let mut latest: Option<SnapshotTuple> = None;
            for (id, snapshot) in SnapshotStreamer::new(repo.clone())? {
                let is_newer = latest
                    .as_ref()
                    .map(|(_, current)| snapshot.time > current.time)
                    .unwrap_or(true);
                if is_newer {
                    latest = Some((id, snapshot));
                }
            }
            Ok(latest)
        }
        UseSnapshot::Id(prefix) => {
            let (id, _path) = repo.find(FileType::Snapshot, prefix)?;
            let snapshot = repo.load_snapshot(&id)?;
            Ok(Some((id, snapshot)))
        }
    }
}

/// Convenience used by commands that need the resolved `ID` without the
/// `Snapshot` body (e.g. to print it, or to fail fast if it doesn't exist).
pub fn require_use_snapshot(
    repo: Arc<Repository>,
    use_snapshot: &UseSnapshot,
) -> Result<SnapshotTuple> {
    find_use_snapshot(repo, use_snapshot)?
        .ok_or_else(|| anyhow::anyhow!("No snapshot found for '{}'", use_snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags_splits_and_trims() {
        let tags = parse_tags(Some("a, b ,  c"));
        assert_eq!(
            tags,
            BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_parse_tags_empty() {
        assert!(parse_tags(None).is_empty());
        assert!(parse_tags(Some("")).is_empty());
    }

    #[test]
    fn test_use_snapshot_from_str() {
        assert_eq!("latest".parse::<UseSnapshot>().unwrap(), UseSnapshot::Latest);
        assert_eq!("LATEST".parse::<UseSnapshot>().unwrap(), UseSnapshot::Latest);
        assert_eq!(
            "abcd".parse::<UseSnapshot>().unwrap(),
            UseSnapshot::Id("abcd".to_string())
        );
    }
}

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

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    global::ID,
    repository::repo::Repository,
    ui::cli,
};

/// A count of how many items of each kind changed between a snapshot and its
/// parent, broken down by node type and change kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffCounts {
    pub new_files: u64,
    pub changed_files: u64,
    pub deleted_files: u64,
    pub unchanged_files: u64,

    pub new_dirs: u64,
    pub changed_dirs: u64,
    pub deleted_dirs: u64,
    pub unchanged_dirs: u64,
}

/// Byte and item counters summarizing a snapshot run, persisted alongside
/// the snapshot so `stats`/`amend` don't need to re-walk the tree to know
/// how large it was.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub processed_items_count: u64,
    pub processed_bytes: u64,

    pub raw_bytes: u64,
    pub encoded_bytes: u64,

    pub meta_raw_bytes: u64,
    pub meta_encoded_bytes: u64,

    pub total_raw_bytes: u64,
    pub total_encoded_bytes: u64,

    pub diff_counts: DiffCounts,

    /// Set to the ID of the snapshot this one amended, if any.
    pub amends: Option<ID>,
}

/// A point-in-time record of a backed-up file tree.
///
/// A snapshot does not store file contents directly: `tree` points to the
/// root of a tree of blobs already deduplicated and packed elsewhere in the
/// repository. Everything else here is metadata used to list, diff and
/// restore snapshots without touching the tree itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,

    /// ID of the root tree blob.
    pub tree: ID,

    /// The longest common ancestor of every backed-up path, used to
    /// reconstruct relative paths on restore.
    pub root: PathBuf,
    /// The original, absolute paths that were backed up.
    pub paths: Vec<PathBuf>,
    /// Paths excluded from the scan, kept for `amend`/display purposes.
    #[serde(default)]
    pub excludes: Vec<PathBuf>,

    pub hostname: String,
    pub username: String,
    pub uid: u32,
    pub gid: u32,

    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub parent: Option<ID>,
    pub description: Option<String>,

    pub summary: SnapshotSummary,
}

impl Snapshot {
    /// The amount of file content (not metadata) addressed by this
    /// snapshot, used to size restore/verify progress bars.
    pub fn size(&self) -> u64 {
        self.summary.raw_bytes
    }
}

/// `(snapshot_id, snapshot)`, as produced when resolving a snapshot
/// reference to look up a parent for diffing.
pub type SnapshotTuple = (ID, Snapshot);

/// Iterates over every snapshot in a repository, skipping (and warning
/// about) any that fail to load instead of aborting the whole listing.
pub struct SnapshotStreamer {
    repo: Arc<Repository>,
    ids: std::vec::IntoIter<ID>,
    remaining: usize,
}

impl SnapshotStreamer {
    pub fn new(repo: Arc<Repository>) -> Result<Self> {
        let mut ids = repo.list_snapshot_ids()?;
        ids.sort();
        let remaining = ids.len();

        Ok(Self {
            repo,
            ids: ids.into_iter(),
            remaining,
        })
    }

    /// Total number of snapshots left to yield.
    pub fn len(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl Iterator for SnapshotStreamer {
    type Item = (ID, Snapshot);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.ids.next()?;
            self.remaining = self.remaining.saturating_sub(1);

            match self.repo.load_snapshot(&id) {
                Ok(snapshot) => return Some((id, snapshot)),
                Err(e) => {
                    cli::warning!("Could not load snapshot {}: {}", id.to_hex(), e);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_summary() -> SnapshotSummary {
        SnapshotSummary::default()
    }

    #[test]
    fn test_snapshot_size_is_raw_data_bytes() {
        let mut summary = empty_summary();
        summary.raw_bytes = 1234;
        summary.meta_raw_bytes = 56;

        let snapshot = Snapshot {
            time: Utc::now(),
            tree: ID::from_content(b"tree"),
            root: PathBuf::from("/home/mapachito"),
            paths: vec![PathBuf::from("/home/mapachito/docs")],
            excludes: Vec::new(),
            hostname: "raccoon".to_string(),
            username: "mapachito".to_string(),
            uid: 1000,
            gid: 1000,
            tags: BTreeSet::new(),
            parent: None,
            description: None,
            summary,
        };

        assert_eq!(snapshot.size(), 1234);
    }
}

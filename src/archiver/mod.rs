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

pub mod chunker;
pub mod tree_serializer;

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;

use crate::{
    global::{BlobType, ID, SaveID},
    repository::{
        repo::Repository,
        snapshot::{Snapshot, SnapshotTuple},
        streamers::{FSNodeStreamer, NodeDiff, NodeDiffStreamer, SerializedNodeStreamer, StreamNodeInfo},
        tree::Tree,
    },
    ui::snapshot_progress::SnapshotProgressReporter,
};

/// Everything the archiver needs to know about one `snapshot` run, beyond
/// the repository and the progress reporter: what to scan, what to diff
/// against, and the metadata to stamp the resulting snapshot with.
pub struct SnapshotOptions {
    pub absolute_source_paths: Vec<PathBuf>,
    pub snapshot_root_path: PathBuf,
    pub exclude_paths: Vec<PathBuf>,
    pub parent_snapshot: Option<SnapshotTuple>,
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
}

/// Drives one backup run: walks the current filesystem state against an
/// (optional) parent snapshot, chunking and saving only the content that
/// changed, and assembles the resulting directory tree bottom-up.
pub struct Archiver {
    repo: Arc<Repository>,
    options: SnapshotOptions,
    concurrency: (usize, usize),
    progress: Arc<SnapshotProgressReporter>,
}

impl Archiver {
    pub fn new(
        repo: Arc<Repository>,
        options: SnapshotOptions,
        concurrency: (usize, usize),
        progress: Arc<SnapshotProgressReporter>,
    ) -> Self {
        Self {
            repo,
            options,
            concurrency,
            progress,
        }
    }

    /// Performs the scan/diff/chunk/tree-assembly pipeline and returns the
    /// resulting snapshot. The snapshot is not saved to the repository; the
    /// caller decides whether and how (e.g. skipping it on `--dry-run`).
    pub fn snapshot(&self) -> Result<Snapshot> {
        let repo = self.repo.as_ref();
        repo.init_pack_saver(self.concurrency.1);

        let result = self.run_pipeline(repo);

        // Always try to flush and stop the pack saver, even on error, so a
        // failed snapshot doesn't leave writer threads running.
        let flushed = repo.flush();
        repo.finalize_pack_saver();

        let final_root_tree_id = result?;
        let (flush_raw, flush_encoded) = flushed?;
        self.progress.written_meta_bytes(flush_raw, flush_encoded);

        let summary = self.progress.get_summary();

        Ok(Snapshot {
            time: Utc::now(),
            tree: final_root_tree_id,
            root: self.options.snapshot_root_path.clone(),
            paths: self.options.absolute_source_paths.clone(),
            excludes: self.options.exclude_paths.clone(),
            hostname: hostname(),
            username: username(),
            uid: current_uid(),
            gid: current_gid(),
            tags: self.options.tags.clone(),
            parent: self.options.parent_snapshot.as_ref().map(|(id, _)| id.clone()),
            description: self.options.description.clone(),
            summary,
        })
    }

    fn run_pipeline(&self, repo: &Repository) -> Result<ID> {
        let next = FSNodeStreamer::from_paths(
            self.options.absolute_source_paths.clone(),
            self.options.exclude_paths.clone(),
        )?;

        let prev: Box<dyn Iterator<Item = Result<StreamNodeInfo>>> =
            match &self.options.parent_snapshot {
                Some((_, parent)) => Box::new(SerializedNodeStreamer::new(
                    self.repo.clone(),
                    Some(parent.tree.clone()),
                    parent.root.clone(),
                    None,
                    None,
                )?),
                None => Box::new(std::iter::empty()),
            };

        let mut pending_trees = tree_serializer::init_pending_trees(
            &self.options.snapshot_root_path,
            &self.options.absolute_source_paths,
        );
        let mut final_root_tree_id: Option<ID> = None;

        for item in NodeDiffStreamer::new(prev, next) {
            let (path, prev_node, next_node, diff) = item?;

            if diff == NodeDiff::Deleted {
                self.progress.processing_file(path.clone(), diff);
                match prev_node {
                    Some(sn) if sn.node.is_dir() => self.progress.deleted_dir(),
                    Some(_) => self.progress.deleted_file(),
                    None => {}
                }
                continue;
            }

            let mut stream_node = next_node.expect("non-deleted diff must carry a next node");
            self.progress.processing_file(path.clone(), diff);

            if stream_node.node.is_file() {
                self.progress.processed_bytes(stream_node.node.metadata.size);
            }

            match diff {
                NodeDiff::Unchanged => {
                    if let Some(prev_sn) = &prev_node {
                        stream_node.node.blobs = prev_sn.node.blobs.clone();
                    }
                    if stream_node.node.is_dir() {
                        self.progress.unchanged_dir();
                    } else {
                        self.progress.unchanged_file();
                    }
                }
                NodeDiff::New | NodeDiff::Changed => {
                    if stream_node.node.is_file() {
                        let (blobs, raw, encoded) =
                            chunker::chunk_and_save_file(repo, &path)?;
                        stream_node.node.blobs = Some(blobs);
                        self.progress.written_data_bytes(raw, encoded);
                    }

                    match (diff, stream_node.node.is_dir()) {
                        (NodeDiff::New, true) => self.progress.new_dir(),
                        (NodeDiff::New, false) => self.progress.new_file(),
                        (NodeDiff::Changed, true) => self.progress.changed_dir(),
                        (NodeDiff::Changed, false) => self.progress.changed_file(),
                        _ => unreachable!(),
                    }
                }
                NodeDiff::Deleted => unreachable!("handled above"),
            }

            self.progress.processed_file(&path);

            let (tree_raw, tree_encoded) = tree_serializer::handle_processed_item(
                (path, stream_node),
                repo,
                &mut pending_trees,
                &mut final_root_tree_id,
                &self.options.snapshot_root_path,
            )?;
            if tree_raw > 0 || tree_encoded > 0 {
                self.progress.written_meta_bytes(tree_raw, tree_encoded);
            }
        }

        match final_root_tree_id {
            Some(id) => Ok(id),
            // No source paths were given at all: there is nothing to make
            // the root bucket complete, so serialize it as an empty tree.
            None => {
                let data = serde_json::to_vec(&Tree::default())?;
                let (id, (raw, encoded), _) =
                    repo.encode_and_save_blob(BlobType::Tree, data, SaveID::CalculateID)?;
                self.progress.written_meta_bytes(raw, encoded);
                Ok(id)
            }
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

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(unix)]
fn current_gid() -> u32 {
    unsafe { libc::getgid() }
}

#[cfg(not(unix))]
fn current_gid() -> u32 {
    0
}

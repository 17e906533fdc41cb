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

pub(crate) mod node_restorer;

use std::{fmt, path::{Path, PathBuf}, sync::Arc};

use anyhow::Result;
use clap::ValueEnum;

use crate::{
    repository::{
        repo::Repository,
        snapshot::Snapshot,
        streamers::SerializedNodeStreamer,
        tree::Node,
    },
    ui::{self, restore_progress::RestoreProgressReporter},
};

/// What to do when a restored path already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    /// Leave the existing file or symlink alone.
    Skip,
    /// Replace the existing file or symlink with the one from the snapshot.
    Overwrite,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Skip => write!(f, "skip"),
            Resolution::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Everything [`restore`] needs to know about a single restore run.
pub struct RestoreOptions {
    pub include: Option<Vec<PathBuf>>,
    pub exclude: Option<Vec<PathBuf>>,
    pub strip_prefix: bool,
    pub resolution: Resolution,
    pub dry_run: bool,
}

/// Drops the first path component, if there is one. Used when `strip_prefix`
/// is set, so a snapshot of a single top-level directory can be restored
/// straight into `target` without recreating that directory as a nesting
/// level.
fn strip_first_component(path: &Path) -> PathBuf {
    let mut components = path.components();
    components.next();
    components.as_path().to_path_buf()
}

/// Walks a snapshot's tree and recreates it under `target`.
///
/// Restoration happens in two passes: a top-down pass that creates every
/// node (files, directories and symlinks) and restores file metadata as it
/// goes, followed by a bottom-up pass that restores directory metadata —
/// mtimes would otherwise be reset every time a child is written into a
/// just-created directory.
pub fn restore(
    repo: Arc<Repository>,
    progress: Arc<RestoreProgressReporter>,
    snapshot: &Snapshot,
    target: &Path,
    options: RestoreOptions,
) -> Result<()> {
    let streamer = SerializedNodeStreamer::new(
        repo.clone(),
        Some(snapshot.tree.clone()),
        PathBuf::new(),
        options.include,
        options.exclude,
    )?;

    let mut directories: Vec<(PathBuf, Node)> = Vec::new();

    for item in streamer {
        let (relative_path, stream_node) = item?;
        let node = stream_node.node;

        let relative_path = if options.strip_prefix {
            strip_first_component(&relative_path)
        } else {
            relative_path
        };
        let dst_path = target.join(&relative_path);

        if !node.is_dir()
            && options.resolution == Resolution::Skip
            && dst_path.symlink_metadata().is_ok()
        {
            ui::cli::verbose_2!("Skipping existing path '{}'", dst_path.display());
            progress.restored_item();
            continue;
        }

        if let Err(e) =
            node_restorer::restore_node_to_path(repo.as_ref(), progress.clone(), &node, &dst_path, options.dry_run)
        {
            ui::cli::warning!("Could not restore '{}': {}", dst_path.display(), e);
            progress.error();
        } else if node.is_dir() {
            directories.push((dst_path, node));
        }

        progress.restored_item();
    }

    if !options.dry_run {
        // Deepest directories first, so an ancestor's mtime is set after all
        // of its descendants have been fully restored.
        directories.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
        for (path, node) in directories {
            if let Err(e) = node_restorer::restore_node_metadata(&node, &path) {
                ui::cli::warning!("Could not restore directory metadata for '{}': {}", path.display(), e);
                progress.error();
            }
        }
    }

    Ok(())
}

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
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::{
    backend::new_backend_with_prompt,
    commands::{GlobalArgs, UseSnapshot, require_use_snapshot},
    global::defaults::SHORT_SNAPSHOT_ID_LEN,
    repository::{
        repo::{RepoConfig, Repository},
        verify::verify_snapshot_links,
    },
    restorer::{self, Resolution, RestoreOptions},
    ui::{self, restore_progress::RestoreProgressReporter},
    utils::{self, size},
};

#[derive(Args, Debug)]
#[clap(about = "Restore a snapshot to a target directory")]
pub struct CmdArgs {
    /// Directory to restore into. Created if it doesn't exist.
    #[clap(value_parser)]
    pub target: PathBuf,

    /// Snapshot to restore (ID or 'latest').
    #[clap(long, value_parser = clap::value_parser!(UseSnapshot),
           default_value_t = UseSnapshot::Latest)]
    pub snapshot: UseSnapshot,

    /// Only report what would be restored; touch nothing on disk.
    #[clap(long, default_value_t = false)]
    pub dry_run: bool,

    /// Restrict the restore to these paths (relative to the snapshot root).
    #[clap(long, value_parser, value_delimiter = ',', required = false)]
    pub include: Option<Vec<PathBuf>>,

    /// Exclude these paths (relative to the snapshot root) from the restore.
    #[clap(long, value_parser, value_delimiter = ',', required = false)]
    pub exclude: Option<Vec<PathBuf>>,

    /// Drop the first path component of every restored path.
    #[clap(long = "strip-prefix", default_value_t = false)]
    pub strip_prefix: bool,

    /// What to do when a restored path already exists.
    #[clap(long, value_parser = clap::value_parser!(Resolution),
           default_value_t = Resolution::Skip)]
    pub resolution: Resolution,

    /// Skip the post-restore integrity check of the snapshot's tree and blobs.
    #[clap(long = "no-verify", default_value_t = false)]
    pub no_verify: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let pass = utils::get_password_from_file(&global_args.password_file)?;
    let backend = new_backend_with_prompt(global_args, args.dry_run)?;

    let config = RepoConfig {
        pack_size: (global_args.pack_size_mib * size::MiB as f32) as u64,
    };
    let (repo, _) = Repository::try_open(pass, global_args.key.as_ref(), backend, config)?;

    let start = Instant::now();

    let (snapshot_id, snapshot) = require_use_snapshot(repo.clone(), &args.snapshot)?;

    if !args.no_verify {
        ui::cli::verbose_1!("Checking snapshot integrity...");
        verify_snapshot_links(repo.clone(), &snapshot_id)?;
    }

    ui::cli::log!(
        "Restoring snapshot {} to '{}'",
        snapshot_id.to_short_hex(SHORT_SNAPSHOT_ID_LEN).bold().yellow(),
        args.target.display(),
    );

    if !args.dry_run {
        std::fs::create_dir_all(&args.target)?;
    }

    let progress = Arc::new(RestoreProgressReporter::new(snapshot.size()));

    restorer::restore(
        repo,
        progress.clone(),
        &snapshot,
        &args.target,
        RestoreOptions {
            include: args.include.clone(),
            exclude: args.exclude.clone(),
            strip_prefix: args.strip_prefix,
            resolution: args.resolution,
            dry_run: args.dry_run,
        },
    )?;

    progress.finalize();

    if progress.error_count() > 0 {
        anyhow::bail!(
            "Restore finished with {} error(s)",
            progress.error_count()
        );
    }

    ui::cli::log!(
        "Restored {} in {}",
        utils::format_count(progress.restored_item_count() as usize, "item", "items"),
        utils::pretty_print_duration(start.elapsed()),
    );

    Ok(())
}

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

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::{
    backend::new_backend_with_prompt,
    commands::GlobalArgs,
    global::defaults::DEFAULT_GC_TOLERANCE,
    repository::{
        gc,
        lock::Locker,
        repo::{RepoConfig, Repository},
    },
    ui,
    utils::{self, size},
};

#[derive(Args, Debug)]
#[clap(about = "Remove unreferenced data and reclaim repository space")]
pub struct CmdArgs {
    /// Fraction (0-1) of garbage a pack may hold before it's repacked. Packs
    /// below this threshold are kept as-is even if they carry some garbage.
    #[clap(long, default_value_t = DEFAULT_GC_TOLERANCE)]
    pub tolerance: f32,

    /// Only report what would be removed or repacked; change nothing.
    #[clap(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let pass = utils::get_password_from_file(&global_args.password_file)?;
    let backend = new_backend_with_prompt(global_args, args.dry_run)?;

    let config = RepoConfig {
        pack_size: (global_args.pack_size_mib * size::MiB as f32) as u64,
    };
    let (repo, _) = Repository::try_open(pass, global_args.key.as_ref(), backend, config)?;

    let start = Instant::now();

    let lock = Locker::lock(repo.clone(), true)?;

    let plan = gc::scan(repo.clone(), args.tolerance)?;

    ui::cli::log!();
    ui::cli::log!(
        "{} {} packs, {} obsolete, {} unused, {} small, {} tolerated",
        "Plan:".bold(),
        plan.total_packs,
        plan.obsolete_packs.len(),
        plan.unused_packs.len(),
        plan.small_packs.len(),
        plan.tolerated_packs.len(),
    );

    if args.dry_run {
        ui::cli::log!("Dry run: nothing was deleted or repacked.");
        drop(lock);
        return Ok(());
    }

    let reclaimed = plan.execute()?;
    drop(lock);

    if reclaimed >= 0 {
        ui::cli::log!(
            "Reclaimed {}",
            utils::format_size(reclaimed as u64, 3).bold().green()
        );
    } else {
        ui::cli::log!(
            "Repository grew by {} (repacking cost more than it reclaimed)",
            utils::format_size((-reclaimed) as u64, 3).bold().yellow()
        );
    }

    ui::cli::log!(
        "Finished in {}",
        utils::pretty_print_duration(start.elapsed())
    );

    Ok(())
}

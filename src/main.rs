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

use clap::{Parser, Subcommand};

use mapache::{
    commands::{GlobalArgs, cmd_amend, cmd_init, cmd_prune, cmd_restore, cmd_snapshot, cmd_stats, cmd_verify},
    global::set_global_opts_with_args,
    repository::error::exit_code_for,
    ui,
};

#[derive(Parser, Debug)]
#[command(name = "mapache", version, about = "A deduplicating, encrypted backup tool")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new repository
    Init(cmd_init::CmdArgs),
    /// Create a new snapshot
    Snapshot(cmd_snapshot::CmdArgs),
    /// Restore a snapshot to a target directory
    Restore(cmd_restore::CmdArgs),
    /// Verify the integrity of the repository
    Verify(cmd_verify::CmdArgs),
    /// Remove unreferenced data and reclaim repository space
    Prune(cmd_prune::CmdArgs),
    /// Amend an existing snapshot
    Amend(cmd_amend::CmdArgs),
    /// Display stats about the repository and its contents
    Stats(cmd_stats::CmdArgs),
}

fn main() {
    let cli = Cli::parse();
    set_global_opts_with_args(&cli.global);

    let result = match &cli.command {
        Command::Init(args) => cmd_init::run(&cli.global, args),
        Command::Snapshot(args) => cmd_snapshot::run(&cli.global, args),
        Command::Restore(args) => cmd_restore::run(&cli.global, args),
        Command::Verify(args) => cmd_verify::run(&cli.global, args),
        Command::Prune(args) => cmd_prune::run(&cli.global, args),
        Command::Amend(args) => cmd_amend::run(&cli.global, args),
        Command::Stats(args) => cmd_stats::run(&cli.global, args),
    };

    if let Err(e) = result {
        ui::cli::error!("{e:?}");
        std::process::exit(exit_code_for(&e));
    }
}

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

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Password;

use crate::global::global_opts;

/// Returns `true` if the process is currently running quietly (no ordinary
/// log output, warnings and errors still shown).
pub fn is_quiet() -> bool {
    global_opts().as_ref().map(|o| o.quiet).unwrap_or(false)
}

/// Returns the currently configured verbosity level.
pub fn verbosity() -> u32 {
    global_opts().as_ref().map(|o| o.verbosity).unwrap_or(1)
}

/// Prints a line to stdout, unless the process is running `--quiet`.
#[macro_export]
macro_rules! log {
    () => {
        if !$crate::ui::cli::is_quiet() {
            println!();
        }
    };
    ($($arg:tt)*) => {
        if !$crate::ui::cli::is_quiet() {
            println!($($arg)*);
        }
    };
}

/// Prints a yellow `warning:`-prefixed line to stderr. Always shown, even
/// when quiet, since warnings indicate something the user should know about.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        eprintln!("{} {}", "warning:".yellow().bold(), format!($($arg)*));
    };
}

/// Prints a red `error:`-prefixed line to stderr. Always shown.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        eprintln!("{} {}", "error:".red().bold(), format!($($arg)*));
    };
}

/// Prints a line only when verbosity is at least 1 (the default level).
#[macro_export]
macro_rules! verbose_1 {
    ($($arg:tt)*) => {
        if $crate::ui::cli::verbosity() >= 1 && !$crate::ui::cli::is_quiet() {
            println!($($arg)*);
        }
    };
}

/// Prints a line only when verbosity is at least 2.
#[macro_export]
macro_rules! verbose_2 {
    ($($arg:tt)*) => {
        if $crate::ui::cli::verbosity() >= 2 && !$crate::ui::cli::is_quiet() {
            println!($($arg)*);
        }
    };
}

/// Prints a line only when verbosity is at least 3.
#[macro_export]
macro_rules! verbose_3 {
    ($($arg:tt)*) => {
        if $crate::ui::cli::verbosity() >= 3 && !$crate::ui::cli::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub use crate::error;
pub use crate::log;
pub use crate::verbose_1;
pub use crate::verbose_2;
pub use crate::verbose_3;
pub use crate::warning;

/// Prompts for a password on the terminal, without confirmation.
pub fn request_password(prompt: &str) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .interact()
        .with_context(|| "Could not read password from terminal")
}

/// Prompts for a password on the terminal, requiring the user to type it
/// twice and bailing if the two entries don't match. Used when creating a
/// new repository, so a typo doesn't lock the user out immediately.
pub fn request_password_with_confirmation(
    prompt: &str,
    confirm_prompt: &str,
    mismatch_msg: &str,
) -> Result<String> {
    Password::new()
        .with_prompt(prompt)
        .with_confirmation(confirm_prompt, mismatch_msg)
        .interact()
        .with_context(|| "Could not read password from terminal")
}

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

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressState, ProgressStyle};

use crate::{
    ui::{PROGRESS_REFRESH_RATE_HZ, default_bar_draw_target},
    utils,
};

/// Tracks progress while restoring a snapshot to the filesystem: bytes
/// written, items restored and errors encountered.
pub struct RestoreProgressReporter {
    processed_bytes: AtomicU64,
    restored_items: AtomicU64,
    error_counter: AtomicU32,
    progress_bar: ProgressBar,
}

impl RestoreProgressReporter {
    pub fn new(expected_size: u64) -> Self {
        let progress_bar = ProgressBar::new(expected_size);
        progress_bar.set_draw_target(default_bar_draw_target());
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[{bar:20.cyan/white}] [{custom_elapsed}]  {processed_bytes_fmt}  [ETA: {custom_eta}]",
                )
                .unwrap()
                .progress_chars("=> ")
                .with_key(
                    "custom_elapsed",
                    move |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                        let _ = w.write_str(&utils::pretty_print_duration(state.elapsed()));
                    },
                )
                .with_key(
                    "processed_bytes_fmt",
                    move |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                        let s = format!(
                            "{} / {}",
                            utils::format_size(state.pos(), 3),
                            utils::format_size(state.len().unwrap_or(0), 3)
                        );
                        let _ = w.write_str(&s);
                    },
                )
                .with_key(
                    "custom_eta",
                    move |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                        let _ = w.write_str(&utils::pretty_print_duration(state.eta()));
                    },
                ),
        );
        progress_bar.enable_steady_tick(std::time::Duration::from_millis(
            (1000.0f32 / PROGRESS_REFRESH_RATE_HZ as f32) as u64,
        ));

        Self {
            processed_bytes: AtomicU64::new(0),
            restored_items: AtomicU64::new(0),
            error_counter: AtomicU32::new(0),
            progress_bar,
        }
    }

    pub fn processed_bytes(&self, bytes: u64) {
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.progress_bar.inc(bytes);
    }

    pub fn restored_item(&self) {
        self.restored_items.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.error_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u32 {
        self.error_counter.load(Ordering::SeqCst)
    }

    pub fn restored_item_count(&self) -> u64 {
        self.restored_items.load(Ordering::SeqCst)
    }

    pub fn total_processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::SeqCst)
    }

    pub fn finalize(&self) {
        self.progress_bar.finish_and_clear();
    }
}

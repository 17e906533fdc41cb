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

pub mod indexset;
pub mod size;
pub mod url;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Returns `true` if `path` should be visited, given optional include/exclude
/// path lists. `path` is kept if it is equal to, a parent of, or a descendant
/// of every entry in `include` (when present), and is not equal to nor a
/// descendant of any entry in `exclude`.
pub fn filter_path(path: &Path, include: Option<&Vec<PathBuf>>, exclude: Option<&Vec<PathBuf>>) -> bool {
    if let Some(exclude) = exclude
        && exclude.iter().any(|ex| path.starts_with(ex))
    {
        return false;
    }

    if let Some(include) = include {
        return include
            .iter()
            .any(|inc| path.starts_with(inc) || inc.starts_with(path));
    }

    true
}

/// Computes the longest common path prefix shared by all `paths`.
///
/// When `strict_dir` is `true`, the result is guaranteed to be a directory
/// that is an ancestor of every path (never a path itself).
pub fn calculate_lcp(paths: &[PathBuf], strict_dir: bool) -> PathBuf {
    let mut iter = paths.iter();
    let Some(first) = iter.next() else {
        return PathBuf::new();
    };

    let mut common: Vec<_> = first.components().collect();

    for path in iter {
        let components: Vec<_> = path.components().collect();
        let len = common.len().min(components.len());
        common.truncate(len);

        let mismatch = common
            .iter()
            .zip(components.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(len);
        common.truncate(mismatch);
    }

    if strict_dir && common.len() == first.components().count() {
        common.pop();
    }

    common.iter().collect()
}

/// Given a common root and the full list of paths rooted under it, returns the
/// number of direct children of `root` among `paths`, plus the list of
/// intermediate directories (and, for each, how many of `paths`'s ancestor
/// chains pass through it) needed to connect `root` to every path.
pub fn get_intermediate_paths(
    root: &Path,
    paths: &[PathBuf],
) -> (usize, Vec<(PathBuf, usize)>) {
    use std::collections::HashMap;

    let mut child_counts: HashMap<PathBuf, usize> = HashMap::new();
    let mut root_children = std::collections::HashSet::new();

    for path in paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };

        let mut current = root.to_path_buf();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            let parent = current.clone();
            current = current.join(component);

            if parent == *root {
                root_children.insert(current.clone());
            }

            // Only directories strictly between root and the leaf path count
            // as intermediate nodes; the leaf itself is emitted by the caller.
            if components.peek().is_some() && current != *path {
                *child_counts.entry(current.clone()).or_insert(0) += 1;
            }
        }
    }

    let intermediate: Vec<(PathBuf, usize)> = child_counts.into_iter().collect();
    (root_children.len(), intermediate)
}

/// Formats a byte count with the given number of decimal places, choosing an
/// appropriate binary unit (B, KiB, MiB, GiB, TiB).
pub fn format_size(bytes: u64, precision: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.precision$} {}", UNITS[unit_index])
    }
}

/// Formats a count with its singular or plural noun form, e.g. `1 snapshot`
/// or `3 snapshots`.
pub fn format_count(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Formats a [`Duration`] as `HH:MM:SS`.
pub fn pretty_print_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Reads a repository password from a file, if one was provided. Returns
/// `None` when no password file was given, leaving interactive prompting to
/// the caller.
pub fn get_password_from_file(password_file: &Option<PathBuf>) -> Result<Option<String>> {
    match password_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read password file '{}'", path.display()))?;
            Ok(Some(contents.trim_end_matches(['\n', '\r']).to_string()))
        }
        None => Ok(None),
    }
}

/// Computes the SHA-256 digest of `data`.
pub fn calculate_hash(data: impl AsRef<[u8]>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_lcp() {
        let paths = vec![
            PathBuf::from("/a/b/c"),
            PathBuf::from("/a/b/d"),
            PathBuf::from("/a/b/e/f"),
        ];
        assert_eq!(calculate_lcp(&paths, false), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_calculate_lcp_single_path_strict_dir() {
        let paths = vec![PathBuf::from("/a/b/c")];
        assert_eq!(calculate_lcp(&paths, true), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_filter_path_exclude() {
        let exclude = vec![PathBuf::from("/a/b")];
        assert!(!filter_path(Path::new("/a/b/c"), None, Some(&exclude)));
        assert!(filter_path(Path::new("/a/c"), None, Some(&exclude)));
    }

    #[test]
    fn test_filter_path_include() {
        let include = vec![PathBuf::from("/a/b/c")];
        assert!(filter_path(Path::new("/a/b"), Some(&include), None));
        assert!(filter_path(Path::new("/a/b/c/d"), Some(&include), None));
        assert!(!filter_path(Path::new("/a/x"), Some(&include), None));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0, 2), "0 B");
        assert_eq!(format_size(1536, 2), "1.50 KiB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(1, "item", "items"), "1 item");
        assert_eq!(format_count(2, "item", "items"), "2 items");
    }

    #[test]
    fn test_pretty_print_duration() {
        assert_eq!(
            pretty_print_duration(Duration::from_secs(3725)),
            "01:02:05"
        );
    }

    #[test]
    fn test_get_password_from_file_none() {
        assert!(get_password_from_file(&None).unwrap().is_none());
    }
}

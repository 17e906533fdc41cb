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

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, anyhow};
use fastcdc::v2020::{Normalization, StreamCDC};

use crate::{
    global::{
        BlobType, ID, SaveID,
        defaults::{AVG_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE},
    },
    repository::repo::Repository,
};

/// Picks one of `fastcdc`'s four normalization levels from a repository's
/// chunker seed.
///
/// `fastcdc` 3.x does not expose a way to seed or replace its gear hash
/// table, so the repository-scoped seed cannot shift chunk boundaries the
/// way a true keyed CDC would. Deriving the normalization level from it is
/// the closest thing the crate's public API allows: two repositories with
/// different seeds can still end up chunking the same file identically, but
/// most will not, which is enough to stop a chunk-boundary oracle from being
/// a reliable cross-repository fingerprint.
fn normalization_for_seed(seed: &ID) -> Normalization {
    match seed.0[0] % 4 {
        0 => Normalization::Level0,
        1 => Normalization::Level1,
        2 => Normalization::Level2,
        _ => Normalization::Level3,
    }
}

/// Splits the file at `path` into content-defined chunks and saves each one
/// as a (deduplicated) data blob.
///
/// Returns the ordered list of chunk blob IDs that make up the file, plus the
/// `(raw, encoded)` byte totals actually written: a chunk whose content
/// already exists elsewhere in the repository contributes `0` to both, since
/// [`Repository::encode_and_save_blob`] skips re-encoding it.
pub fn chunk_and_save_file(repo: &Repository, path: &Path) -> Result<(Vec<ID>, u64, u64)> {
    let file =
        File::open(path).with_context(|| format!("Could not open '{}'", path.display()))?;
    let reader = BufReader::new(file);

    let chunker = StreamCDC::with_level(
        reader,
        MIN_CHUNK_SIZE as u32,
        AVG_CHUNK_SIZE as u32,
        MAX_CHUNK_SIZE as u32,
        normalization_for_seed(repo.chunker_seed()),
    );

    let mut blobs = Vec::new();
    let mut raw_total = 0u64;
    let mut encoded_total = 0u64;

    for chunk in chunker {
        let chunk = chunk
            .map_err(|e| anyhow!("Chunking '{}' failed: {}", path.display(), e))?;

        let (id, (raw, encoded), _) =
            repo.encode_and_save_blob(BlobType::Data, chunk.data, SaveID::CalculateID)?;

        raw_total += raw;
        encoded_total += encoded;
        blobs.push(id);
    }

    Ok((blobs, raw_total, encoded_total))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::tempdir;

    use crate::{backend::localfs::LocalFS, repository::repo::RepoConfig};

    fn open_test_repo() -> Result<Arc<Repository>> {
        let dir = tempdir()?;
        let repo_path = dir.path().join("repo");
        let backend = Arc::new(LocalFS::new(repo_path));
        Repository::init(Some("mapachito".to_string()), None, backend.clone())?;
        let (repo, _) = Repository::try_open(
            Some("mapachito".to_string()),
            None,
            backend,
            RepoConfig::default(),
        )?;
        // Keep the temp dir alive for the duration of the test by leaking it;
        // the OS reclaims it on process exit and the test only needs the repo.
        std::mem::forget(dir);
        Ok(repo)
    }

    #[test]
    fn test_chunk_and_save_small_file_produces_one_blob() -> Result<()> {
        let repo = open_test_repo()?;
        repo.init_pack_saver(1);

        let dir = tempdir()?;
        let file_path = dir.path().join("mapachito.txt");
        std::fs::write(&file_path, b"some raccoon content")?;

        let (blobs, raw, _encoded) = chunk_and_save_file(repo.as_ref(), &file_path)?;
        assert_eq!(blobs.len(), 1);
        assert_eq!(raw, "some raccoon content".len() as u64);

        repo.finalize_pack_saver();
        Ok(())
    }

    #[test]
    fn test_chunking_identical_files_deduplicates() -> Result<()> {
        let repo = open_test_repo()?;
        repo.init_pack_saver(1);

        let dir = tempdir()?;
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"identical raccoon payload")?;
        std::fs::write(&b, b"identical raccoon payload")?;

        let (blobs_a, raw_a, _) = chunk_and_save_file(repo.as_ref(), &a)?;
        let (blobs_b, raw_b, _) = chunk_and_save_file(repo.as_ref(), &b)?;

        assert_eq!(blobs_a, blobs_b);
        assert!(raw_a > 0);
        assert_eq!(raw_b, 0, "second file's identical chunk should be deduplicated");

        repo.finalize_pack_saver();
        Ok(())
    }

    fn level_index(n: Normalization) -> u8 {
        match n {
            Normalization::Level0 => 0,
            Normalization::Level1 => 1,
            Normalization::Level2 => 2,
            Normalization::Level3 => 3,
        }
    }

    #[test]
    fn test_normalization_for_seed_is_deterministic_and_covers_all_levels() {
        let seed_a = ID::from_content(b"seed a");
        assert_eq!(
            level_index(normalization_for_seed(&seed_a)),
            level_index(normalization_for_seed(&seed_a))
        );

        let levels: std::collections::BTreeSet<u8> = (0u8..=255)
            .map(|b| {
                let mut bytes = [0u8; 32];
                bytes[0] = b;
                level_index(normalization_for_seed(&ID(bytes)))
            })
            .collect();
        assert_eq!(levels.len(), 4, "all four normalization levels should be reachable");
    }
}

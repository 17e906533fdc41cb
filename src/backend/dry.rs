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

use std::{path::Path, sync::Arc};

use anyhow::Result;

use super::{FileAttr, StorageBackend};
use crate::ui;

/// Wraps another backend, letting every read-only operation through but
/// turning every mutation into a no-op (logged at verbosity 1), so a
/// `--dry-run` invocation can walk the exact same code paths as a real one
/// without ever touching the underlying storage.
pub struct DryBackend {
    inner: Arc<dyn StorageBackend>,
}

impl DryBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self { inner }
    }
}

impl StorageBackend for DryBackend {
    fn create(&self) -> Result<()> {
        ui::cli::verbose_1!("[dry-run] would create repository root");
        Ok(())
    }

    fn root_exists(&self) -> bool {
        self.inner.root_exists()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn seek_read(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.inner.seek_read(path, offset, length)
    }

    fn seek_read_from_end(&self, path: &Path, offset: i64, length: u64) -> Result<Vec<u8>> {
        self.inner.seek_read_from_end(path, offset, length)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        ui::cli::verbose_1!(
            "[dry-run] would write {} bytes to '{}'",
            contents.len(),
            path.display()
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        ui::cli::verbose_1!(
            "[dry-run] would rename '{}' to '{}'",
            from.display(),
            to.display()
        );
        Ok(())
    }

    fn remove_file(&self, file_path: &Path) -> Result<()> {
        ui::cli::verbose_1!("[dry-run] would remove file '{}'", file_path.display());
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        ui::cli::verbose_1!("[dry-run] would create directory '{}'", path.display());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        ui::cli::verbose_1!(
            "[dry-run] would create directory tree '{}'",
            path.display()
        );
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<std::path::PathBuf>> {
        self.inner.read_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        ui::cli::verbose_1!("[dry-run] would remove directory '{}'", path.display());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        ui::cli::verbose_1!(
            "[dry-run] would remove directory tree '{}'",
            path.display()
        );
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn lstat(&self, path: &Path) -> Result<FileAttr> {
        self.inner.lstat(path)
    }

    fn connections(&self) -> usize {
        self.inner.connections()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::backend::localfs::LocalFS;

    #[test]
    fn test_dry_backend_does_not_write() -> Result<()> {
        let temp_dir = tempdir()?;
        let inner = Arc::new(LocalFS::new(temp_dir.path().to_path_buf()));
        let dry = DryBackend::new(inner.clone());

        let path = Path::new("file.txt");
        dry.write(path, b"Mapachito")?;

        assert!(!inner.exists(path));
        Ok(())
    }

    #[test]
    fn test_dry_backend_passes_through_reads() -> Result<()> {
        let temp_dir = tempdir()?;
        let inner = Arc::new(LocalFS::new(temp_dir.path().to_path_buf()));
        inner.write(Path::new("file.txt"), b"Mapachito")?;

        let dry = DryBackend::new(inner);
        let content = dry.read(Path::new("file.txt"))?;
        assert_eq!(content, b"Mapachito");
        Ok(())
    }
}

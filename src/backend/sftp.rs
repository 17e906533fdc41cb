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
    io::{Read, Seek, SeekFrom, Write},
    net::TcpStream,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use ssh2::Session;

use super::{FileAttr, StorageBackend};

/// How to authenticate an SFTP session.
pub enum AuthMethod {
    Password(String),
    PubKey {
        pubkey: Option<PathBuf>,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
}

/// A backend talking to a remote repository over SFTP.
///
/// `ssh2::Session`/`ssh2::Sftp` hold the raw socket and aren't safe to drive
/// concurrently, so every operation takes the same mutex: a backend used by
/// multiple worker threads serializes on it, trading throughput for
/// correctness. `connections()` is overridden with a small constant to keep
/// callers from over-queuing work against a single channel.
pub struct SftpBackend {
    repo_path: PathBuf,
    sftp: Mutex<ssh2::Sftp>,
    // Kept alive for as long as the backend is: the session owns the
    // underlying TCP connection the SFTP channel is multiplexed over.
    _session: Session,
}

impl SftpBackend {
    pub fn new(
        repo_path: PathBuf,
        username: String,
        host: String,
        port: u16,
        auth: AuthMethod,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((host.as_str(), port))
            .with_context(|| format!("Could not connect to '{host}:{port}'"))?;

        let mut session =
            Session::new().with_context(|| "Could not create an SSH session")?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .with_context(|| format!("SSH handshake with '{host}:{port}' failed"))?;

        match auth {
            AuthMethod::Password(password) => {
                session
                    .userauth_password(&username, &password)
                    .with_context(|| format!("Password authentication failed for {username}@{host}"))?;
            }
            AuthMethod::PubKey {
                pubkey,
                private_key,
                passphrase,
            } => {
                session
                    .userauth_pubkey_file(
                        &username,
                        pubkey.as_deref(),
                        &private_key,
                        passphrase.as_deref(),
                    )
                    .with_context(|| {
                        format!("Public key authentication failed for {username}@{host}")
                    })?;
            }
        }

        if !session.authenticated() {
            bail!("SSH authentication failed for {username}@{host}");
        }

        let sftp = session
            .sftp()
            .with_context(|| format!("Could not open an SFTP channel to {username}@{host}"))?;

        Ok(Self {
            repo_path,
            sftp: Mutex::new(sftp),
            _session: session,
        })
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        self.repo_path.join(path)
    }
}

impl StorageBackend for SftpBackend {
    fn create(&self) -> Result<()> {
        self.create_dir_all(Path::new(""))
    }

    fn root_exists(&self) -> bool {
        self.sftp.lock().stat(&self.repo_path).is_ok()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        let sftp = self.sftp.lock();
        let mut file = sftp
            .open(&full_path)
            .with_context(|| format!("Could not open '{}' on SFTP backend", path.display()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| format!("Could not read '{}' from SFTP backend", path.display()))?;
        Ok(data)
    }

    fn seek_read(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        let sftp = self.sftp.lock();
        let mut file = sftp.open(&full_path).with_context(|| {
            format!(
                "Could not open '{}' for range reading on SFTP backend",
                path.display()
            )
        })?;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("Could not seek to offset {offset} in '{}'", path.display()))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).with_context(|| {
            format!(
                "Could not read {length} bytes from offset {offset} in '{}'",
                path.display()
            )
        })?;
        Ok(buffer)
    }

    fn seek_read_from_end(&self, path: &Path, offset: i64, length: u64) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        let sftp = self.sftp.lock();
        let mut file = sftp.open(&full_path).with_context(|| {
            format!(
                "Could not open '{}' for range reading on SFTP backend",
                path.display()
            )
        })?;
        file.seek(SeekFrom::End(offset)).with_context(|| {
            format!(
                "Could not seek to offset (from end) {offset} in '{}'",
                path.display()
            )
        })?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer).with_context(|| {
            format!(
                "Could not read {length} bytes from offset (from end) {offset} in '{}'",
                path.display()
            )
        })?;
        Ok(buffer)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        let sftp = self.sftp.lock();
        let mut file = sftp
            .create(&full_path)
            .with_context(|| format!("Could not create '{}' on SFTP backend", path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Could not write to '{}' on SFTP backend", path.display()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let full_from = self.full_path(from);
        let full_to = self.full_path(to);
        self.sftp
            .lock()
            .rename(&full_from, &full_to, None)
            .with_context(|| {
                format!(
                    "Could not rename '{}' to '{}' on SFTP backend",
                    from.display(),
                    to.display()
                )
            })
    }

    fn remove_file(&self, file_path: &Path) -> Result<()> {
        let full_path = self.full_path(file_path);
        self.sftp.lock().unlink(&full_path).with_context(|| {
            format!(
                "Could not remove file '{}' from SFTP backend",
                file_path.display()
            )
        })
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let full_path = self.full_path(path);
        self.sftp.lock().mkdir(&full_path, 0o755).with_context(|| {
            format!(
                "Could not create directory '{}' on SFTP backend",
                path.display()
            )
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.full_path(path);

        let mut current = PathBuf::new();
        for component in full_path.components() {
            current.push(component);
            let sftp = self.sftp.lock();
            if sftp.stat(&current).is_ok() {
                continue;
            }
            sftp.mkdir(&current, 0o755).with_context(|| {
                format!("Could not create directory '{}' on SFTP backend", current.display())
            })?;
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let full_path = self.full_path(path);
        let entries = self.sftp.lock().readdir(&full_path).with_context(|| {
            format!(
                "Could not list directory '{}' on SFTP backend",
                path.display()
            )
        })?;

        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, _)| entry_path.strip_prefix(&self.repo_path).ok().map(Path::to_path_buf))
            .collect())
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        let full_path = self.full_path(path);
        self.sftp.lock().rmdir(&full_path).with_context(|| {
            format!(
                "Could not remove directory '{}' from SFTP backend",
                path.display()
            )
        })
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.full_path(path);
        let entries = self
            .sftp
            .lock()
            .readdir(&full_path)
            .with_context(|| format!("Could not list directory '{}' for removal", path.display()))?;

        for (entry_path, stat) in entries {
            let relative = entry_path.strip_prefix(&self.repo_path).unwrap_or(&entry_path);
            if stat.is_dir() {
                self.remove_dir_all(relative)?;
            } else {
                self.sftp.lock().unlink(&entry_path).with_context(|| {
                    format!("Could not remove file '{}'", entry_path.display())
                })?;
            }
        }

        self.sftp.lock().rmdir(&full_path).with_context(|| {
            format!(
                "Could not remove directory '{}' from SFTP backend",
                path.display()
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let full_path = self.full_path(path);
        self.sftp.lock().stat(&full_path).is_ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        let full_path = self.full_path(path);
        self.sftp
            .lock()
            .stat(&full_path)
            .map(|s| s.is_file())
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let full_path = self.full_path(path);
        self.sftp
            .lock()
            .stat(&full_path)
            .map(|s| s.is_dir())
            .unwrap_or(false)
    }

    fn lstat(&self, path: &Path) -> Result<FileAttr> {
        let full_path = self.full_path(path);
        let stat = self.sftp.lock().lstat(&full_path).with_context(|| {
            format!("Could not stat '{}' on SFTP backend", path.display())
        })?;

        Ok(FileAttr {
            size: stat.size,
            uid: stat.uid,
            gid: stat.gid,
            perm: stat.perm,
            atime: stat
                .atime
                .map(|t| std::time::UNIX_EPOCH + std::time::Duration::from_secs(t)),
            mtime: stat
                .mtime
                .map(|t| std::time::UNIX_EPOCH + std::time::Duration::from_secs(t)),
        })
    }

    fn connections(&self) -> usize {
        // A single SSH session multiplexes SFTP requests over one channel;
        // don't let callers pile on more concurrency than that can serve.
        4
    }
}

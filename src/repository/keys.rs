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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    backend::StorageBackend,
    repository::{error::RepoError, repo::KEYS_DIR, storage::SecureStorage},
};

/// Length in bytes of the Argon2 salt stored alongside each key file.
const SALT_LENGTH: usize = 16;
/// Length in bytes of the AES-256-GCM-SIV master key.
const MASTER_KEY_LENGTH: usize = 32;

/// The on-disk, compressed-but-unencrypted representation of a wrapped
/// master key. Several of these can coexist in a repository's `keys`
/// directory, one per password/keyfile a user has registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// Base64-encoded Argon2 salt.
    pub salt: String,
    /// Base64-encoded master key, encrypted with the password-derived key.
    pub encrypted_key: String,
}

/// Generates a new random master key for a repository.
pub fn generate_new_master_key() -> Vec<u8> {
    let mut key = vec![0u8; MASTER_KEY_LENGTH];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Wraps `master_key` with a key derived from `password`, producing a
/// [`KeyFile`] that can be safely stored alongside the repository.
pub fn generate_key_file(password: &str, master_key: Vec<u8>) -> Result<KeyFile> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::rng().fill_bytes(&mut salt);

    let intermediate_key = SecureStorage::derive_key(password, &salt);
    let encrypted_key = SecureStorage::encrypt_with_key(&intermediate_key, &master_key)?;

    Ok(KeyFile {
        salt: general_purpose::STANDARD.encode(salt),
        encrypted_key: general_purpose::STANDARD.encode(encrypted_key),
    })
}

/// Tries to unwrap a single key file with `password`, returning the
/// repository's master key on success.
fn try_unlock(password: &str, key_file_bytes: &[u8]) -> Result<Vec<u8>> {
    let key_file_json = SecureStorage::decompress(key_file_bytes)?;
    let key_file: KeyFile = serde_json::from_slice(&key_file_json)?;

    let salt = general_purpose::STANDARD.decode(&key_file.salt)?;
    let encrypted_key = general_purpose::STANDARD.decode(&key_file.encrypted_key)?;

    let intermediate_key = SecureStorage::derive_key(password, &salt);
    SecureStorage::decrypt_with_key(&intermediate_key, &encrypted_key)
}

/// Recovers the repository's master key, either by reading a specific key
/// file from the local filesystem (`key_file_path`) or by trying every key
/// file stored in the repository's `keys` directory.
pub fn retrieve_master_key(
    password: &str,
    key_file_path: Option<&PathBuf>,
    backend: Arc<dyn StorageBackend>,
) -> Result<Vec<u8>> {
    if let Some(path) = key_file_path {
        let key_file_bytes =
            std::fs::read(path).with_context(|| format!("Could not read key file {path:?}"))?;
        return try_unlock(password, &key_file_bytes);
    }

    let keys_path = PathBuf::from(KEYS_DIR);
    let key_paths = backend
        .read_dir(&keys_path)
        .with_context(|| "Could not list the repository's keys")?;

    for path in key_paths {
        if !backend.is_file(&path) {
            continue;
        }

        let key_file_bytes = backend.read(&path)?;
        if let Ok(master_key) = try_unlock(password, &key_file_bytes) {
            return Ok(master_key);
        }
    }

    Err(RepoError::WrongPassphrase.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_unlock_key_file() -> Result<()> {
        let master_key = generate_new_master_key();
        let key_file = generate_key_file("mapachito", master_key.clone())?;

        let key_file_json = serde_json::to_vec(&key_file)?;
        let compressed = SecureStorage::compress(&key_file_json, zstd::DEFAULT_COMPRESSION_LEVEL)?;

        let recovered = try_unlock("mapachito", &compressed)?;
        assert_eq!(recovered, master_key);
    }

    #[test]
    fn test_unlock_with_wrong_password_fails() -> Result<()> {
        let master_key = generate_new_master_key();
        let key_file = generate_key_file("mapachito", master_key)?;

        let key_file_json = serde_json::to_vec(&key_file)?;
        let compressed = SecureStorage::compress(&key_file_json, zstd::DEFAULT_COMPRESSION_LEVEL)?;

        assert!(try_unlock("wrong-password", &compressed).is_err());
        Ok(())
    }
}

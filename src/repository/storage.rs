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

use aes_gcm_siv::{
    Aes256GcmSiv, Nonce,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use anyhow::{Result, bail};
use rand::RngCore;

/// Length in bytes of a nonce-misuse-resistant AES-256-GCM-SIV nonce.
const NONCE_LENGTH: usize = 12;

/// Builds a [`SecureStorage`] from a compression level and a master key.
#[derive(Default)]
pub struct SecureStorageBuilder {
    compression_level: Option<i32>,
}

impl SecureStorageBuilder {
    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn with_key(self, key: Vec<u8>) -> SecureStorage {
        SecureStorage {
            key,
            compression_level: self.compression_level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL),
        }
    }
}

/// Encrypts and compresses blobs, files and metadata before they are written
/// to the backend, using a single repository-wide master key.
///
/// The on-the-wire layout produced by [`encrypt_with_key`] (and used by
/// [`SecureStorage::encode`]) is `nonce(12) || ciphertext || tag(16)`, where
/// `ciphertext || tag` is the single opaque blob AES-GCM-SIV's `encrypt`
/// returns.
pub struct SecureStorage {
    key: Vec<u8>,
    compression_level: i32,
}

impl SecureStorage {
    pub fn build() -> SecureStorageBuilder {
        SecureStorageBuilder::default()
    }

    /// Compresses then encrypts `data` with the repository's master key.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = Self::compress(data, self.compression_level)?;
        Self::encrypt_with_key(&self.key, &compressed)
    }

    /// Decrypts then decompresses `data` with the repository's master key.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decrypted = Self::decrypt_with_key(&self.key, data)?;
        Self::decompress(&decrypted)
    }

    /// Compresses `data` with zstd at the given level.
    pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
        zstd::encode_all(data, level).map_err(Into::into)
    }

    /// Decompresses zstd-compressed `data`.
    pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(Into::into)
    }

    /// Derives a 32-byte key from `password` and `salt` using Argon2id.
    pub fn derive_key(password: &str, salt: &[u8]) -> Vec<u8> {
        use argon2::Argon2;

        let mut output = [0u8; 32];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut output)
            .expect("Argon2 key derivation should not fail with fixed-size output");

        output.to_vec()
    }

    /// Encrypts `plaintext` with `key` using AES-256-GCM-SIV, prefixing a
    /// freshly generated random nonce to the ciphertext.
    pub fn encrypt_with_key(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256GcmSiv::new(GenericArray::from_slice(key));

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts data produced by [`encrypt_with_key`].
    pub fn decrypt_with_key(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LENGTH {
            bail!("Encrypted data is too short to contain a nonce");
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let cipher = Aes256GcmSiv::new(GenericArray::from_slice(key));
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Decryption failed: wrong key or corrupt data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = test_key();
        let plaintext = b"mapachito backs up your files";

        let encrypted = SecureStorage::encrypt_with_key(&key, plaintext).unwrap();
        let decrypted = SecureStorage::decrypt_with_key(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let plaintext = b"mapachito backs up your files";
        let encrypted = SecureStorage::encrypt_with_key(&test_key(), plaintext).unwrap();

        let wrong_key = vec![9u8; 32];
        assert!(SecureStorage::decrypt_with_key(&wrong_key, &encrypted).is_err());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let storage = SecureStorage::build()
            .with_compression(zstd::DEFAULT_COMPRESSION_LEVEL)
            .with_key(test_key());

        let data = b"some data that compresses reasonably well well well well well".repeat(4);
        let encoded = storage.encode(&data).unwrap();
        let decoded = storage.decode(&encoded).unwrap();

        assert_eq!(decoded, data);
    }

    #[test]
    fn test_compress_decompress_round_trip() {
        let data = b"mapachito".repeat(100);
        let compressed = SecureStorage::compress(&data, zstd::DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = SecureStorage::decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let salt = b"0123456789abcdef";
        let a = SecureStorage::derive_key("mapachito", salt);
        let b = SecureStorage::derive_key("mapachito", salt);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}

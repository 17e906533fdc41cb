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

pub mod defaults;

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::{RwLock, RwLockReadGuard};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::commands::GlobalArgs;

pub const ID_LENGTH: usize = 32;

/// A content identifier. `ID`s address blobs, packs, snapshots and index
/// files by the SHA-256 digest of their plaintext contents (or, for
/// snapshots, of their serialized form).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ID(pub [u8; ID_LENGTH]);

impl ID {
    /// Computes the ID of `data` as its SHA-256 digest.
    pub fn from_content(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();

        let mut bytes = [0u8; ID_LENGTH];
        bytes.copy_from_slice(&digest);
        ID(bytes)
    }

    /// Generates a new ID from a source of cryptographic randomness. Used for
    /// identifiers that do not address content, such as repository IDs.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        ID(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != ID_LENGTH * 2 {
            bail!("Invalid ID length: expected {} hex chars, got {}", ID_LENGTH * 2, s.len());
        }

        let mut bytes = [0u8; ID_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| anyhow::anyhow!("Invalid hex string '{s}'"))?;
        }

        Ok(ID(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Returns the first `num_bytes` bytes of the ID as a hex string, for
    /// compact display purposes. Not guaranteed to be unique.
    pub fn to_short_hex(&self, num_bytes: usize) -> String {
        self.0[..num_bytes.min(ID_LENGTH)]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID({})", self.to_hex())
    }
}

impl FromStr for ID {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ID::from_hex(s)
    }
}

impl Serialize for ID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ID::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The kind of content a blob holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum BlobType {
    Data = 0,
    Tree = 1,
    /// Alignment padding written at the end of a pack, never addressed by an
    /// ID and never looked up through the index.
    Padding = 2,
}

/// The kind of file stored at the top level of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pack,
    Snapshot,
    Index,
    Key,
    Manifest,
    Lock,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::Pack => "pack",
            FileType::Snapshot => "snapshot",
            FileType::Index => "index",
            FileType::Key => "key",
            FileType::Manifest => "manifest",
            FileType::Lock => "lock",
        };
        write!(f, "{s}")
    }
}

/// Whether a freshly-encoded blob should be assigned a content-derived ID or
/// forced to keep a specific, already-known one (used when repacking).
#[derive(Debug, Clone)]
pub enum SaveID {
    CalculateID,
    WithID(ID),
}

/// Process-wide, read-mostly settings derived from [`GlobalArgs`]. Set once at
/// startup via [`set_global_opts_with_args`] and read from anywhere that needs
/// to know the requested verbosity without threading it through every call.
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    pub verbosity: u32,
    pub quiet: bool,
}

static GLOBAL_OPTS: RwLock<Option<GlobalOpts>> = RwLock::new(None);

pub fn global_opts() -> RwLockReadGuard<'static, Option<GlobalOpts>> {
    GLOBAL_OPTS.read()
}

pub fn set_global_opts_with_args(args: &GlobalArgs) {
    let verbosity = if args.quiet {
        0
    } else {
        args.verbosity.unwrap_or(defaults::DEFAULT_VERBOSITY)
    };

    *GLOBAL_OPTS.write() = Some(GlobalOpts {
        verbosity,
        quiet: args.quiet,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_content_is_deterministic() {
        let a = ID::from_content(b"mapachito");
        let b = ID::from_content(b"mapachito");
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_hex_round_trip() {
        let id = ID::from_content(b"mapachito");
        let hex = id.to_hex();
        let parsed = ID::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_short_hex() {
        let id = ID::from_content(b"mapachito");
        assert_eq!(id.to_short_hex(4).len(), 8);
    }

    #[test]
    fn test_blob_type_round_trips_through_u8() {
        let tag: u8 = BlobType::Tree.into();
        let back = BlobType::try_from(tag).unwrap();
        assert_eq!(back, BlobType::Tree);
    }
}

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

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::Sender;

use crate::{
    backend::StorageBackend,
    global::{BlobType, FileType, ID, SaveID},
    repository::{error::RepoError, repo::Repository, storage::SecureStorage},
};

/// Describes where a single blob lives within a pack's body, as recorded in
/// the pack's encrypted trailer.
#[derive(Debug, Clone)]
pub struct PackedBlobDescriptor {
    pub id: ID,
    pub blob_type: BlobType,
    pub offset: u32,
    pub length: u32,
    pub raw_length: u32,
}

const TRAILER_ENTRY_LEN: usize = 1 + 32 + 4 + 4 + 4;
/// Length in bytes of the little-endian footer giving the encrypted
/// trailer's length. Always the very last bytes of a pack file.
const FOOTER_LEN: usize = 4;

/// The result of flushing a [`Packer`]: the finished pack's bytes, ready to
/// be handed to a [`PackSaver`], alongside the blob descriptors that must be
/// merged into the index.
pub struct FlushedPack {
    pub id: ID,
    pub data: Vec<u8>,
    pub descriptors: Vec<PackedBlobDescriptor>,
    pub meta_size: u64,
}

/// Accumulates already-encoded blobs into a single pack file.
///
/// A pack's on-disk layout is `blob_0 || blob_1 || ... || blob_n || trailer
/// || footer`, where `trailer` is an encrypted, length-prefixed list of
/// [`PackedBlobDescriptor`] entries and `footer` is a 4-byte little-endian
/// integer giving the trailer's encrypted length, so the trailer (and from
/// it, every blob) can be located and decoded by reading backwards from the
/// end of the file.
#[derive(Default)]
pub struct Packer {
    buffer: Vec<u8>,
    descriptors: Vec<PackedBlobDescriptor>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an already-encoded blob to the pack, recording its offset and
    /// lengths for the trailer.
    pub fn add_blob(
        &mut self,
        id: ID,
        blob_type: BlobType,
        data: Vec<u8>,
        raw_length: u64,
        encoded_length: u64,
    ) {
        let offset = self.buffer.len() as u32;
        self.descriptors.push(PackedBlobDescriptor {
            id,
            blob_type,
            offset,
            length: encoded_length as u32,
            raw_length: raw_length as u32,
        });
        self.buffer.extend_from_slice(&data);
    }

    /// The current size in bytes of the pack body (not counting the
    /// trailer, which is only built on [`Packer::flush`]).
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn encode_trailer(descriptors: &[PackedBlobDescriptor]) -> Vec<u8> {
        let mut trailer = Vec::with_capacity(descriptors.len() * TRAILER_ENTRY_LEN);
        for d in descriptors {
            let type_tag: u8 = d.blob_type.into();
            trailer.push(type_tag);
            trailer.extend_from_slice(&d.id.0);
            trailer.extend_from_slice(&d.offset.to_le_bytes());
            trailer.extend_from_slice(&d.length.to_le_bytes());
            trailer.extend_from_slice(&d.raw_length.to_le_bytes());
        }
        trailer
    }

    fn decode_trailer(trailer: &[u8]) -> Result<Vec<PackedBlobDescriptor>> {
        if trailer.len() % TRAILER_ENTRY_LEN != 0 {
            return Err(RepoError::Integrity(
                "pack trailer length is not a multiple of the entry size".to_string(),
            )
            .into());
        }

        let mut descriptors = Vec::with_capacity(trailer.len() / TRAILER_ENTRY_LEN);
        for entry in trailer.chunks_exact(TRAILER_ENTRY_LEN) {
            let blob_type = BlobType::try_from(entry[0])
                .map_err(|_| RepoError::Integrity("invalid blob type tag".to_string()))?;

            let mut id_bytes = [0u8; 32];
            id_bytes.copy_from_slice(&entry[1..33]);

            let offset = u32::from_le_bytes(entry[33..37].try_into().unwrap());
            let length = u32::from_le_bytes(entry[37..41].try_into().unwrap());
            let raw_length = u32::from_le_bytes(entry[41..45].try_into().unwrap());

            descriptors.push(PackedBlobDescriptor {
                id: ID(id_bytes),
                blob_type,
                offset,
                length,
                raw_length,
            });
        }

        Ok(descriptors)
    }

    /// Finishes the pack, encrypting its trailer and appending the footer.
    /// Returns `None` if no blobs were ever added.
    pub fn flush(&mut self, secure_storage: &SecureStorage) -> Result<Option<FlushedPack>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let trailer = Self::encode_trailer(&self.descriptors);
        let encrypted_trailer = secure_storage.encode(&trailer)?;
        let meta_size = (encrypted_trailer.len() + FOOTER_LEN) as u64;

        let mut data = std::mem::take(&mut self.buffer);
        data.extend_from_slice(&encrypted_trailer);
        data.extend_from_slice(&(encrypted_trailer.len() as u32).to_le_bytes());

        let id = ID::from_content(&data);
        let descriptors = std::mem::take(&mut self.descriptors);

        Ok(Some(FlushedPack {
            id,
            data,
            descriptors,
            meta_size,
        }))
    }

    /// Reads and decrypts the blob descriptor trailer of an already-saved
    /// pack, without loading the blobs themselves.
    pub fn parse_pack_header(
        repo: &Repository,
        backend: &dyn StorageBackend,
        secure_storage: &SecureStorage,
        id: &ID,
    ) -> Result<Vec<PackedBlobDescriptor>> {
        let path = repo.get_path(FileType::Pack, id);

        let footer = backend.seek_read_from_end(&path, FOOTER_LEN as i64, FOOTER_LEN as u64)?;
        if footer.len() != FOOTER_LEN {
            return Err(
                RepoError::Integrity(format!("pack {id} is too short to contain a footer")).into(),
            );
        }
        let trailer_len = u32::from_le_bytes(footer.try_into().unwrap()) as u64;

        let encrypted_trailer = backend.seek_read_from_end(
            &path,
            (FOOTER_LEN as u64 + trailer_len) as i64,
            trailer_len,
        )?;
        let trailer = secure_storage.decode(&encrypted_trailer)?;

        Self::decode_trailer(&trailer)
    }
}

/// Hands finished packs off to a small pool of worker threads that write
/// them to the backend, so the archiver pipeline never blocks on I/O while
/// it keeps chunking and encrypting.
pub struct PackSaver {
    sender: Option<Sender<(Vec<u8>, ID)>>,
    handles: Vec<JoinHandle<()>>,
}

impl PackSaver {
    pub fn new(concurrency: usize, save_fn: Arc<dyn Fn(Vec<u8>, ID) + Send + Sync>) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = crossbeam_channel::bounded::<(Vec<u8>, ID)>(concurrency * 2);

        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let receiver = receiver.clone();
            let save_fn = save_fn.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok((data, id)) = receiver.recv() {
                    save_fn(data, id);
                }
            }));
        }

        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Queues a finished pack for saving. Never blocks the caller past the
    /// channel's backpressure limit.
    pub fn save_pack(&self, data: Vec<u8>, save_id: SaveID) -> Result<()> {
        let id = match save_id {
            SaveID::CalculateID => ID::from_content(&data),
            SaveID::WithID(id) => id,
        };

        match &self.sender {
            Some(sender) => sender
                .send((data, id))
                .map_err(|e| anyhow!("Could not enqueue pack for saving: {e}")),
            None => bail!("PackSaver has already been finished"),
        }
    }

    /// Closes the work queue and waits for every in-flight pack to be saved.
    pub fn finish(mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> SecureStorage {
        SecureStorage::build()
            .with_compression(zstd::DEFAULT_COMPRESSION_LEVEL)
            .with_key(vec![3u8; 32])
    }

    #[test]
    fn test_flush_empty_packer_returns_none() {
        let mut packer = Packer::new();
        let storage = test_storage();
        assert!(packer.flush(&storage).unwrap().is_none());
    }

    #[test]
    fn test_add_blob_and_flush_roundtrips_trailer() {
        let mut packer = Packer::new();
        let storage = test_storage();

        let id_a = ID::from_content(b"blob a");
        let id_b = ID::from_content(b"blob b");

        packer.add_blob(id_a.clone(), BlobType::Data, b"hello".to_vec(), 5, 5);
        packer.add_blob(id_b.clone(), BlobType::Tree, b"world!".to_vec(), 6, 6);

        assert_eq!(packer.size(), 11);

        let flushed = packer.flush(&storage).unwrap().unwrap();
        assert!(flushed.data.len() > 11);
        assert_eq!(flushed.descriptors.len(), 2);
        assert_eq!(flushed.descriptors[0].id, id_a);
        assert_eq!(flushed.descriptors[0].offset, 0);
        assert_eq!(flushed.descriptors[1].offset, 5);

        let encrypted_trailer_len =
            u32::from_le_bytes(flushed.data[flushed.data.len() - FOOTER_LEN..].try_into().unwrap())
                as usize;
        let trailer_start = flushed.data.len() - FOOTER_LEN - encrypted_trailer_len;
        let decoded = storage
            .decode(&flushed.data[trailer_start..flushed.data.len() - FOOTER_LEN])
            .unwrap();
        let descriptors = Packer::decode_trailer(&decoded).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1].id, id_b);
    }
}

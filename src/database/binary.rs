//! Binary attachments and the database-owned binary pool
//!
//! Small attachments live in memory. Anything above the configured threshold
//! is streamed into a scratch file inside the pool's temporary directory,
//! encrypted with a per-attachment ChaCha20 key held only in memory. Clearing
//! an attachment or the pool deletes its scratch files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use log::warn;
use tempfile::{NamedTempFile, TempDir};
use zeroize::Zeroizing;

use super::protected::ProtectedValue;
use crate::error::Result;
use crate::utils::random_array;

/// Pool reference held by entries
pub type BinaryId = u32;

const CHUNK_SIZE: usize = 64 * 1024;

enum Storage {
    Memory(ProtectedValue),
    File {
        file: NamedTempFile,
        len: u64,
        key: Zeroizing<[u8; 32]>,
        nonce: [u8; 12],
    },
    Cleared,
}

/// Attachment content backed by memory or by a scratch file
pub struct BinaryAttachment {
    protected: bool,
    storage: Storage,
}

impl BinaryAttachment {
    /// In-memory attachment
    pub fn from_bytes(protected: bool, bytes: &[u8]) -> Self {
        Self {
            protected,
            storage: Storage::Memory(ProtectedValue::new(protected, bytes)),
        }
    }

    /// Read an attachment from a stream
    ///
    /// Content larger than `memory_threshold` bytes is written to a scratch
    /// file in `scratch_dir`.
    pub fn from_reader<R: Read>(
        protected: bool,
        mut reader: R,
        scratch_dir: &Path,
        memory_threshold: usize,
    ) -> Result<Self> {
        let mut head = Zeroizing::new(Vec::new());
        reader
            .by_ref()
            .take(memory_threshold as u64 + 1)
            .read_to_end(&mut head)?;

        if head.len() <= memory_threshold {
            return Ok(Self::from_bytes(protected, &head));
        }

        let key = Zeroizing::new(random_array::<32>());
        let nonce = random_array::<12>();
        let mut cipher = ChaCha20::new((&*key).into(), (&nonce).into());

        let file = tempfile::Builder::new()
            .prefix("bin-")
            .tempfile_in(scratch_dir)?;
        let mut len = 0u64;
        {
            let mut writer = BufWriter::new(file.as_file());
            let mut chunk = Zeroizing::new(head.to_vec());
            cipher.apply_keystream(&mut chunk);
            writer.write_all(&chunk)?;
            len += chunk.len() as u64;

            let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                cipher.apply_keystream(&mut buf[..n]);
                writer.write_all(&buf[..n])?;
                len += n as u64;
            }
            writer.flush()?;
        }

        Ok(Self {
            protected,
            storage: Storage::File { file, len, key, nonce },
        })
    }

    /// Whether the attachment is flagged as protected
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Content length without materializing the data
    pub fn len(&self) -> u64 {
        match &self.storage {
            Storage::Memory(value) => value.len() as u64,
            Storage::File { len, .. } => *len,
            Storage::Cleared => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the content lives in a scratch file
    pub fn is_file_backed(&self) -> bool {
        matches!(self.storage, Storage::File { .. })
    }

    /// Path of the scratch file, if any
    pub fn scratch_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File { file, .. } => Some(file.path()),
            _ => None,
        }
    }

    /// Stream the content
    pub fn reader(&self) -> Result<Box<dyn Read + '_>> {
        match &self.storage {
            Storage::Memory(value) => Ok(Box::new(Cursor::new(value.bytes()))),
            Storage::File { file, key, nonce, .. } => {
                let handle = file.reopen()?;
                Ok(Box::new(ScratchReader {
                    inner: BufReader::new(handle),
                    cipher: ChaCha20::new((&**key).into(), nonce.into()),
                }))
            }
            Storage::Cleared => Ok(Box::new(io::empty())),
        }
    }

    /// Read the whole content
    pub fn to_vec(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.len() as usize));
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Release memory and delete the scratch file; safe to call repeatedly
    pub fn clear(&mut self) {
        match std::mem::replace(&mut self.storage, Storage::Cleared) {
            Storage::Memory(mut value) => value.clear(),
            Storage::File { file, .. } => {
                let path = file.path().to_path_buf();
                if let Err(e) = file.close() {
                    warn!("Failed to delete scratch file {}: {}", path.display(), e);
                }
            }
            Storage::Cleared => {}
        }
    }
}

impl PartialEq for BinaryAttachment {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => *a == *b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for BinaryAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryAttachment")
            .field("protected", &self.protected)
            .field("len", &self.len())
            .field("file_backed", &self.is_file_backed())
            .finish()
    }
}

struct ScratchReader {
    inner: BufReader<File>,
    cipher: ChaCha20,
}

impl Read for ScratchReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

/// Attachments owned by one database
///
/// Entries refer to attachments by [`BinaryId`]. The scratch directory is
/// created on first use and removed by [`BinaryPool::clear`] or on drop.
pub struct BinaryPool {
    items: BTreeMap<BinaryId, BinaryAttachment>,
    next_id: BinaryId,
    scratch_root: PathBuf,
    scratch: Option<TempDir>,
    memory_threshold: usize,
}

impl BinaryPool {
    pub fn new(scratch_root: PathBuf, memory_threshold: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            next_id: 0,
            scratch_root,
            scratch: None,
            memory_threshold,
        }
    }

    fn scratch_dir(&mut self) -> Result<PathBuf> {
        if self.scratch.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("kpcore-")
                .tempdir_in(&self.scratch_root)?;
            self.scratch = Some(dir);
        }
        Ok(self
            .scratch
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .unwrap_or_else(|| self.scratch_root.clone()))
    }

    /// Directory holding this pool's scratch files, once created
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }

    /// Add in-memory content
    pub fn add_bytes(&mut self, protected: bool, bytes: &[u8]) -> Result<BinaryId> {
        if bytes.len() > self.memory_threshold {
            return self.add_reader(protected, bytes);
        }
        Ok(self.push(BinaryAttachment::from_bytes(protected, bytes)))
    }

    /// Add content from a stream, spilling to a scratch file when large
    pub fn add_reader<R: Read>(&mut self, protected: bool, reader: R) -> Result<BinaryId> {
        let dir = self.scratch_dir()?;
        let attachment = BinaryAttachment::from_reader(protected, reader, &dir, self.memory_threshold)?;
        Ok(self.push(attachment))
    }

    fn push(&mut self, attachment: BinaryAttachment) -> BinaryId {
        let id = self.next_id;
        self.items.insert(id, attachment);
        self.next_id += 1;
        id
    }

    /// Insert under an explicit id, replacing (and clearing) any previous one
    pub fn insert(&mut self, id: BinaryId, attachment: BinaryAttachment) {
        if let Some(mut old) = self.items.insert(id, attachment) {
            old.clear();
        }
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    pub fn get(&self, id: BinaryId) -> Option<&BinaryAttachment> {
        self.items.get(&id)
    }

    /// Remove an attachment, deleting its scratch file
    pub fn remove(&mut self, id: BinaryId) -> bool {
        match self.items.remove(&id) {
            Some(mut attachment) => {
                attachment.clear();
                true
            }
            None => false,
        }
    }

    /// Attachments in id order
    pub fn iter(&self) -> impl Iterator<Item = (BinaryId, &BinaryAttachment)> {
        self.items.iter().map(|(id, b)| (*id, b))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clear every attachment and delete the scratch directory
    pub fn clear(&mut self) {
        for attachment in self.items.values_mut() {
            attachment.clear();
        }
        self.items.clear();
        self.next_id = 0;
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to delete scratch directory {}: {}", path.display(), e);
            }
        }
    }
}

impl std::fmt::Debug for BinaryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryPool")
            .field("len", &self.items.len())
            .field("scratch", &self.scratch_path())
            .finish()
    }
}

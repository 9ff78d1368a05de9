//! Engine configuration

use std::path::PathBuf;

use crate::crypto::{EncryptionAlgorithm, KdfKind};
use crate::{
    DEFAULT_HISTORY_MAX_ITEMS, DEFAULT_HISTORY_MAX_SIZE, DEFAULT_MEMORY_THRESHOLD, DEFAULT_ROUNDS_V3,
};

/// Payload compression for KDBX bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Header flag value
    pub fn id(&self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            _ => None,
        }
    }
}

/// Settings applied when creating, loading and saving databases
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Where attachment scratch directories are created
    pub scratch_dir: PathBuf,
    /// Attachments larger than this many bytes are kept in scratch files
    pub memory_threshold: usize,
    /// Reassign duplicate node ids on load instead of failing
    pub change_duplicate_id: bool,
    /// AES-KDF rounds for new KDB databases
    pub v3_rounds: u64,
    /// KDF for new KDBX databases
    pub v4_kdf: KdfKind,
    /// Cipher for new KDBX databases
    pub v4_cipher: EncryptionAlgorithm,
    /// Compression for new KDBX databases
    pub compression: Compression,
    /// History item limit for new KDBX databases, -1 for unlimited
    pub history_max_items: i32,
    /// History size limit in bytes for new KDBX databases, -1 for unlimited
    pub history_max_size: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            change_duplicate_id: false,
            v3_rounds: DEFAULT_ROUNDS_V3,
            v4_kdf: KdfKind::Argon2d,
            v4_cipher: EncryptionAlgorithm::Aes256,
            compression: Compression::Gzip,
            history_max_items: DEFAULT_HISTORY_MAX_ITEMS,
            history_max_size: DEFAULT_HISTORY_MAX_SIZE,
        }
    }
}

impl DatabaseConfig {
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    pub fn with_change_duplicate_id(mut self, change: bool) -> Self {
        self.change_duplicate_id = change;
        self
    }

    pub fn with_v3_rounds(mut self, rounds: u64) -> Self {
        self.v3_rounds = rounds;
        self
    }

    pub fn with_v4_kdf(mut self, kdf: KdfKind) -> Self {
        self.v4_kdf = kdf;
        self
    }

    pub fn with_v4_cipher(mut self, cipher: EncryptionAlgorithm) -> Self {
        self.v4_cipher = cipher;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.memory_threshold, 1024 * 1024);
        assert_eq!(config.v3_rounds, 300);
        assert_eq!(config.v4_kdf, KdfKind::Argon2d);
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.history_max_items, 10);
        assert_eq!(config.history_max_size, 6 * 1024 * 1024);
        assert!(!config.change_duplicate_id);
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::default()
            .with_scratch_dir("/tmp/scratch")
            .with_change_duplicate_id(true)
            .with_v4_cipher(EncryptionAlgorithm::ChaCha20)
            .with_compression(Compression::None);
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/scratch"));
        assert!(config.change_duplicate_id);
        assert_eq!(config.v4_cipher, EncryptionAlgorithm::ChaCha20);
        assert_eq!(Compression::from_id(config.compression.id()), Some(Compression::None));
    }
}

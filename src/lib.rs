//! # KeePass Core
//!
//! An encrypted, hierarchical password database engine reading and writing
//! KeePass 1.x (`.kdb`) and KeePass 2.x version 4 (`.kdbx`) files.
//!
//! ## Features
//!
//! - Composite keys from a password and/or key file
//! - AES-KDF, Argon2d and Argon2id key derivation
//! - AES-256-CBC and ChaCha20 payload encryption
//! - Protected in-memory secrets and scratch-file backed attachments
//! - Group/entry tree with move, copy, delete, recycle bin and history
//!
//! ## Example
//!
//! ```no_run
//! use kpcore::{Database, NoProgress};
//! use std::path::Path;
//!
//! let mut db = Database::new();
//! db.load_file(Path::new("/path/to/vault.kdbx"), Some("my_password"), None, &mut NoProgress).unwrap();
//!
//! if let Some(results) = db.search("mail", 50) {
//!     for entry in &results.entries {
//!         println!("{}: {}", entry.title(), entry.username());
//!     }
//! }
//! ```

pub mod business;
pub mod crypto;
pub mod database;
pub mod error;
pub mod format;
pub mod utils;

// Re-export main types
pub use business::{ActionNodeValues, ActionResult, Database, NodeAction, SearchResult, SortNodeEnum, SortOptions};
pub use crypto::{EncryptionAlgorithm, KdfKind};
pub use database::{
    BinaryAttachment, BinaryId, Compression, DatabaseConfig, Engine, EngineState, Entry, FormatVersion, Group,
    NodeId, NodeRef, NodeTimes, ProtectedValue,
};
pub use error::{DatabaseError, Result};
pub use format::{NoProgress, ProgressSink, Stage};

/// Default AES-KDF rounds for new KDB databases
pub const DEFAULT_ROUNDS_V3: u64 = 300;

/// KDB headers store rounds as a signed 32-bit value
pub const MAX_ROUNDS_V3: u64 = i32::MAX as u64;

/// Attachments above this size are kept in scratch files
pub const DEFAULT_MEMORY_THRESHOLD: usize = 1024 * 1024;

/// History entries kept per entry, -1 for unlimited
pub const DEFAULT_HISTORY_MAX_ITEMS: i32 = 10;

/// History bytes kept per entry, -1 for unlimited
pub const DEFAULT_HISTORY_MAX_SIZE: i64 = 6 * 1024 * 1024;

/// KDB top-level group treated as the backup container
pub const BACKUP_GROUP_NAME: &str = "Backup";

/// Title of the KDBX recycle bin group
pub const RECYCLE_BIN_NAME: &str = "Recycle Bin";

/// Standard icon of the recycle bin
pub const RECYCLE_BIN_ICON: u32 = 43;

/// Written to the KDBX `Generator` field
pub const GENERATOR_NAME: &str = "kpcore";

/// First signature word shared by both formats
pub const PWM_DBSIG_1: u32 = 0x9AA2_D903;

/// Second signature word of KDB files
pub const DBSIG_2_V3: u32 = 0xB54B_FB65;

/// Second signature word of KDBX files
pub const DBSIG_2_V4: u32 = 0xB54B_FB67;

/// Title of the synthetic group returned by searches
pub const SEARCH_RESULTS_TITLE: &str = "Search results";

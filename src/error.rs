//! Error types for KeePass Core

use thiserror::Error;

/// Main error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The first two header words match neither the KDB nor the KDBX signature
    #[error("Invalid database signature")]
    InvalidSignature,

    /// Signature matched but the file version is not supported
    #[error("Unsupported database version: {0:#010x}")]
    UnsupportedVersion(u32),

    /// Structural decode failure or checksum mismatch
    #[error("Corrupt database: {0}")]
    CorruptFormat(String),

    /// The derived key did not decrypt the database
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Key file has no content
    #[error("Key file is empty")]
    KeyFileEmpty,

    /// Key file could not be interpreted
    #[error("Invalid key file: {0}")]
    KeyFileInvalid(String),

    /// Neither a password nor a key file was supplied
    #[error("A password or a key file is required")]
    MissingCredentials,

    /// Two nodes of the same kind share an identifier
    #[error("Duplicate {kind} identifier: {id}")]
    DuplicateIdentifier {
        /// "group" or "entry"
        kind: &'static str,
        /// Display form of the identifier
        id: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// KDF round count out of range for the engine
    #[error("Number of rounds out of range: {0}")]
    NumberFormat(u64),

    /// Cipher or KDF not supported by this engine
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Structural mutation rejected before any state changed
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// Node not present in the index
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No engine is loaded in the facade
    #[error("Database is not loaded")]
    NotLoaded,

    /// Progress sink requested cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Cipher or KDF failure
    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl From<quick_xml::Error> for DatabaseError {
    fn from(err: quick_xml::Error) -> Self {
        DatabaseError::CorruptFormat(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for DatabaseError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        DatabaseError::CorruptFormat(err.to_string())
    }
}

impl From<base64::DecodeError> for DatabaseError {
    fn from(err: base64::DecodeError) -> Self {
        DatabaseError::CorruptFormat(err.to_string())
    }
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

//! Cryptographic operations for KeePass databases
//!
//! This module implements the key derivation chain and ciphers shared by the
//! KDB and KDBX 4 formats: composite keys, AES-KDF and Argon2, AES-256-CBC,
//! ChaCha20 and the SHA-2/HMAC helpers used for integrity checks.

mod aes;
pub mod cipher;
mod hash;
pub mod kdf;
mod key;
pub mod keyfile;
pub mod stream;

pub use aes::{IV_SIZE, KEY_LENGTH, decrypt, encrypt, transform_key};
pub use cipher::EncryptionAlgorithm;
pub use hash::{hmac_sha256, sha256, sha512};
pub use kdf::{KdfKind, KdfParameters};
pub use key::{KeyFormat, PasswordEncoding, master_key, password_key, validate_password_encoding};
pub use keyfile::file_key;
pub use stream::{InnerStream, chacha20_apply};

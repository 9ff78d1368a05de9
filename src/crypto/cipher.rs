//! Outer cipher selection
//!
//! KDB bodies are always AES-256-CBC. KDBX 4 names the cipher by UUID in
//! the header and supports AES-256-CBC and ChaCha20.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aes::{self, IV_SIZE, KEY_LENGTH};
use super::stream::{CHACHA20_NONCE_LENGTH, chacha20_apply};
use crate::error::{DatabaseError, Result};

/// AES-256-CBC cipher identifier
pub const AES256_UUID: Uuid = Uuid::from_u128(0x31C1F2E6_BF71_4350_BE58_05216AFC5AFF);

/// ChaCha20 cipher identifier
pub const CHACHA20_UUID: Uuid = Uuid::from_u128(0xD6038A2B_8B6F_4CB5_A524_339A31DBB59A);

/// Twofish-CBC cipher identifier (recognized, not supported)
pub const TWOFISH_UUID: Uuid = Uuid::from_u128(0xAD68F29F_576F_4BB9_A36A_D47AF965346C);

/// Body encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    Aes256,
    ChaCha20,
}

impl EncryptionAlgorithm {
    /// Header identifier
    pub fn uuid(&self) -> Uuid {
        match self {
            EncryptionAlgorithm::Aes256 => AES256_UUID,
            EncryptionAlgorithm::ChaCha20 => CHACHA20_UUID,
        }
    }

    /// Look up a cipher by header identifier
    pub fn from_uuid(uuid: &Uuid) -> Result<Self> {
        match *uuid {
            AES256_UUID => Ok(EncryptionAlgorithm::Aes256),
            CHACHA20_UUID => Ok(EncryptionAlgorithm::ChaCha20),
            TWOFISH_UUID => Err(DatabaseError::UnsupportedAlgorithm("Twofish".to_string())),
            other => Err(DatabaseError::UnsupportedAlgorithm(format!("cipher {}", other))),
        }
    }

    /// Length of the encryption IV stored in the header
    pub fn iv_length(&self) -> usize {
        match self {
            EncryptionAlgorithm::Aes256 => IV_SIZE,
            EncryptionAlgorithm::ChaCha20 => CHACHA20_NONCE_LENGTH,
        }
    }

    /// Encrypt a whole body
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8; KEY_LENGTH], iv: &[u8]) -> Result<Vec<u8>> {
        match self {
            EncryptionAlgorithm::Aes256 => Ok(aes::encrypt(plaintext, key, &aes_iv(iv)?)),
            EncryptionAlgorithm::ChaCha20 => {
                let mut data = plaintext.to_vec();
                chacha20_apply(key, &chacha_nonce(iv)?, &mut data);
                Ok(data)
            }
        }
    }

    /// Decrypt a whole body
    ///
    /// For AES a padding failure is reported as `InvalidCredentials`, since
    /// that is what a wrong key looks like.
    pub fn decrypt(&self, ciphertext: &[u8], key: &[u8; KEY_LENGTH], iv: &[u8]) -> Result<Vec<u8>> {
        match self {
            EncryptionAlgorithm::Aes256 => {
                aes::decrypt(ciphertext, key, &aes_iv(iv)?).map_err(|_| DatabaseError::InvalidCredentials)
            }
            EncryptionAlgorithm::ChaCha20 => {
                let mut data = ciphertext.to_vec();
                chacha20_apply(key, &chacha_nonce(iv)?, &mut data);
                Ok(data)
            }
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::Aes256 => f.write_str("AES-256"),
            EncryptionAlgorithm::ChaCha20 => f.write_str("ChaCha20"),
        }
    }
}

fn aes_iv(iv: &[u8]) -> Result<[u8; IV_SIZE]> {
    iv.try_into()
        .map_err(|_| DatabaseError::CorruptFormat(format!("AES IV must be {} bytes, got {}", IV_SIZE, iv.len())))
}

fn chacha_nonce(iv: &[u8]) -> Result<[u8; CHACHA20_NONCE_LENGTH]> {
    iv.try_into().map_err(|_| {
        DatabaseError::CorruptFormat(format!(
            "ChaCha20 nonce must be {} bytes, got {}",
            CHACHA20_NONCE_LENGTH,
            iv.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_lookup() {
        assert_eq!(EncryptionAlgorithm::from_uuid(&AES256_UUID).unwrap(), EncryptionAlgorithm::Aes256);
        assert_eq!(EncryptionAlgorithm::from_uuid(&CHACHA20_UUID).unwrap(), EncryptionAlgorithm::ChaCha20);
        assert!(matches!(
            EncryptionAlgorithm::from_uuid(&TWOFISH_UUID),
            Err(DatabaseError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_roundtrip_both_ciphers() {
        let key = [0x33u8; 32];
        for algorithm in [EncryptionAlgorithm::Aes256, EncryptionAlgorithm::ChaCha20] {
            let iv = vec![0x44u8; algorithm.iv_length()];
            let encrypted = algorithm.encrypt(b"payload", &key, &iv).unwrap();
            assert_eq!(algorithm.decrypt(&encrypted, &key, &iv).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_wrong_iv_length() {
        let key = [0u8; 32];
        assert!(matches!(
            EncryptionAlgorithm::Aes256.encrypt(b"x", &key, &[0u8; 12]),
            Err(DatabaseError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(EncryptionAlgorithm::Aes256.to_string(), "AES-256");
    }
}

//! AES-256 primitives
//!
//! - AES-256-CBC with PKCS7 padding for the encrypted body of both formats
//! - AES-256-ECB key transformation (AES-KDF) used by KDB and by KDBX 4
//!   databases configured with the AES key derivation

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};
use zeroize::Zeroizing;

use super::hash::sha256;

/// Key length for AES-256 (32 bytes = 256 bits)
pub const KEY_LENGTH: usize = 32;

/// IV size for AES-CBC (16 bytes = 128 bits)
pub const IV_SIZE: usize = 16;

/// AES block size
const BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Encrypt plaintext using AES-256-CBC with PKCS7 padding
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_LENGTH], iv: &[u8; IV_SIZE]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt ciphertext using AES-256-CBC with PKCS7 padding
///
/// A padding failure almost always means the key was wrong; callers map the
/// error accordingly.
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_LENGTH], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, String> {
    if ciphertext.is_empty() {
        return Err("Empty ciphertext".to_string());
    }
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(format!("Ciphertext length {} is not a multiple of the block size", ciphertext.len()));
    }

    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| format!("Decryption failed: {:?}", e))
}

/// Transform a 32-byte key by encrypting it `rounds` times with AES-256-ECB
/// under `seed`, then hashing the result with SHA-256
pub fn transform_key(key: &[u8; KEY_LENGTH], seed: &[u8; KEY_LENGTH], rounds: u64) -> Zeroizing<[u8; KEY_LENGTH]> {
    let cipher = Aes256::new(GenericArray::from_slice(seed));

    let mut buffer = Zeroizing::new(*key);
    {
        let (left, right) = buffer.split_at_mut(BLOCK_SIZE);
        let left = GenericArray::from_mut_slice(left);
        let right = GenericArray::from_mut_slice(right);
        for _ in 0..rounds {
            cipher.encrypt_block(left);
            cipher.encrypt_block(right);
        }
    }

    Zeroizing::new(sha256(&[buffer.as_slice()]))
}

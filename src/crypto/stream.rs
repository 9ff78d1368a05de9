//! ChaCha20 stream ciphers
//!
//! Used as the KDBX 4 outer cipher and as the inner random stream that
//! obfuscates protected XML values.

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use zeroize::Zeroizing;

use super::hash::sha512;
use crate::error::{DatabaseError, Result};

/// ChaCha20 key length
pub const CHACHA20_KEY_LENGTH: usize = 32;

/// ChaCha20 nonce length (IETF variant)
pub const CHACHA20_NONCE_LENGTH: usize = 12;

/// Inner random stream identifier: none
pub const INNER_STREAM_NONE: u32 = 0;

/// Inner random stream identifier: Salsa20 (KDBX 3.1)
pub const INNER_STREAM_SALSA20: u32 = 2;

/// Inner random stream identifier: ChaCha20
pub const INNER_STREAM_CHACHA20: u32 = 3;

/// XOR `data` in place with the ChaCha20 keystream
pub fn chacha20_apply(key: &[u8; CHACHA20_KEY_LENGTH], nonce: &[u8; CHACHA20_NONCE_LENGTH], data: &mut [u8]) {
    let mut cipher = ChaCha20::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Keystream used for protected values inside the XML document
///
/// The stream is consumed in document order, so reader and writer must
/// process protected values in the same sequence.
pub struct InnerStream {
    cipher: Option<ChaCha20>,
}

impl InnerStream {
    /// Create the stream for an inner-header stream id and key
    pub fn new(id: u32, key: &[u8]) -> Result<Self> {
        match id {
            INNER_STREAM_NONE => Ok(Self { cipher: None }),
            INNER_STREAM_CHACHA20 => {
                let hash = Zeroizing::new(sha512(&[key]));
                let mut k = Zeroizing::new([0u8; CHACHA20_KEY_LENGTH]);
                let mut n = [0u8; CHACHA20_NONCE_LENGTH];
                k.copy_from_slice(&hash[..CHACHA20_KEY_LENGTH]);
                n.copy_from_slice(&hash[CHACHA20_KEY_LENGTH..CHACHA20_KEY_LENGTH + CHACHA20_NONCE_LENGTH]);
                let k: &[u8; CHACHA20_KEY_LENGTH] = &k;
                Ok(Self { cipher: Some(ChaCha20::new(k.into(), (&n).into())) })
            }
            other => Err(DatabaseError::UnsupportedAlgorithm(format!("inner random stream {}", other))),
        }
    }

    /// XOR `data` in place with the next bytes of the keystream
    pub fn process(&mut self, data: &mut [u8]) {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply_keystream(data);
        }
    }
}

//! KeePass 2.x (KDBX 4) codec
//!
//! Layout:
//!
//! ```text
//! outer header | SHA-256(header) | HMAC(header) | HMAC block stream
//! ```
//!
//! The block stream carries the encrypted payload, optionally gzipped:
//! the inner header (protected stream key and binaries) followed by the XML
//! document.

pub mod header;
pub mod hmac_stream;
pub mod inner;
pub mod variant;
mod reader;
mod writer;
mod xml;

pub use reader::load;
pub use writer::save;

use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LENGTH};
use crate::error::Result;
use header::HeaderV4;

/// Keys for one load or save
pub(crate) struct BodyKeys {
    /// Payload cipher key: SHA-256(master seed ‖ transformed key)
    pub cipher_key: Zeroizing<[u8; KEY_LENGTH]>,
    /// Block HMAC base key: SHA-512(master seed ‖ transformed key ‖ 0x01)
    pub hmac_key: Zeroizing<[u8; 64]>,
}

pub(crate) fn derive_keys(master_key: &[u8; KEY_LENGTH], header: &HeaderV4) -> Result<BodyKeys> {
    let transformed = header.kdf.transform(master_key)?;
    let seed = header.master_seed.as_slice();
    Ok(BodyKeys {
        cipher_key: Zeroizing::new(crypto::sha256(&[seed, transformed.as_slice()])),
        hmac_key: Zeroizing::new(crypto::sha512(&[seed, transformed.as_slice(), &[1u8]])),
    })
}

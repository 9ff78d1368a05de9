//! KeePass 1.x (KDB) codec
//!
//! Layout: a fixed [`header::HeaderV3`] followed by an AES-256-CBC body. The
//! body holds every group record, then every entry record; each record is a
//! run of `u16 type / u32 size / data` fields ending with type `0xFFFF`.

pub mod header;
mod reader;
mod writer;

pub use reader::{construct_tree_from_index, load};
pub use writer::save;

use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LENGTH};
use header::HeaderV3;

pub(crate) const FIELD_END: u16 = 0xFFFF;

// Group record fields
pub(crate) const GROUP_ID: u16 = 0x0001;
pub(crate) const GROUP_NAME: u16 = 0x0002;
pub(crate) const GROUP_CREATION: u16 = 0x0003;
pub(crate) const GROUP_LAST_MOD: u16 = 0x0004;
pub(crate) const GROUP_LAST_ACCESS: u16 = 0x0005;
pub(crate) const GROUP_EXPIRY: u16 = 0x0006;
pub(crate) const GROUP_IMAGE: u16 = 0x0007;
pub(crate) const GROUP_LEVEL: u16 = 0x0008;
pub(crate) const GROUP_FLAGS: u16 = 0x0009;

// Entry record fields
pub(crate) const ENTRY_UUID: u16 = 0x0001;
pub(crate) const ENTRY_GROUP_ID: u16 = 0x0002;
pub(crate) const ENTRY_IMAGE: u16 = 0x0003;
pub(crate) const ENTRY_TITLE: u16 = 0x0004;
pub(crate) const ENTRY_URL: u16 = 0x0005;
pub(crate) const ENTRY_USERNAME: u16 = 0x0006;
pub(crate) const ENTRY_PASSWORD: u16 = 0x0007;
pub(crate) const ENTRY_NOTES: u16 = 0x0008;
pub(crate) const ENTRY_CREATION: u16 = 0x0009;
pub(crate) const ENTRY_LAST_MOD: u16 = 0x000A;
pub(crate) const ENTRY_LAST_ACCESS: u16 = 0x000B;
pub(crate) const ENTRY_EXPIRY: u16 = 0x000C;
pub(crate) const ENTRY_BINARY_DESC: u16 = 0x000D;
pub(crate) const ENTRY_BINARY_DATA: u16 = 0x000E;

/// Body key: SHA-256(master seed ‖ AES-KDF(composite key))
pub(crate) fn final_key(master_key: &[u8; KEY_LENGTH], header: &HeaderV3) -> Zeroizing<[u8; KEY_LENGTH]> {
    let transformed = crypto::transform_key(master_key, &header.transform_seed, header.rounds as u64);
    Zeroizing::new(crypto::sha256(&[header.master_seed.as_slice(), transformed.as_slice()]))
}

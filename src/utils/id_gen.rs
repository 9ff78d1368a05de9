//! Identifier and seed generation utilities

use rand::{Rng, RngCore};
use uuid::Uuid;

/// Generate a random legacy group ID
///
/// KeePass 1.x reserves 0 and `u32::MAX`, so neither is ever returned.
pub fn generate_group_int_id() -> u32 {
    let mut rng = rand::rng();
    rng.random_range(1..u32::MAX)
}

/// Generate a random (version 4) UUID
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generate `len` random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Generate a fixed-size random seed
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}

//! HMAC-authenticated block stream
//!
//! Each block is `hmac[32] | length: i32 | data`, authenticated with a key
//! derived from the block index. A zero-length block ends the stream.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use zeroize::Zeroizing;

use crate::crypto::{hmac_sha256, sha512};
use crate::error::{DatabaseError, Result};

/// Payload bytes per block when writing
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Block index whose key authenticates the outer header
pub const HEADER_BLOCK_INDEX: u64 = u64::MAX;

/// Per-block HMAC key: SHA-512(index ‖ hmac base key)
pub fn block_key(index: u64, hmac_key: &[u8; 64]) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(sha512(&[index.to_le_bytes().as_slice(), hmac_key.as_slice()]))
}

fn block_hmac(index: u64, hmac_key: &[u8; 64], data: &[u8]) -> Result<[u8; 32]> {
    let key = block_key(index, hmac_key);
    hmac_sha256(
        key.as_slice(),
        &[
            index.to_le_bytes().as_slice(),
            (data.len() as i32).to_le_bytes().as_slice(),
            data,
        ],
    )
}

/// HMAC of the serialized outer header
pub fn header_hmac(header: &[u8], hmac_key: &[u8; 64]) -> Result<[u8; 32]> {
    let key = block_key(HEADER_BLOCK_INDEX, hmac_key);
    hmac_sha256(key.as_slice(), &[header])
}

/// Verify and concatenate every block
///
/// The header HMAC is checked first, so a block that fails here was altered.
pub fn read_blocks(data: &[u8], hmac_key: &[u8; 64]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(data);
    let mut out = Vec::with_capacity(data.len());
    let mut index = 0u64;

    loop {
        let mut expected = [0u8; 32];
        cursor.read_exact(&mut expected).map_err(truncated)?;
        let len = cursor.read_i32::<LittleEndian>().map_err(truncated)?;
        let len = usize::try_from(len)
            .map_err(|_| DatabaseError::CorruptFormat(format!("block {} has a negative length", index)))?;
        let start = cursor.position() as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| DatabaseError::CorruptFormat(format!("block {} is truncated", index)))?;
        let block = &data[start..end];

        if block_hmac(index, hmac_key, block)? != expected {
            return Err(DatabaseError::CorruptFormat(format!("block {} failed authentication", index)));
        }
        if len == 0 {
            break;
        }
        out.extend_from_slice(block);
        cursor.set_position(end as u64);
        index += 1;
    }
    Ok(out)
}

/// Split `data` into authenticated blocks, ending with an empty block
pub fn write_blocks(data: &[u8], hmac_key: &[u8; 64]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + (data.len() / BLOCK_SIZE + 2) * 36);
    let mut index = 0u64;
    for chunk in data.chunks(BLOCK_SIZE).chain(std::iter::once(&[][..])) {
        out.extend_from_slice(&block_hmac(index, hmac_key, chunk)?);
        out.extend_from_slice(&(chunk.len() as i32).to_le_bytes());
        out.extend_from_slice(chunk);
        index += 1;
    }
    Ok(out)
}

fn truncated(_: std::io::Error) -> DatabaseError {
    DatabaseError::CorruptFormat("block stream is truncated".to_string())
}

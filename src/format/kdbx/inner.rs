//! KDBX 4 inner header: protected stream settings and the binary pool

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use zeroize::Zeroizing;

use crate::database::{BinaryAttachment, BinaryPool};
use crate::error::{DatabaseError, Result};

const FIELD_END: u8 = 0;
const FIELD_STREAM_ID: u8 = 1;
const FIELD_STREAM_KEY: u8 = 2;
const FIELD_BINARY: u8 = 3;

const BINARY_FLAG_PROTECTED: u8 = 0x01;

/// Protected-value stream settings read from the inner header
pub struct InnerHeader {
    pub stream_id: u32,
    pub stream_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for InnerHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerHeader").field("stream_id", &self.stream_id).finish_non_exhaustive()
    }
}

/// Parse the inner header, adding binaries to `pool` in file order
///
/// `pool` must be empty so that binary `n` gets pool id `n`, matching the
/// `Ref` attributes in the XML. Returns the header and the offset of the XML
/// document.
pub fn read_inner_header(data: &[u8], pool: &mut BinaryPool) -> Result<(InnerHeader, usize)> {
    let mut cursor = Cursor::new(data);
    let mut stream_id = None;
    let mut stream_key = None;

    loop {
        let field_id = cursor.read_u8().map_err(truncated)?;
        let size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let start = cursor.position() as usize;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| DatabaseError::CorruptFormat("inner header field overruns the payload".to_string()))?;
        let value = &data[start..end];
        cursor.set_position(end as u64);

        match field_id {
            FIELD_END => break,
            FIELD_STREAM_ID => {
                let id = value
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .ok_or_else(|| DatabaseError::CorruptFormat("bad inner stream id".to_string()))?;
                stream_id = Some(id);
            }
            FIELD_STREAM_KEY => stream_key = Some(Zeroizing::new(value.to_vec())),
            FIELD_BINARY => {
                let (flags, content) = value
                    .split_first()
                    .ok_or_else(|| DatabaseError::CorruptFormat("empty binary field".to_string()))?;
                pool.add_bytes(flags & BINARY_FLAG_PROTECTED != 0, content)?;
            }
            other => {
                return Err(DatabaseError::CorruptFormat(format!("unknown inner header field {}", other)));
            }
        }
    }

    let header = InnerHeader {
        stream_id: stream_id.ok_or_else(|| DatabaseError::CorruptFormat("inner header has no stream id".to_string()))?,
        stream_key: stream_key
            .ok_or_else(|| DatabaseError::CorruptFormat("inner header has no stream key".to_string()))?,
    };
    Ok((header, cursor.position() as usize))
}

/// Serialize the inner header with the given binaries in reference order
pub fn write_inner_header(
    out: &mut Vec<u8>,
    stream_id: u32,
    stream_key: &[u8],
    binaries: &[&BinaryAttachment],
) -> Result<()> {
    write_field(out, FIELD_STREAM_ID, &stream_id.to_le_bytes());
    write_field(out, FIELD_STREAM_KEY, stream_key);
    for attachment in binaries {
        let content = attachment.to_vec()?;
        let flags = if attachment.is_protected() { BINARY_FLAG_PROTECTED } else { 0 };
        out.push(FIELD_BINARY);
        out.extend_from_slice(&((content.len() + 1) as u32).to_le_bytes());
        out.push(flags);
        out.extend_from_slice(&content);
    }
    write_field(out, FIELD_END, &[]);
    Ok(())
}

fn write_field(out: &mut Vec<u8>, id: u8, data: &[u8]) {
    out.push(id);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn truncated(_: std::io::Error) -> DatabaseError {
    DatabaseError::CorruptFormat("inner header is truncated".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::stream::INNER_STREAM_CHACHA20;

    fn pool() -> BinaryPool {
        BinaryPool::new(std::env::temp_dir(), 1024)
    }

    #[test]
    fn test_round_trip() {
        let first = BinaryAttachment::from_bytes(true, b"first");
        let second = BinaryAttachment::from_bytes(false, b"");
        let mut out = Vec::new();
        write_inner_header(&mut out, INNER_STREAM_CHACHA20, &[5u8; 64], &[&first, &second]).unwrap();
        out.extend_from_slice(b"<KeePassFile/>");

        let mut pool = pool();
        let (header, offset) = read_inner_header(&out, &mut pool).unwrap();
        assert_eq!(header.stream_id, INNER_STREAM_CHACHA20);
        assert_eq!(header.stream_key.as_slice(), &[5u8; 64]);
        assert_eq!(&out[offset..], b"<KeePassFile/>");

        assert_eq!(pool.len(), 2);
        assert!(pool.get(0).unwrap().is_protected());
        assert_eq!(pool.get(0).unwrap().to_vec().unwrap().as_slice(), b"first");
        assert!(pool.get(1).unwrap().is_empty());
    }

    #[test]
    fn test_missing_stream_key() {
        let mut out = Vec::new();
        write_field(&mut out, FIELD_STREAM_ID, &3u32.to_le_bytes());
        write_field(&mut out, FIELD_END, &[]);
        assert!(matches!(read_inner_header(&out, &mut pool()), Err(DatabaseError::CorruptFormat(_))));
    }

    #[test]
    fn test_overrun() {
        let mut out = vec![FIELD_STREAM_KEY];
        out.extend_from_slice(&100u32.to_le_bytes());
        out.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(read_inner_header(&out, &mut pool()), Err(DatabaseError::CorruptFormat(_))));
    }
}

//! KDBX 4 import

use std::io::Read;

use flate2::read::GzDecoder;
use log::info;
use zeroize::Zeroizing;

use super::header::HeaderV4;
use super::hmac_stream::{header_hmac, read_blocks};
use super::inner::read_inner_header;
use super::{derive_keys, xml};
use crate::crypto::{self, InnerStream};
use crate::database::{Compression, DatabaseConfig, DatabaseV4, EngineState};
use crate::error::{DatabaseError, Result};
use crate::format::{ProgressSink, Stage, enter_stage};

const HASH_SIZE: usize = 32;

/// Verify, decrypt and parse a complete KDBX 4 file
///
/// A header HMAC mismatch means the key is wrong; any other integrity
/// failure means the file is damaged.
pub fn load(
    data: &[u8],
    password: Option<&str>,
    key_file: Option<&[u8]>,
    config: &DatabaseConfig,
    progress: &mut dyn ProgressSink,
) -> Result<DatabaseV4> {
    enter_stage(progress, Stage::HeaderParse)?;
    let (header, header_len) = HeaderV4::read(data)?;
    let header_bytes = &data[..header_len];
    let rest = &data[header_len..];
    if rest.len() < 2 * HASH_SIZE {
        return Err(DatabaseError::CorruptFormat("file ends after the header".to_string()));
    }
    let (stored_hash, rest) = rest.split_at(HASH_SIZE);
    let (stored_hmac, blocks) = rest.split_at(HASH_SIZE);
    if crypto::sha256(&[header_bytes]).as_slice() != stored_hash {
        return Err(DatabaseError::CorruptFormat("header checksum mismatch".to_string()));
    }

    let mut db = DatabaseV4::new("", config);
    db.state = EngineState::Loading;
    db.set_credentials(password, key_file)?;
    db.cipher = header.cipher;
    db.kdf = header.kdf.clone();
    db.compression = header.compression;
    db.public_custom_data = header.public_custom_data.clone();

    enter_stage(progress, Stage::KeyDerivation)?;
    let keys = derive_keys(db.master_key()?, &header)?;
    if header_hmac(header_bytes, &keys.hmac_key)?.as_slice() != stored_hmac {
        return Err(DatabaseError::InvalidCredentials);
    }

    enter_stage(progress, Stage::BodyDecrypt)?;
    let encrypted = read_blocks(blocks, &keys.hmac_key)?;
    let plain = Zeroizing::new(
        header
            .cipher
            .decrypt(&encrypted, &keys.cipher_key, &header.encryption_iv)
            .map_err(|e| match e {
                DatabaseError::InvalidCredentials => {
                    DatabaseError::CorruptFormat("payload padding is invalid".to_string())
                }
                other => other,
            })?,
    );
    let payload = match header.compression {
        Compression::None => plain,
        Compression::Gzip => {
            let mut out = Zeroizing::new(Vec::new());
            GzDecoder::new(plain.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| DatabaseError::CorruptFormat(format!("gzip: {}", e)))?;
            out
        }
    };

    enter_stage(progress, Stage::BodyParse)?;
    let (inner, offset) = read_inner_header(&payload, &mut db.binaries)?;
    let mut stream = InnerStream::new(inner.stream_id, &inner.stream_key)?;

    enter_stage(progress, Stage::TreeConstruct)?;
    xml::read_document(&payload[offset..], &mut stream, &mut db, progress)?;

    db.state = EngineState::Loaded;
    info!(
        "Loaded KDBX database '{}': {} groups, {} entries, {} attachments",
        db.meta.name,
        db.index.group_count(),
        db.index.entry_count(),
        db.binaries.len()
    );
    Ok(db)
}

//! Key file interpretation
//!
//! A key file contributes 32 bytes to the composite key. KeePass accepts:
//! 1. XML key files (`<KeyFile>`), version 1.0 with base64 data or version
//!    2.0 with hex data and a truncated SHA-256 checksum
//! 2. Exactly 32 bytes, used verbatim
//! 3. Exactly 64 bytes of hex, decoded to 32 bytes
//! 4. Anything else, hashed with SHA-256

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;
use zeroize::Zeroizing;

use super::hash::sha256;
use crate::error::{DatabaseError, Result};

/// Length of a derived key-file key
pub const FILE_KEY_LENGTH: usize = 32;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Derive the 32-byte key-file component from raw key file contents
///
/// `accept_xml` is false for the legacy format, which treats XML key files
/// as opaque bytes.
pub fn file_key(data: &[u8], accept_xml: bool) -> Result<Zeroizing<[u8; FILE_KEY_LENGTH]>> {
    if data.is_empty() {
        return Err(DatabaseError::KeyFileEmpty);
    }

    if accept_xml {
        if let Some(key) = parse_xml_key_file(data)? {
            return Ok(key);
        }
    }

    match data.len() {
        FILE_KEY_LENGTH => {
            let mut key = Zeroizing::new([0u8; FILE_KEY_LENGTH]);
            key.copy_from_slice(data);
            Ok(key)
        }
        64 => match hex::decode(data) {
            Ok(decoded) => {
                let decoded = Zeroizing::new(decoded);
                let mut key = Zeroizing::new([0u8; FILE_KEY_LENGTH]);
                key.copy_from_slice(&decoded);
                Ok(key)
            }
            Err(_) => Ok(Zeroizing::new(sha256(&[data]))),
        },
        _ => Ok(Zeroizing::new(sha256(&[data]))),
    }
}

/// Try to read `data` as a KeePass XML key file
///
/// Returns `Ok(None)` when the content is not an XML key file at all, and
/// `KeyFileInvalid` when it is one but its key data is unusable.
pub fn parse_xml_key_file(data: &[u8]) -> Result<Option<Zeroizing<[u8; FILE_KEY_LENGTH]>>> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let Ok(text) = std::str::from_utf8(data) else {
        return Ok(None);
    };
    if !text.trim_start().starts_with('<') {
        return Ok(None);
    }

    let mut reader = Reader::from_str(text);
    let mut path: Vec<String> = Vec::new();
    let mut version = String::new();
    let mut key_data = Zeroizing::new(String::new());
    let mut hash_attr: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.is_empty() && name != "KeyFile" {
                    return Ok(None);
                }
                if name == "Data" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"Hash" {
                            hash_attr = Some(attr.unescape_value()?.into_owned());
                        }
                    }
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let Ok(value) = t.unescape() else {
                    return Ok(None);
                };
                match path.join("/").as_str() {
                    "KeyFile/Meta/Version" => version.push_str(&value),
                    "KeyFile/Key/Data" => key_data.push_str(&value),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Ok(None),
            _ => {}
        }
    }

    let version = version.trim();
    if version.is_empty() && key_data.is_empty() {
        return Ok(None);
    }

    let compact: Zeroizing<String> =
        Zeroizing::new(key_data.chars().filter(|c| !c.is_whitespace()).collect());

    let raw = if version.starts_with("2.") {
        let raw = Zeroizing::new(
            hex::decode(compact.as_bytes())
                .map_err(|e| DatabaseError::KeyFileInvalid(format!("bad hex data: {}", e)))?,
        );
        if let Some(expected) = hash_attr {
            let digest = sha256(&[raw.as_slice()]);
            if !hex::encode_upper(&digest[..4]).eq_ignore_ascii_case(expected.trim()) {
                return Err(DatabaseError::KeyFileInvalid("checksum mismatch".to_string()));
            }
        }
        raw
    } else if version.starts_with("1.") {
        Zeroizing::new(
            STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| DatabaseError::KeyFileInvalid(format!("bad base64 data: {}", e)))?,
        )
    } else {
        return Err(DatabaseError::KeyFileInvalid(format!("unsupported version '{}'", version)));
    };

    if raw.len() != FILE_KEY_LENGTH {
        return Err(DatabaseError::KeyFileInvalid(format!(
            "key data is {} bytes, expected {}",
            raw.len(),
            FILE_KEY_LENGTH
        )));
    }

    let mut key = Zeroizing::new([0u8; FILE_KEY_LENGTH]);
    key.copy_from_slice(&raw);
    Ok(Some(key))
}

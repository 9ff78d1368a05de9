//! KDBX 4 outer header

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use uuid::Uuid;

use super::variant::{VariantDictionary, VariantValue};
use crate::crypto::kdf::{ARGON2_VERSION_13, KDF_UUID_KEY};
use crate::crypto::{EncryptionAlgorithm, KdfKind, KdfParameters};
use crate::database::Compression;
use crate::error::{DatabaseError, Result};
use crate::utils::{random_array, random_bytes};
use crate::{DBSIG_2_V4, PWM_DBSIG_1};

/// File version written by this crate (4.0)
pub const FILE_VERSION_4: u32 = 0x0004_0000;
const FILE_VERSION_MAJOR_MASK: u32 = 0xFFFF_0000;

const FIELD_END: u8 = 0;
const FIELD_COMMENT: u8 = 1;
const FIELD_CIPHER_ID: u8 = 2;
const FIELD_COMPRESSION: u8 = 3;
const FIELD_MASTER_SEED: u8 = 4;
const FIELD_ENCRYPTION_IV: u8 = 7;
const FIELD_KDF_PARAMETERS: u8 = 11;
const FIELD_PUBLIC_CUSTOM_DATA: u8 = 12;

const END_MARKER: &[u8] = b"\r\n\r\n";

// Variant dictionary keys for KDF parameters
const KDF_AES_ROUNDS: &str = "R";
const KDF_AES_SEED: &str = "S";
const KDF_ARGON2_SALT: &str = "S";
const KDF_ARGON2_PARALLELISM: &str = "P";
const KDF_ARGON2_MEMORY: &str = "M";
const KDF_ARGON2_ITERATIONS: &str = "I";
const KDF_ARGON2_VERSION: &str = "V";

/// Parsed outer header plus the exact bytes it was read from
#[derive(Debug, Clone)]
pub struct HeaderV4 {
    pub version: u32,
    pub cipher: EncryptionAlgorithm,
    pub compression: Compression,
    pub master_seed: [u8; 32],
    pub encryption_iv: Vec<u8>,
    pub kdf: KdfParameters,
    pub public_custom_data: Option<Vec<u8>>,
}

impl HeaderV4 {
    /// Header for a new save with fresh seed, IV and KDF salt
    pub fn new(
        cipher: EncryptionAlgorithm,
        compression: Compression,
        kdf: &KdfParameters,
        public_custom_data: Option<Vec<u8>>,
    ) -> Self {
        let mut kdf = kdf.clone();
        kdf.reseed();
        Self {
            version: FILE_VERSION_4,
            cipher,
            compression,
            master_seed: random_array(),
            encryption_iv: random_bytes(cipher.iv_length()),
            kdf,
            public_custom_data,
        }
    }

    /// Parse the header; returns it with the number of bytes consumed
    pub fn read(data: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(data);
        let signature1 = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let signature2 = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if signature1 != PWM_DBSIG_1 || signature2 != DBSIG_2_V4 {
            return Err(DatabaseError::InvalidSignature);
        }
        let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if version & FILE_VERSION_MAJOR_MASK != FILE_VERSION_4 & FILE_VERSION_MAJOR_MASK {
            return Err(DatabaseError::UnsupportedVersion(version));
        }

        let mut cipher = None;
        let mut compression = Compression::None;
        let mut master_seed = None;
        let mut encryption_iv = None;
        let mut kdf = None;
        let mut public_custom_data = None;

        loop {
            let field_id = cursor.read_u8().map_err(truncated)?;
            let size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            let remaining = data.len() - cursor.position() as usize;
            if size > remaining {
                return Err(truncated_header());
            }
            let mut value = vec![0u8; size];
            cursor.read_exact(&mut value).map_err(truncated)?;

            match field_id {
                FIELD_END => break,
                FIELD_COMMENT => {}
                FIELD_CIPHER_ID => {
                    let uuid = Uuid::from_slice(&value)
                        .map_err(|_| DatabaseError::CorruptFormat("bad cipher id".to_string()))?;
                    cipher = Some(EncryptionAlgorithm::from_uuid(&uuid)?);
                }
                FIELD_COMPRESSION => {
                    let id = value
                        .get(..4)
                        .and_then(|b| b.try_into().ok())
                        .map(u32::from_le_bytes)
                        .ok_or_else(|| DatabaseError::CorruptFormat("bad compression flags".to_string()))?;
                    compression = Compression::from_id(id).ok_or_else(|| {
                        DatabaseError::UnsupportedAlgorithm(format!("compression {}", id))
                    })?;
                }
                FIELD_MASTER_SEED => {
                    let seed: [u8; 32] = value
                        .as_slice()
                        .try_into()
                        .map_err(|_| DatabaseError::CorruptFormat("master seed must be 32 bytes".to_string()))?;
                    master_seed = Some(seed);
                }
                FIELD_ENCRYPTION_IV => encryption_iv = Some(value),
                FIELD_KDF_PARAMETERS => kdf = Some(kdf_from_dictionary(&VariantDictionary::read(&value)?)?),
                FIELD_PUBLIC_CUSTOM_DATA => public_custom_data = Some(value),
                other => {
                    return Err(DatabaseError::CorruptFormat(format!("unknown header field {}", other)));
                }
            }
        }

        let missing = |name: &str| DatabaseError::CorruptFormat(format!("header has no {}", name));
        let cipher = cipher.ok_or_else(|| missing("cipher id"))?;
        let encryption_iv = encryption_iv.ok_or_else(|| missing("encryption IV"))?;
        if encryption_iv.len() != cipher.iv_length() {
            return Err(DatabaseError::CorruptFormat(format!(
                "{} needs a {}-byte IV",
                cipher,
                cipher.iv_length()
            )));
        }

        let header = Self {
            version,
            cipher,
            compression,
            master_seed: master_seed.ok_or_else(|| missing("master seed"))?,
            encryption_iv,
            kdf: kdf.ok_or_else(|| missing("KDF parameters"))?,
            public_custom_data,
        };
        Ok((header, cursor.position() as usize))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&PWM_DBSIG_1.to_le_bytes());
        out.extend_from_slice(&DBSIG_2_V4.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());

        write_field(&mut out, FIELD_CIPHER_ID, self.cipher.uuid().as_bytes());
        write_field(&mut out, FIELD_COMPRESSION, &self.compression.id().to_le_bytes());
        write_field(&mut out, FIELD_MASTER_SEED, &self.master_seed);
        write_field(&mut out, FIELD_ENCRYPTION_IV, &self.encryption_iv);
        write_field(&mut out, FIELD_KDF_PARAMETERS, &kdf_to_dictionary(&self.kdf).to_bytes());
        if let Some(data) = &self.public_custom_data {
            write_field(&mut out, FIELD_PUBLIC_CUSTOM_DATA, data);
        }
        write_field(&mut out, FIELD_END, END_MARKER);
        out
    }
}

fn write_field(out: &mut Vec<u8>, id: u8, data: &[u8]) {
    out.push(id);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn truncated(_: std::io::Error) -> DatabaseError {
    truncated_header()
}

fn truncated_header() -> DatabaseError {
    DatabaseError::CorruptFormat("KDBX header is truncated".to_string())
}

/// Decode KDF parameters from their variant dictionary
pub fn kdf_from_dictionary(dict: &VariantDictionary) -> Result<KdfParameters> {
    let uuid = dict
        .get_bytes(KDF_UUID_KEY)
        .and_then(|b| Uuid::from_slice(b).ok())
        .ok_or_else(|| DatabaseError::CorruptFormat("KDF parameters have no $UUID".to_string()))?;
    let kind = KdfKind::from_uuid(&uuid)
        .ok_or_else(|| DatabaseError::UnsupportedAlgorithm(format!("KDF {}", uuid)))?;
    let missing = |key: &str| DatabaseError::CorruptFormat(format!("KDF parameter '{}' is missing", key));

    match kind {
        KdfKind::AesKdf => {
            let rounds = dict.get_u64(KDF_AES_ROUNDS).ok_or_else(|| missing(KDF_AES_ROUNDS))?;
            let seed: [u8; 32] = dict
                .get_bytes(KDF_AES_SEED)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| missing(KDF_AES_SEED))?;
            Ok(KdfParameters::Aes { rounds, seed })
        }
        KdfKind::Argon2d | KdfKind::Argon2id => Ok(KdfParameters::Argon2 {
            kind,
            salt: dict
                .get_bytes(KDF_ARGON2_SALT)
                .ok_or_else(|| missing(KDF_ARGON2_SALT))?
                .to_vec(),
            iterations: dict
                .get_u64(KDF_ARGON2_ITERATIONS)
                .ok_or_else(|| missing(KDF_ARGON2_ITERATIONS))?,
            memory: dict.get_u64(KDF_ARGON2_MEMORY).ok_or_else(|| missing(KDF_ARGON2_MEMORY))?,
            parallelism: dict
                .get_u32(KDF_ARGON2_PARALLELISM)
                .ok_or_else(|| missing(KDF_ARGON2_PARALLELISM))?,
            version: dict.get_u32(KDF_ARGON2_VERSION).unwrap_or(ARGON2_VERSION_13),
        }),
    }
}

/// Encode KDF parameters as a variant dictionary
pub fn kdf_to_dictionary(kdf: &KdfParameters) -> VariantDictionary {
    let mut dict = VariantDictionary::new();
    dict.set(KDF_UUID_KEY, VariantValue::Bytes(kdf.kind().uuid().as_bytes().to_vec()));
    match kdf {
        KdfParameters::Aes { rounds, seed } => {
            dict.set(KDF_AES_ROUNDS, VariantValue::UInt64(*rounds));
            dict.set(KDF_AES_SEED, VariantValue::Bytes(seed.to_vec()));
        }
        KdfParameters::Argon2 {
            salt,
            iterations,
            memory,
            parallelism,
            version,
            ..
        } => {
            dict.set(KDF_ARGON2_SALT, VariantValue::Bytes(salt.clone()));
            dict.set(KDF_ARGON2_PARALLELISM, VariantValue::UInt32(*parallelism));
            dict.set(KDF_ARGON2_MEMORY, VariantValue::UInt64(*memory));
            dict.set(KDF_ARGON2_ITERATIONS, VariantValue::UInt64(*iterations));
            dict.set(KDF_ARGON2_VERSION, VariantValue::UInt32(*version));
        }
    }
    dict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let kdf = KdfKind::Argon2id.default_parameters();
        let header = HeaderV4::new(EncryptionAlgorithm::ChaCha20, Compression::Gzip, &kdf, Some(vec![9, 9]));
        assert_eq!(header.encryption_iv.len(), 12);

        let mut bytes = header.to_bytes();
        let header_len = bytes.len();
        bytes.extend_from_slice(b"payload");

        let (parsed, consumed) = HeaderV4::read(&bytes).unwrap();
        assert_eq!(consumed, header_len);
        assert_eq!(parsed.cipher, EncryptionAlgorithm::ChaCha20);
        assert_eq!(parsed.compression, Compression::Gzip);
        assert_eq!(parsed.master_seed, header.master_seed);
        assert_eq!(parsed.encryption_iv, header.encryption_iv);
        assert_eq!(parsed.kdf, header.kdf);
        assert_eq!(parsed.public_custom_data, Some(vec![9, 9]));
    }

    #[test]
    fn test_new_header_reseeds_kdf() {
        let kdf = KdfKind::AesKdf.default_parameters();
        let a = HeaderV4::new(EncryptionAlgorithm::Aes256, Compression::None, &kdf, None);
        let b = HeaderV4::new(EncryptionAlgorithm::Aes256, Compression::None, &kdf, None);
        assert_ne!(a.kdf, b.kdf);
        assert_eq!(a.kdf.rounds(), kdf.rounds());
        assert_ne!(a.master_seed, b.master_seed);
    }

    #[test]
    fn test_version_checks() {
        let kdf = KdfKind::AesKdf.default_parameters();
        let mut bytes = HeaderV4::new(EncryptionAlgorithm::Aes256, Compression::None, &kdf, None).to_bytes();

        // Minor version bumps are accepted
        bytes[8..12].copy_from_slice(&0x0004_0001u32.to_le_bytes());
        assert!(HeaderV4::read(&bytes).is_ok());

        bytes[8..12].copy_from_slice(&0x0003_0001u32.to_le_bytes());
        assert!(matches!(HeaderV4::read(&bytes), Err(DatabaseError::UnsupportedVersion(0x0003_0001))));
    }

    #[test]
    fn test_truncated_header() {
        let kdf = KdfKind::AesKdf.default_parameters();
        let bytes = HeaderV4::new(EncryptionAlgorithm::Aes256, Compression::None, &kdf, None).to_bytes();
        assert!(matches!(HeaderV4::read(&bytes[..40]), Err(DatabaseError::CorruptFormat(_))));
    }

    #[test]
    fn test_kdf_dictionary() {
        let kdf = KdfKind::Argon2d.default_parameters();
        let dict = kdf_to_dictionary(&kdf);
        assert_eq!(dict.get_bytes("$UUID"), Some(KdfKind::Argon2d.uuid().as_bytes().as_slice()));
        assert_eq!(kdf_from_dictionary(&dict).unwrap(), kdf);

        let mut unknown = VariantDictionary::new();
        unknown.set("$UUID", VariantValue::Bytes(vec![0u8; 16]));
        assert!(matches!(kdf_from_dictionary(&unknown), Err(DatabaseError::UnsupportedAlgorithm(_))));
    }
}

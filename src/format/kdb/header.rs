//! Fixed 124-byte KDB header

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{DatabaseError, Result};
use crate::utils::random_array;
use crate::{DBSIG_2_V3, PWM_DBSIG_1};

/// Serialized header size
pub const HEADER_SIZE: usize = 124;

/// Format version written by KeePass 1.x
pub const DBVER_DW: u32 = 0x0003_0004;
const DBVER_MASK: u32 = 0xFFFF_FF00;

pub const FLAG_SHA2: u32 = 1;
pub const FLAG_RIJNDAEL: u32 = 2;
pub const FLAG_ARCFOUR: u32 = 4;
pub const FLAG_TWOFISH: u32 = 8;

/// KDB file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderV3 {
    pub signature1: u32,
    pub signature2: u32,
    pub flags: u32,
    pub version: u32,
    /// Hashed with the transformed key to form the final key
    pub master_seed: [u8; 16],
    /// CBC initialisation vector for the body
    pub encryption_iv: [u8; 16],
    pub num_groups: u32,
    pub num_entries: u32,
    /// SHA-256 of the decrypted body
    pub contents_hash: [u8; 32],
    /// AES-KDF seed
    pub transform_seed: [u8; 32],
    /// AES-KDF rounds
    pub rounds: u32,
}

impl HeaderV3 {
    /// Header for a new save, with fresh random seeds and IV
    pub fn new(rounds: u32) -> Self {
        Self {
            signature1: PWM_DBSIG_1,
            signature2: DBSIG_2_V3,
            flags: FLAG_SHA2 | FLAG_RIJNDAEL,
            version: DBVER_DW,
            master_seed: random_array(),
            encryption_iv: random_array(),
            num_groups: 0,
            num_entries: 0,
            contents_hash: [0u8; 32],
            transform_seed: random_array(),
            rounds,
        }
    }

    /// Parse and validate a header
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DatabaseError::CorruptFormat("KDB header is truncated".to_string()));
        }
        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let signature1 = cursor.read_u32::<LittleEndian>()?;
        let signature2 = cursor.read_u32::<LittleEndian>()?;
        if signature1 != PWM_DBSIG_1 || signature2 != DBSIG_2_V3 {
            return Err(DatabaseError::InvalidSignature);
        }
        let flags = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u32::<LittleEndian>()?;
        if version & DBVER_MASK != DBVER_DW & DBVER_MASK {
            return Err(DatabaseError::UnsupportedVersion(version));
        }

        let mut header = Self {
            signature1,
            signature2,
            flags,
            version,
            master_seed: [0u8; 16],
            encryption_iv: [0u8; 16],
            num_groups: 0,
            num_entries: 0,
            contents_hash: [0u8; 32],
            transform_seed: [0u8; 32],
            rounds: 0,
        };
        cursor.read_exact(&mut header.master_seed)?;
        cursor.read_exact(&mut header.encryption_iv)?;
        header.num_groups = cursor.read_u32::<LittleEndian>()?;
        header.num_entries = cursor.read_u32::<LittleEndian>()?;
        cursor.read_exact(&mut header.contents_hash)?;
        cursor.read_exact(&mut header.transform_seed)?;
        header.rounds = cursor.read_u32::<LittleEndian>()?;

        if header.flags & FLAG_RIJNDAEL == 0 {
            let name = if header.flags & FLAG_TWOFISH != 0 {
                "Twofish"
            } else if header.flags & FLAG_ARCFOUR != 0 {
                "ArcFour"
            } else {
                "unknown cipher"
            };
            return Err(DatabaseError::UnsupportedAlgorithm(name.to_string()));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&self.signature1.to_le_bytes());
        out.extend_from_slice(&self.signature2.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.master_seed);
        out.extend_from_slice(&self.encryption_iv);
        out.extend_from_slice(&self.num_groups.to_le_bytes());
        out.extend_from_slice(&self.num_entries.to_le_bytes());
        out.extend_from_slice(&self.contents_hash);
        out.extend_from_slice(&self.transform_seed);
        out.extend_from_slice(&self.rounds.to_le_bytes());
        out
    }
}

//! Key derivation functions
//!
//! KDB always uses AES-KDF. KDBX 4 names its KDF by UUID in the header's
//! variant dictionary: AES-KDF, Argon2d or Argon2id.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::aes::transform_key;
use super::aes::KEY_LENGTH;
use crate::error::{DatabaseError, Result};
use crate::utils::{random_array, random_bytes};

/// AES-KDF identifier
pub const AES_KDF_UUID: Uuid = Uuid::from_u128(0xC9D9F39A_628A_4460_BF74_0D08C18A4FEA);

/// Argon2d identifier
pub const ARGON2D_UUID: Uuid = Uuid::from_u128(0xEF636DDF_8C29_444B_91F7_A9A403E30A0C);

/// Argon2id identifier
pub const ARGON2ID_UUID: Uuid = Uuid::from_u128(0x9E298B19_56DB_4773_B23D_FC3EC6F0A1E6);

/// Variant dictionary key naming the KDF
pub const KDF_UUID_KEY: &str = "$UUID";

/// Argon2 version 1.3
pub const ARGON2_VERSION_13: u32 = 0x13;

/// Default AES-KDF rounds for new KDBX databases
pub const DEFAULT_AES_KDF_ROUNDS: u64 = 60_000;

/// Default Argon2 iterations
pub const DEFAULT_ARGON2_ITERATIONS: u64 = 2;

/// Default Argon2 memory in bytes (1 MiB)
pub const DEFAULT_ARGON2_MEMORY: u64 = 1024 * 1024;

/// Default Argon2 parallelism
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 2;

const SALT_LENGTH: usize = 32;

/// The key derivation functions an engine can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KdfKind {
    AesKdf,
    Argon2d,
    Argon2id,
}

impl KdfKind {
    /// Header identifier
    pub fn uuid(&self) -> Uuid {
        match self {
            KdfKind::AesKdf => AES_KDF_UUID,
            KdfKind::Argon2d => ARGON2D_UUID,
            KdfKind::Argon2id => ARGON2ID_UUID,
        }
    }

    /// Look up a KDF by header identifier
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        match *uuid {
            AES_KDF_UUID => Some(KdfKind::AesKdf),
            ARGON2D_UUID => Some(KdfKind::Argon2d),
            ARGON2ID_UUID => Some(KdfKind::Argon2id),
            _ => None,
        }
    }

    /// Fresh parameters with default costs and a random seed
    pub fn default_parameters(&self) -> KdfParameters {
        match self {
            KdfKind::AesKdf => KdfParameters::Aes {
                rounds: DEFAULT_AES_KDF_ROUNDS,
                seed: random_array(),
            },
            KdfKind::Argon2d | KdfKind::Argon2id => KdfParameters::Argon2 {
                kind: *self,
                salt: random_bytes(SALT_LENGTH),
                iterations: DEFAULT_ARGON2_ITERATIONS,
                memory: DEFAULT_ARGON2_MEMORY,
                parallelism: DEFAULT_ARGON2_PARALLELISM,
                version: ARGON2_VERSION_13,
            },
        }
    }
}

impl fmt::Display for KdfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KdfKind::AesKdf => "AES-KDF",
            KdfKind::Argon2d => "Argon2d",
            KdfKind::Argon2id => "Argon2id",
        };
        f.write_str(name)
    }
}

/// Configured KDF with its cost parameters and seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfParameters {
    /// AES-ECB transformation
    Aes {
        rounds: u64,
        seed: [u8; KEY_LENGTH],
    },
    /// Argon2d or Argon2id
    Argon2 {
        kind: KdfKind,
        salt: Vec<u8>,
        iterations: u64,
        /// Memory cost in bytes
        memory: u64,
        parallelism: u32,
        version: u32,
    },
}

impl KdfParameters {
    pub fn kind(&self) -> KdfKind {
        match self {
            KdfParameters::Aes { .. } => KdfKind::AesKdf,
            KdfParameters::Argon2 { kind, .. } => *kind,
        }
    }

    /// Rounds for AES-KDF, iterations for Argon2
    pub fn rounds(&self) -> u64 {
        match self {
            KdfParameters::Aes { rounds, .. } => *rounds,
            KdfParameters::Argon2 { iterations, .. } => *iterations,
        }
    }

    pub fn set_rounds(&mut self, value: u64) {
        match self {
            KdfParameters::Aes { rounds, .. } => *rounds = value,
            KdfParameters::Argon2 { iterations, .. } => *iterations = value,
        }
    }

    /// Argon2 memory in bytes
    pub fn memory_usage(&self) -> Option<u64> {
        match self {
            KdfParameters::Aes { .. } => None,
            KdfParameters::Argon2 { memory, .. } => Some(*memory),
        }
    }

    pub fn set_memory_usage(&mut self, value: u64) {
        if let KdfParameters::Argon2 { memory, .. } = self {
            *memory = value;
        }
    }

    /// Argon2 lanes
    pub fn parallelism(&self) -> Option<u32> {
        match self {
            KdfParameters::Aes { .. } => None,
            KdfParameters::Argon2 { parallelism, .. } => Some(*parallelism),
        }
    }

    pub fn set_parallelism(&mut self, value: u32) {
        if let KdfParameters::Argon2 { parallelism, .. } = self {
            *parallelism = value;
        }
    }

    /// Replace the seed or salt with fresh random bytes
    pub fn reseed(&mut self) {
        match self {
            KdfParameters::Aes { seed, .. } => *seed = random_array(),
            KdfParameters::Argon2 { salt, .. } => *salt = random_bytes(SALT_LENGTH),
        }
    }

    /// Run the KDF over a composite key
    pub fn transform(&self, key: &[u8; KEY_LENGTH]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
        match self {
            KdfParameters::Aes { rounds, seed } => Ok(transform_key(key, seed, *rounds)),
            KdfParameters::Argon2 {
                kind,
                salt,
                iterations,
                memory,
                parallelism,
                version,
            } => {
                let algorithm = match kind {
                    KdfKind::Argon2id => Algorithm::Argon2id,
                    _ => Algorithm::Argon2d,
                };
                let version = match version {
                    0x10 => Version::V0x10,
                    0x13 => Version::V0x13,
                    other => {
                        return Err(DatabaseError::UnsupportedAlgorithm(format!(
                            "Argon2 version {:#x}",
                            other
                        )));
                    }
                };
                let iterations = u32::try_from(*iterations).map_err(|_| DatabaseError::NumberFormat(*iterations))?;
                let memory_kib =
                    u32::try_from(*memory / 1024).map_err(|_| DatabaseError::NumberFormat(*memory))?;

                let params = Params::new(memory_kib, iterations, *parallelism, Some(KEY_LENGTH))
                    .map_err(|e| DatabaseError::Encryption(e.to_string()))?;
                let argon = Argon2::new(algorithm, version, params);

                let mut out = Zeroizing::new([0u8; KEY_LENGTH]);
                argon
                    .hash_password_into(key, salt, out.as_mut_slice())
                    .map_err(|e| DatabaseError::Encryption(e.to_string()))?;
                Ok(out)
            }
        }
    }
}

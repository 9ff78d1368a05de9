//! KDBX variant dictionary (typed key/value map used for KDF parameters)

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{DatabaseError, Result};

const VERSION: u16 = 0x0100;
const VERSION_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTES: u8 = 0x42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
}

/// Ordered typed dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDictionary {
    items: Vec<(String, VariantValue)>,
}

impl VariantDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&VariantValue> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the original position
    pub fn set(&mut self, key: &str, value: VariantValue) {
        match self.items.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.items.push((key.to_string(), value)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            VariantValue::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            VariantValue::UInt64(v) => Some(*v),
            VariantValue::UInt32(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key)? {
            VariantValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let version = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
        if version & VERSION_CRITICAL_MASK > VERSION & VERSION_CRITICAL_MASK {
            return Err(DatabaseError::CorruptFormat(format!(
                "unsupported variant dictionary version {:#06x}",
                version
            )));
        }

        let mut dict = Self::new();
        loop {
            let value_type = cursor.read_u8().map_err(corrupt)?;
            if value_type == TYPE_END {
                break;
            }
            let key = read_sized(&mut cursor)?;
            let key = String::from_utf8(key)
                .map_err(|_| DatabaseError::CorruptFormat("variant key is not UTF-8".to_string()))?;
            let raw = read_sized(&mut cursor)?;

            let value = match value_type {
                TYPE_UINT32 => VariantValue::UInt32(fixed::<4>(&raw).map(u32::from_le_bytes)?),
                TYPE_UINT64 => VariantValue::UInt64(fixed::<8>(&raw).map(u64::from_le_bytes)?),
                TYPE_BOOL => VariantValue::Bool(fixed::<1>(&raw)?[0] != 0),
                TYPE_INT32 => VariantValue::Int32(fixed::<4>(&raw).map(i32::from_le_bytes)?),
                TYPE_INT64 => VariantValue::Int64(fixed::<8>(&raw).map(i64::from_le_bytes)?),
                TYPE_STRING => VariantValue::String(String::from_utf8_lossy(&raw).into_owned()),
                TYPE_BYTES => VariantValue::Bytes(raw),
                other => {
                    return Err(DatabaseError::CorruptFormat(format!(
                        "unknown variant type {:#04x} for '{}'",
                        other, key
                    )));
                }
            };
            dict.items.push((key, value));
        }
        Ok(dict)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = VERSION.to_le_bytes().to_vec();
        for (key, value) in &self.items {
            let (value_type, raw) = match value {
                VariantValue::UInt32(v) => (TYPE_UINT32, v.to_le_bytes().to_vec()),
                VariantValue::UInt64(v) => (TYPE_UINT64, v.to_le_bytes().to_vec()),
                VariantValue::Bool(v) => (TYPE_BOOL, vec![u8::from(*v)]),
                VariantValue::Int32(v) => (TYPE_INT32, v.to_le_bytes().to_vec()),
                VariantValue::Int64(v) => (TYPE_INT64, v.to_le_bytes().to_vec()),
                VariantValue::String(v) => (TYPE_STRING, v.as_bytes().to_vec()),
                VariantValue::Bytes(v) => (TYPE_BYTES, v.clone()),
            };
            out.push(value_type);
            out.extend_from_slice(&(key.len() as i32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(raw.len() as i32).to_le_bytes());
            out.extend_from_slice(&raw);
        }
        out.push(TYPE_END);
        out
    }
}

fn corrupt(_: std::io::Error) -> DatabaseError {
    DatabaseError::CorruptFormat("variant dictionary is truncated".to_string())
}

fn read_sized(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cursor.read_i32::<LittleEndian>().map_err(corrupt)?;
    let len = usize::try_from(len)
        .map_err(|_| DatabaseError::CorruptFormat("negative variant length".to_string()))?;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(DatabaseError::CorruptFormat("variant dictionary is truncated".to_string()));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(corrupt)?;
    Ok(buf)
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N]> {
    raw.try_into()
        .map_err(|_| DatabaseError::CorruptFormat(format!("variant value must be {} bytes", N)))
}

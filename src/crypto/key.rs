//! Composite master key
//!
//! The master key combines a password hash and a key-file key:
//! 1. Password encoded (ISO-8859-1 for KDB, UTF-8 for KDBX) and hashed with SHA-256
//! 2. Key file reduced to 32 bytes (see [`super::keyfile`])
//! 3. Legacy: SHA-256 of both when both are present, else the single component
//! 4. Modern: SHA-256 of the concatenation of whatever is present

use zeroize::Zeroizing;

use super::aes::KEY_LENGTH;
use super::hash::sha256;
use super::keyfile::file_key;
use crate::error::{DatabaseError, Result};

/// Text encoding applied to the password before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordEncoding {
    /// ISO-8859-1; characters outside Latin-1 become `?`
    Latin1,
    /// UTF-8
    Utf8,
}

impl PasswordEncoding {
    /// Encode a password into bytes
    pub fn encode(&self, password: &str) -> Zeroizing<Vec<u8>> {
        match self {
            PasswordEncoding::Latin1 => Zeroizing::new(
                password
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
            PasswordEncoding::Utf8 => Zeroizing::new(password.as_bytes().to_vec()),
        }
    }

    /// Check whether the password survives an encode/decode round trip
    pub fn round_trips(&self, password: &str) -> bool {
        match self {
            PasswordEncoding::Latin1 => password.chars().all(|c| u32::from(c) <= 0xFF),
            PasswordEncoding::Utf8 => true,
        }
    }
}

/// How the composite key is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// KeePass 1.x (KDB)
    Legacy,
    /// KeePass 2.x (KDBX)
    Modern,
}

impl KeyFormat {
    /// Password encoding used by this format
    pub fn encoding(&self) -> PasswordEncoding {
        match self {
            KeyFormat::Legacy => PasswordEncoding::Latin1,
            KeyFormat::Modern => PasswordEncoding::Utf8,
        }
    }

    /// Whether XML key files are recognized
    pub fn accepts_xml_key_file(&self) -> bool {
        matches!(self, KeyFormat::Modern)
    }
}

/// Hash a password with the given encoding
pub fn password_key(password: &str, encoding: PasswordEncoding) -> Zeroizing<[u8; KEY_LENGTH]> {
    let encoded = encoding.encode(password);
    Zeroizing::new(sha256(&[encoded.as_slice()]))
}

/// Build the composite master key from a password and/or key file contents
///
/// An empty password alongside a key file is part of the key; on its own it
/// counts as absent. With neither component the result is `MissingCredentials`.
pub fn master_key(
    password: Option<&str>,
    key_file: Option<&[u8]>,
    format: KeyFormat,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let password = password.filter(|p| key_file.is_some() || !p.is_empty());

    let pw_key = password.map(|p| password_key(p, format.encoding()));
    let file = match key_file {
        Some(data) => Some(file_key(data, format.accepts_xml_key_file())?),
        None => None,
    };

    match (format, pw_key, file) {
        (_, None, None) => Err(DatabaseError::MissingCredentials),
        (_, Some(pw), Some(file)) => Ok(Zeroizing::new(sha256(&[pw.as_slice(), file.as_slice()]))),
        (KeyFormat::Legacy, Some(pw), None) => Ok(pw),
        (KeyFormat::Legacy, None, Some(file)) => Ok(file),
        (KeyFormat::Modern, Some(single), None) | (KeyFormat::Modern, None, Some(single)) => {
            Ok(Zeroizing::new(sha256(&[single.as_slice()])))
        }
    }
}

/// Check that a password is representable in the format's encoding
///
/// A password that fails this check still opens the database it was set on,
/// but other KeePass clients may derive a different key from it.
pub fn validate_password_encoding(password: Option<&str>, has_key_file: bool, format: KeyFormat) -> bool {
    match password {
        None => has_key_file,
        Some(p) => format.encoding().round_trips(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_encoding() {
        let enc = PasswordEncoding::Latin1;
        assert_eq!(enc.encode("abc").as_slice(), b"abc");
        assert_eq!(enc.encode("é").as_slice(), &[0xE9]);
        assert_eq!(enc.encode("Й").as_slice(), b"?");
        assert!(enc.round_trips("Grüße"));
        assert!(!enc.round_trips("Пароль"));
    }

    #[test]
    fn test_utf8_encoding() {
        let enc = PasswordEncoding::Utf8;
        assert_eq!(enc.encode("é").as_slice(), "é".as_bytes());
        assert!(enc.round_trips("Пароль"));
    }

    #[test]
    fn test_legacy_password_only() {
        let key = master_key(Some("abc123"), None, KeyFormat::Legacy).unwrap();
        assert_eq!(*key, sha256(&[b"abc123"]));
    }

    #[test]
    fn test_modern_password_only_is_hashed_twice() {
        let key = master_key(Some("abc123"), None, KeyFormat::Modern).unwrap();
        let inner = sha256(&[b"abc123"]);
        assert_eq!(*key, sha256(&[&inner]));
    }

    #[test]
    fn test_legacy_key_file_only() {
        let raw = [9u8; 32];
        let key = master_key(None, Some(&raw), KeyFormat::Legacy).unwrap();
        assert_eq!(*key, raw);
    }

    #[test]
    fn test_both_components() {
        let raw = [9u8; 32];
        let expected = sha256(&[&sha256(&[b"pw"]), &raw]);
        assert_eq!(*master_key(Some("pw"), Some(&raw), KeyFormat::Legacy).unwrap(), expected);
        assert_eq!(*master_key(Some("pw"), Some(&raw), KeyFormat::Modern).unwrap(), expected);
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            master_key(None, None, KeyFormat::Legacy),
            Err(DatabaseError::MissingCredentials)
        ));
        assert!(matches!(
            master_key(Some(""), None, KeyFormat::Modern),
            Err(DatabaseError::MissingCredentials)
        ));
    }

    #[test]
    fn test_empty_password_with_key_file() {
        let raw = [9u8; 32];
        let expected = sha256(&[&sha256(&[b""]), &raw]);
        assert_eq!(*master_key(Some(""), Some(&raw), KeyFormat::Legacy).unwrap(), expected);
        assert_eq!(*master_key(Some(""), Some(&raw), KeyFormat::Modern).unwrap(), expected);
        assert_eq!(*master_key(None, Some(&raw), KeyFormat::Legacy).unwrap(), raw);
    }

    #[test]
    fn test_empty_key_file_rejected() {
        assert!(matches!(
            master_key(Some("pw"), Some(&[]), KeyFormat::Modern),
            Err(DatabaseError::KeyFileEmpty)
        ));
    }

    #[test]
    fn test_deterministic() {
        let a = master_key(Some("same"), None, KeyFormat::Modern).unwrap();
        let b = master_key(Some("same"), None, KeyFormat::Modern).unwrap();
        let c = master_key(Some("other"), None, KeyFormat::Modern).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_validate_password_encoding() {
        assert!(validate_password_encoding(Some("plain"), false, KeyFormat::Legacy));
        assert!(!validate_password_encoding(Some("Пароль"), false, KeyFormat::Legacy));
        assert!(validate_password_encoding(Some("Пароль"), false, KeyFormat::Modern));
        assert!(validate_password_encoding(Some(""), false, KeyFormat::Modern));
        assert!(validate_password_encoding(None, true, KeyFormat::Modern));
        assert!(!validate_password_encoding(None, false, KeyFormat::Legacy));
    }
}

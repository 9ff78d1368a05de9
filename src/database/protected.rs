//! In-memory protected values
//!
//! A protected value is stored XORed with a random pad of the same length,
//! so the plain secret never sits in memory longer than a caller holds the
//! result of [`ProtectedValue::bytes`].

use std::fmt;

use zeroize::Zeroizing;

use crate::utils::random_bytes;

/// A field value that may be held obfuscated in memory
#[derive(Clone, Default)]
pub struct ProtectedValue {
    protected: bool,
    data: Zeroizing<Vec<u8>>,
    pad: Zeroizing<Vec<u8>>,
}

impl ProtectedValue {
    /// Wrap raw bytes
    pub fn new(protected: bool, bytes: &[u8]) -> Self {
        if protected {
            let pad = Zeroizing::new(random_bytes(bytes.len()));
            let data = Zeroizing::new(bytes.iter().zip(pad.iter()).map(|(b, p)| b ^ p).collect());
            Self { protected, data, pad }
        } else {
            Self {
                protected,
                data: Zeroizing::new(bytes.to_vec()),
                pad: Zeroizing::new(Vec::new()),
            }
        }
    }

    /// Wrap UTF-8 text
    pub fn from_text(protected: bool, text: &str) -> Self {
        Self::new(protected, text.as_bytes())
    }

    /// Empty, unprotected value
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Change the protection flag, re-obfuscating as needed
    pub fn set_protected(&mut self, protected: bool) {
        if self.protected != protected {
            *self = Self::new(protected, &self.bytes());
        }
    }

    /// Byte length of the resolved value
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resolve to raw bytes
    pub fn bytes(&self) -> Zeroizing<Vec<u8>> {
        if self.protected {
            Zeroizing::new(self.data.iter().zip(self.pad.iter()).map(|(d, p)| d ^ p).collect())
        } else {
            self.data.clone()
        }
    }

    /// Resolve to text, replacing invalid UTF-8 sequences
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Wipe the value; safe to call repeatedly
    pub fn clear(&mut self) {
        self.data = Zeroizing::new(Vec::new());
        self.pad = Zeroizing::new(Vec::new());
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && *self.bytes() == *other.bytes()
    }
}

impl Eq for ProtectedValue {}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protected {
            write!(f, "ProtectedValue(<{} protected bytes>)", self.len())
        } else {
            write!(f, "ProtectedValue({:?})", self.to_text())
        }
    }
}

impl From<&str> for ProtectedValue {
    fn from(text: &str) -> Self {
        Self::from_text(false, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_roundtrip() {
        let value = ProtectedValue::from_text(true, "s3cr3t");
        assert!(value.is_protected());
        assert_eq!(value.len(), 6);
        assert_eq!(value.to_text(), "s3cr3t");
        assert_eq!(value.bytes().as_slice(), b"s3cr3t");
    }

    #[test]
    fn test_equality_ignores_storage() {
        let a = ProtectedValue::from_text(true, "same");
        let b = ProtectedValue::from_text(false, "same");
        let c = ProtectedValue::from_text(true, "different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_set_protected() {
        let mut value = ProtectedValue::from("hello");
        value.set_protected(true);
        assert!(value.is_protected());
        assert_eq!(value.to_text(), "hello");
        value.set_protected(false);
        assert_eq!(value.to_text(), "hello");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut value = ProtectedValue::from_text(true, "gone");
        value.clear();
        assert!(value.is_empty());
        value.clear();
        assert!(value.is_empty());
    }

    #[test]
    fn test_debug_hides_protected() {
        let value = ProtectedValue::from_text(true, "hunter2");
        let debug = format!("{:?}", value);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("7 protected bytes"));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let value = ProtectedValue::new(false, &[0x66, 0xFF, 0x6F]);
        assert_eq!(value.to_text(), "f\u{FFFD}o");
    }
}

//! KDBX XML document
//!
//! Protected values are encrypted with the inner stream cipher in document
//! order, so both directions run the stream exactly once per protected
//! `Value`, in the order the values appear in the file.

mod reader;
mod writer;

pub use reader::read_document;
pub use writer::{binary_refs, write_document};

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};

pub(crate) const TAG_FILE: &str = "KeePassFile";
pub(crate) const TAG_META: &str = "Meta";
pub(crate) const TAG_ROOT: &str = "Root";
pub(crate) const TAG_GROUP: &str = "Group";
pub(crate) const TAG_ENTRY: &str = "Entry";
pub(crate) const TAG_TIMES: &str = "Times";
pub(crate) const TAG_STRING: &str = "String";
pub(crate) const TAG_BINARY: &str = "Binary";
pub(crate) const TAG_KEY: &str = "Key";
pub(crate) const TAG_VALUE: &str = "Value";
pub(crate) const TAG_HISTORY: &str = "History";
pub(crate) const TAG_AUTO_TYPE: &str = "AutoType";
pub(crate) const TAG_DELETED_OBJECTS: &str = "DeletedObjects";
pub(crate) const TAG_DELETED_OBJECT: &str = "DeletedObject";
pub(crate) const ATTR_PROTECTED: &str = "Protected";
pub(crate) const ATTR_REF: &str = "Ref";

pub(crate) const VALUE_TRUE: &str = "True";
pub(crate) const VALUE_FALSE: &str = "False";
pub(crate) const VALUE_NULL: &str = "null";

pub(crate) fn parse_bool(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(VALUE_TRUE)
}

/// `True`, `False` or `null` (inherit)
pub(crate) fn parse_nullable_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case(VALUE_TRUE) {
        Some(true)
    } else if text.eq_ignore_ascii_case(VALUE_FALSE) {
        Some(false)
    } else {
        None
    }
}

pub(crate) fn format_bool(value: bool) -> &'static str {
    if value { VALUE_TRUE } else { VALUE_FALSE }
}

pub(crate) fn format_nullable_bool(value: Option<bool>) -> &'static str {
    value.map(format_bool).unwrap_or(VALUE_NULL)
}

/// UUIDs are stored as base64 of their 16 bytes
pub(crate) fn parse_uuid(text: &str) -> Result<Uuid> {
    let raw = STANDARD.decode(text.trim())?;
    Uuid::from_slice(&raw).map_err(|_| DatabaseError::CorruptFormat(format!("bad UUID '{}'", text.trim())))
}

/// Optional reference; the all-zero UUID means none
pub(crate) fn parse_optional_uuid(text: &str) -> Result<Option<Uuid>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let uuid = parse_uuid(text)?;
    Ok((!uuid.is_nil()).then_some(uuid))
}

pub(crate) fn format_uuid(uuid: &Uuid) -> String {
    STANDARD.encode(uuid.as_bytes())
}

/// Drop characters XML 1.0 cannot carry
pub(crate) fn xml_safe(text: &str) -> Cow<'_, str> {
    let valid = |c: char| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}');
    if text.chars().all(valid) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| valid(*c)).collect())
    }
}

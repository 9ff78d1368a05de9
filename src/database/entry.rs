//! Entry node

use std::collections::BTreeMap;

use uuid::Uuid;

use super::binary::{BinaryId, BinaryPool};
use super::node::{NodeIcon, NodeId, NodeTimes};
use super::protected::ProtectedValue;

/// Standard field: title
pub const FIELD_TITLE: &str = "Title";
/// Standard field: user name
pub const FIELD_USERNAME: &str = "UserName";
/// Standard field: password
pub const FIELD_PASSWORD: &str = "Password";
/// Standard field: URL
pub const FIELD_URL: &str = "URL";
/// Standard field: notes
pub const FIELD_NOTES: &str = "Notes";

/// Fields every entry carries, in display order
pub const STANDARD_FIELDS: [&str; 5] = [FIELD_TITLE, FIELD_USERNAME, FIELD_PASSWORD, FIELD_URL, FIELD_NOTES];

/// Standard icon for new entries
pub const ICON_KEY: u32 = 0;

// KeePass 1.x stores UI state and custom icons in hidden "meta stream" entries
const META_STREAM_TITLE: &str = "Meta-Info";
const META_STREAM_USERNAME: &str = "SYSTEM";
const META_STREAM_URL: &str = "$";
/// Binary description used by KDB meta-stream entries
pub const META_STREAM_BINARY_DESC: &str = "bin-stream";

/// Window-to-sequence auto-type association (KDBX only)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutoTypeAssociation {
    /// Target window title pattern
    pub window: String,
    /// Keystroke sequence
    pub sequence: String,
}

/// Auto-type settings (KDBX only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    pub associations: Vec<AutoTypeAssociation>,
}

impl Default for AutoType {
    fn default() -> Self {
        Self {
            enabled: true,
            obfuscation: 0,
            default_sequence: String::new(),
            associations: Vec::new(),
        }
    }
}

/// Entry (credential record)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry identifier
    pub id: Uuid,
    /// Icon reference
    pub icon: NodeIcon,
    /// Timestamps
    pub times: NodeTimes,
    /// Owning group
    pub parent: Option<NodeId>,
    /// Field name to value, standard and custom fields alike
    pub fields: BTreeMap<String, ProtectedValue>,
    /// Attachment name to binary pool reference
    pub binaries: BTreeMap<String, BinaryId>,
    /// Tags (KDBX only)
    pub tags: Vec<String>,
    /// URL override (KDBX only)
    pub override_url: String,
    /// Foreground colour as `#RRGGBB`, empty for default (KDBX only)
    pub foreground_color: String,
    /// Background colour as `#RRGGBB`, empty for default (KDBX only)
    pub background_color: String,
    /// Auto-type settings (KDBX only)
    pub auto_type: AutoType,
    /// Prior versions, oldest first; snapshots never carry their own history
    pub history: Vec<Entry>,
}

impl Entry {
    /// Create an entry with empty standard fields
    ///
    /// The password field starts protected.
    pub fn new(id: Uuid) -> Self {
        let fields = STANDARD_FIELDS
            .iter()
            .map(|name| (name.to_string(), ProtectedValue::from_text(*name == FIELD_PASSWORD, "")))
            .collect();

        Self {
            id,
            icon: NodeIcon::standard(ICON_KEY),
            times: NodeTimes::new(),
            parent: None,
            fields,
            binaries: BTreeMap::new(),
            tags: Vec::new(),
            override_url: String::new(),
            foreground_color: String::new(),
            background_color: String::new(),
            auto_type: AutoType::default(),
            history: Vec::new(),
        }
    }

    /// Get a field value
    pub fn field(&self, name: &str) -> Option<&ProtectedValue> {
        self.fields.get(name)
    }

    /// Get a field as text, empty if absent
    pub fn field_text(&self, name: &str) -> String {
        self.fields.get(name).map(|v| v.to_text()).unwrap_or_default()
    }

    /// Set a field value
    pub fn set_field(&mut self, name: &str, value: ProtectedValue) {
        self.fields.insert(name.to_string(), value);
    }

    /// Set a field from text, keeping the field's current protection flag
    pub fn set_text(&mut self, name: &str, text: &str) {
        let protected = self
            .fields
            .get(name)
            .map(|v| v.is_protected())
            .unwrap_or(name == FIELD_PASSWORD);
        self.fields.insert(name.to_string(), ProtectedValue::from_text(protected, text));
    }

    /// Remove a field; standard fields are reset to empty instead
    pub fn remove_field(&mut self, name: &str) -> Option<ProtectedValue> {
        if STANDARD_FIELDS.contains(&name) {
            let old = self.fields.get(name).cloned();
            self.set_text(name, "");
            old
        } else {
            self.fields.remove(name)
        }
    }

    /// Non-standard fields
    pub fn custom_fields(&self) -> impl Iterator<Item = (&String, &ProtectedValue)> {
        self.fields.iter().filter(|(k, _)| !STANDARD_FIELDS.contains(&k.as_str()))
    }

    pub fn title(&self) -> String {
        self.field_text(FIELD_TITLE)
    }

    pub fn username(&self) -> String {
        self.field_text(FIELD_USERNAME)
    }

    pub fn password(&self) -> String {
        self.field_text(FIELD_PASSWORD)
    }

    pub fn url(&self) -> String {
        self.field_text(FIELD_URL)
    }

    pub fn notes(&self) -> String {
        self.field_text(FIELD_NOTES)
    }

    pub fn set_title(&mut self, title: &str) {
        self.set_text(FIELD_TITLE, title);
    }

    pub fn set_username(&mut self, username: &str) {
        self.set_text(FIELD_USERNAME, username);
    }

    pub fn set_password(&mut self, password: &str) {
        self.set_text(FIELD_PASSWORD, password);
    }

    pub fn set_url(&mut self, url: &str) {
        self.set_text(FIELD_URL, url);
    }

    pub fn set_notes(&mut self, notes: &str) {
        self.set_text(FIELD_NOTES, notes);
    }

    /// Whether this is a hidden KDB meta-stream entry
    pub fn is_meta_stream(&self) -> bool {
        !self.notes().is_empty()
            && self.binaries.contains_key(META_STREAM_BINARY_DESC)
            && self.title() == META_STREAM_TITLE
            && self.username() == META_STREAM_USERNAME
            && self.url() == META_STREAM_URL
            && self.icon.standard == ICON_KEY
    }

    /// Copy of the entry without its history
    pub fn snapshot(&self) -> Entry {
        Entry {
            history: Vec::new(),
            ..self.clone()
        }
    }

    /// Append a prior version to the history
    pub fn push_history(&mut self, previous: &Entry) {
        self.history.push(previous.snapshot());
    }

    /// Update access (and modification) time
    pub fn touch(&mut self, modified: bool) {
        self.times.touch(modified);
    }

    /// Case-insensitive substring match over the searchable fields
    ///
    /// `query` must already be lowercase.
    pub fn matches(&self, query: &str, include_tags: bool) -> bool {
        if [FIELD_TITLE, FIELD_USERNAME, FIELD_URL, FIELD_NOTES]
            .iter()
            .any(|name| self.field_text(name).to_lowercase().contains(query))
        {
            return true;
        }
        include_tags && self.tags.iter().any(|t| t.to_lowercase().contains(query))
    }

    /// Approximate serialized size, used to bound history
    pub fn approximate_size(&self, pool: &BinaryPool) -> u64 {
        let fields: usize = self.fields.iter().map(|(k, v)| k.len() + v.len()).sum();
        let tags: usize = self.tags.iter().map(|t| t.len()).sum();
        let binaries: u64 = self
            .binaries
            .iter()
            .map(|(name, id)| name.len() as u64 + pool.get(*id).map(|b| b.len()).unwrap_or(0))
            .sum();
        let associations: usize = self
            .auto_type
            .associations
            .iter()
            .map(|a| a.window.len() + a.sequence.len())
            .sum();

        (fields
            + tags
            + self.override_url.len()
            + self.foreground_color.len()
            + self.background_color.len()
            + self.auto_type.default_sequence.len()
            + associations) as u64
            + binaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_title("Bank");
        entry.set_username("alice");
        entry.set_password("hunter2");
        entry.set_url("https://bank.example.com");
        entry.set_notes("PIN is elsewhere");
        entry
    }

    #[test]
    fn test_new_entry_fields() {
        let entry = Entry::new(Uuid::new_v4());
        for name in STANDARD_FIELDS {
            assert!(entry.field(name).is_some());
        }
        assert!(entry.field(FIELD_PASSWORD).unwrap().is_protected());
        assert!(!entry.field(FIELD_TITLE).unwrap().is_protected());
    }

    #[test]
    fn test_set_text_keeps_protection() {
        let mut entry = sample_entry();
        entry.set_field("PIN", ProtectedValue::from_text(true, "1234"));
        entry.set_text("PIN", "4321");
        assert!(entry.field("PIN").unwrap().is_protected());
        assert_eq!(entry.field_text("PIN"), "4321");
    }

    #[test]
    fn test_remove_field() {
        let mut entry = sample_entry();
        entry.set_text("Custom", "x");
        assert!(entry.remove_field("Custom").is_some());
        assert!(entry.field("Custom").is_none());

        entry.remove_field(FIELD_URL);
        assert_eq!(entry.url(), "");
        assert!(entry.field(FIELD_URL).is_some());
    }

    #[test]
    fn test_custom_fields() {
        let mut entry = sample_entry();
        entry.set_text("Account", "42");
        let names: Vec<&String> = entry.custom_fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Account"]);
    }

    #[test]
    fn test_history_snapshot_has_no_history() {
        let mut entry = sample_entry();
        let first = entry.clone();
        entry.push_history(&first);
        let second = entry.clone();
        entry.push_history(&second);

        assert_eq!(entry.history.len(), 2);
        assert!(entry.history.iter().all(|h| h.history.is_empty()));
    }

    #[test]
    fn test_matches() {
        let mut entry = sample_entry();
        assert!(entry.matches("bank", false));
        assert!(entry.matches("alice", false));
        assert!(entry.matches("example.com", false));
        assert!(!entry.matches("hunter2", false)); // passwords are not searched
        entry.tags.push("Finance".to_string());
        assert!(!entry.matches("finance", false));
        assert!(entry.matches("finance", true));
    }

    #[test]
    fn test_meta_stream() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_title("Meta-Info");
        entry.set_username("SYSTEM");
        entry.set_url("$");
        entry.set_notes("KPX_GROUP_TREE_STATE");
        assert!(!entry.is_meta_stream());
        entry.binaries.insert(META_STREAM_BINARY_DESC.to_string(), 0);
        assert!(entry.is_meta_stream());
    }
}

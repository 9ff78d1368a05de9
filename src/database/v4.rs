//! KeePass 2.x (KDBX 4) database engine

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::binary::BinaryPool;
use super::config::{Compression, DatabaseConfig};
use super::deleted::{CustomIcon, DeletedObject};
use super::entry::{Entry, FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME};
use super::group::Group;
use super::index::NodeIndex;
use super::node::{NodeIcon, NodeId, NodeRef};
use super::protected::ProtectedValue;
use super::EngineState;
use crate::crypto::{self, EncryptionAlgorithm, KEY_LENGTH, KdfKind, KdfParameters, KeyFormat};
use crate::error::{DatabaseError, Result};
use crate::utils::now;
use crate::{GENERATOR_NAME, RECYCLE_BIN_ICON, RECYCLE_BIN_NAME};

/// Which standard fields are stored protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub title: bool,
    pub username: bool,
    pub password: bool,
    pub url: bool,
    pub notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            title: false,
            username: false,
            password: true,
            url: false,
            notes: false,
        }
    }
}

impl MemoryProtection {
    /// Protection flag for a standard field; custom fields default to unprotected
    pub fn is_protected(&self, field: &str) -> bool {
        match field {
            FIELD_TITLE => self.title,
            FIELD_USERNAME => self.username,
            FIELD_PASSWORD => self.password,
            FIELD_URL => self.url,
            FIELD_NOTES => self.notes,
            _ => false,
        }
    }
}

/// Database-wide metadata (the XML `Meta` block)
#[derive(Debug, Clone)]
pub struct MetaV4 {
    pub generator: String,
    pub name: String,
    pub name_changed: DateTime<Utc>,
    pub description: String,
    pub description_changed: DateTime<Utc>,
    pub default_username: String,
    pub default_username_changed: DateTime<Utc>,
    pub maintenance_history_days: u32,
    pub color: String,
    pub master_key_changed: DateTime<Utc>,
    pub master_key_change_rec: i64,
    pub master_key_change_force: i64,
    pub memory_protection: MemoryProtection,
    pub custom_icons: Vec<CustomIcon>,
    pub recycle_bin_enabled: bool,
    pub recycle_bin_uuid: Option<Uuid>,
    pub recycle_bin_changed: DateTime<Utc>,
    pub entry_templates_group: Option<Uuid>,
    pub entry_templates_group_changed: DateTime<Utc>,
    /// Maximum history items per entry, -1 for unlimited
    pub history_max_items: i32,
    /// Maximum history bytes per entry, -1 for unlimited
    pub history_max_size: i64,
    pub last_selected_group: Option<Uuid>,
    pub last_top_visible_group: Option<Uuid>,
    pub settings_changed: DateTime<Utc>,
    /// Plugin key/value data, kept for round trips
    pub custom_data: Vec<(String, String)>,
}

impl MetaV4 {
    pub fn new(name: &str, config: &DatabaseConfig) -> Self {
        let t = now();
        Self {
            generator: GENERATOR_NAME.to_string(),
            name: name.to_string(),
            name_changed: t,
            description: String::new(),
            description_changed: t,
            default_username: String::new(),
            default_username_changed: t,
            maintenance_history_days: 365,
            color: String::new(),
            master_key_changed: t,
            master_key_change_rec: -1,
            master_key_change_force: -1,
            memory_protection: MemoryProtection::default(),
            custom_icons: Vec::new(),
            recycle_bin_enabled: true,
            recycle_bin_uuid: None,
            recycle_bin_changed: t,
            entry_templates_group: None,
            entry_templates_group_changed: t,
            history_max_items: config.history_max_items,
            history_max_size: config.history_max_size,
            last_selected_group: None,
            last_top_visible_group: None,
            settings_changed: t,
            custom_data: Vec::new(),
        }
    }
}

/// In-memory KDBX 4 database
pub struct DatabaseV4 {
    pub(crate) index: NodeIndex,
    pub(crate) binaries: BinaryPool,
    pub(crate) master_key: Option<Zeroizing<[u8; KEY_LENGTH]>>,
    pub(crate) cipher: EncryptionAlgorithm,
    pub(crate) kdf: KdfParameters,
    pub(crate) compression: Compression,
    pub(crate) meta: MetaV4,
    pub(crate) deleted_objects: Vec<DeletedObject>,
    /// Raw public custom data dictionary from the outer header
    pub(crate) public_custom_data: Option<Vec<u8>>,
    pub(crate) state: EngineState,
    pub(crate) password_encoding_error: bool,
}

impl DatabaseV4 {
    /// Create an empty database whose root group carries `name`
    pub fn new(name: &str, config: &DatabaseConfig) -> Self {
        let root = Group::new(NodeId::Uuid(crate::utils::generate_uuid()), name);
        Self {
            index: NodeIndex::new(root, config.change_duplicate_id),
            binaries: BinaryPool::new(config.scratch_dir.clone(), config.memory_threshold),
            master_key: None,
            cipher: config.v4_cipher,
            kdf: config.v4_kdf.default_parameters(),
            compression: config.compression,
            meta: MetaV4::new(name, config),
            deleted_objects: Vec::new(),
            public_custom_data: None,
            state: EngineState::Empty,
            password_encoding_error: false,
        }
    }

    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut NodeIndex {
        &mut self.index
    }

    pub fn binaries(&self) -> &BinaryPool {
        &self.binaries
    }

    pub fn binaries_mut(&mut self) -> &mut BinaryPool {
        &mut self.binaries
    }

    pub fn meta(&self) -> &MetaV4 {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MetaV4 {
        &mut self.meta
    }

    pub fn deleted_objects(&self) -> &[DeletedObject] {
        &self.deleted_objects
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Derive and keep the composite key for later saves
    pub fn set_credentials(&mut self, password: Option<&str>, key_file: Option<&[u8]>) -> Result<()> {
        let key = crypto::master_key(password, key_file, KeyFormat::Modern)?;
        self.password_encoding_error =
            !crypto::validate_password_encoding(password, key_file.is_some(), KeyFormat::Modern);
        self.master_key = Some(key);
        self.meta.master_key_changed = now();
        Ok(())
    }

    pub(crate) fn master_key(&self) -> Result<&[u8; KEY_LENGTH]> {
        self.master_key.as_deref().ok_or(DatabaseError::MissingCredentials)
    }

    pub fn is_password_encoding_error(&self) -> bool {
        self.password_encoding_error
    }

    pub fn encryption_algorithm(&self) -> EncryptionAlgorithm {
        self.cipher
    }

    pub fn set_encryption_algorithm(&mut self, cipher: EncryptionAlgorithm) {
        self.cipher = cipher;
    }

    pub fn kdf(&self) -> &KdfParameters {
        &self.kdf
    }

    /// Switch KDF, resetting its parameters to defaults
    pub fn set_kdf(&mut self, kind: KdfKind) {
        if self.kdf.kind() != kind {
            self.kdf = kind.default_parameters();
        }
    }

    pub fn rounds(&self) -> u64 {
        self.kdf.rounds()
    }

    pub fn set_rounds(&mut self, rounds: u64) -> Result<()> {
        if rounds == 0 {
            return Err(DatabaseError::NumberFormat(rounds));
        }
        self.kdf.set_rounds(rounds);
        Ok(())
    }

    pub fn memory_usage(&self) -> Option<u64> {
        self.kdf.memory_usage()
    }

    pub fn set_memory_usage(&mut self, bytes: u64) {
        self.kdf.set_memory_usage(bytes);
    }

    pub fn parallelism(&self) -> Option<u32> {
        self.kdf.parallelism()
    }

    pub fn set_parallelism(&mut self, lanes: u32) {
        self.kdf.set_parallelism(lanes);
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    /// New detached group with an unused id
    pub fn new_group(&self, title: &str) -> Group {
        Group::new(self.index.new_group_uuid(), title)
    }

    /// New detached entry whose standard fields follow the memory protection
    /// settings
    pub fn new_entry(&self) -> Entry {
        let mut entry = Entry::new(self.index.new_entry_id());
        let protection = self.meta.memory_protection;
        for (name, value) in entry.fields.iter_mut() {
            *value = ProtectedValue::new(protection.is_protected(name), &value.bytes());
        }
        entry
    }

    pub fn root_can_contain_entry(&self) -> bool {
        true
    }

    /// Record tombstones for deleted nodes
    pub fn add_deleted_object(&mut self, uuid: Uuid) {
        let object = DeletedObject::new(uuid);
        if !self.deleted_objects.contains(&object) {
            self.deleted_objects.push(object);
        }
    }

    /// Drop the tombstone of a node whose deletion was undone
    pub fn remove_deleted_object(&mut self, uuid: &Uuid) {
        self.deleted_objects.retain(|d| d.uuid != *uuid);
    }

    pub fn is_recycle_bin_enabled(&self) -> bool {
        self.meta.recycle_bin_enabled
    }

    pub fn set_recycle_bin_enabled(&mut self, enabled: bool) {
        self.meta.recycle_bin_enabled = enabled;
        self.meta.recycle_bin_changed = now();
    }

    /// The recycle bin group, if one exists in the tree
    pub fn recycle_bin(&self) -> Option<&Group> {
        self.meta
            .recycle_bin_uuid
            .and_then(|uuid| self.index.group(&NodeId::Uuid(uuid)))
    }

    /// Find or create the recycle bin under the root
    pub fn ensure_recycle_bin(&mut self) -> Result<NodeId> {
        if let Some(bin) = self.recycle_bin() {
            return Ok(bin.id);
        }
        let mut bin = self.new_group(RECYCLE_BIN_NAME);
        bin.icon = NodeIcon::standard(RECYCLE_BIN_ICON);
        bin.enable_searching = Some(false);
        bin.enable_auto_type = Some(false);
        bin.is_expanded = false;

        let root = self.index.root_id();
        let id = self.index.add_group_to(bin, &root)?;
        self.meta.recycle_bin_uuid = id.as_uuid();
        self.meta.recycle_bin_changed = now();
        Ok(id)
    }

    /// Whether a group is the recycle bin or lies inside it
    pub fn is_backup(&self, id: &NodeId) -> bool {
        match self.recycle_bin() {
            Some(bin) => bin.id == *id || self.index.is_contained_in(&NodeRef::Group(*id), &bin.id),
            None => false,
        }
    }

    /// Whether entries of a group show up in searches
    ///
    /// The recycle bin is excluded when `omit_backup` is set. Otherwise the
    /// nearest explicit `enable_searching` setting on the group or an
    /// ancestor decides, defaulting to searchable.
    pub fn is_group_searchable(&self, id: Option<&NodeId>, omit_backup: bool) -> bool {
        let Some(id) = id else {
            return false;
        };
        let Some(group) = self.index.group(id) else {
            return false;
        };
        if omit_backup && self.is_backup(id) {
            return false;
        }
        if let Some(enabled) = group.enable_searching {
            return enabled;
        }
        for ancestor in self.index.ancestors(id) {
            if let Some(enabled) = self.index.group(&ancestor).and_then(|g| g.enable_searching) {
                return enabled;
            }
        }
        true
    }

    /// Whether a node may be moved into the recycle bin
    pub fn can_recycle(&self, node: &NodeRef) -> bool {
        if !self.meta.recycle_bin_enabled {
            return false;
        }
        match self.recycle_bin() {
            None => !matches!(node, NodeRef::Group(id) if self.index.is_root(id)),
            Some(bin) => {
                if let NodeRef::Group(id) = node {
                    if *id == bin.id || self.index.is_root(id) {
                        return false;
                    }
                }
                !self.index.is_contained_in(node, &bin.id)
            }
        }
    }

    /// Move a node into the recycle bin, creating the bin if needed
    pub fn recycle(&mut self, node: &NodeRef) -> Result<()> {
        if !self.can_recycle(node) {
            return Err(DatabaseError::InvalidMove(format!("{} cannot be recycled", node)));
        }
        let bin = self.ensure_recycle_bin()?;
        match node {
            NodeRef::Group(id) => {
                self.index.move_group(id, &bin)?;
                self.index.touch_group(id, false, false);
            }
            NodeRef::Entry(id) => {
                self.index.move_entry(id, &bin)?;
                self.index.touch_entry(id, false, false);
            }
        }
        Ok(())
    }

    /// Move a recycled node back to `original_parent`
    pub fn undo_recycle(&mut self, node: &NodeRef, original_parent: &NodeId) -> Result<()> {
        match node {
            NodeRef::Group(id) => self.index.move_group(id, original_parent),
            NodeRef::Entry(id) => self.index.move_entry(id, original_parent),
        }
    }

    /// Trim an entry's history to the item and size limits, oldest first
    pub fn remove_oldest_history(&mut self, id: &Uuid) -> Result<()> {
        let max_items = self.meta.history_max_items;
        let max_size = self.meta.history_max_size;
        let sizes: Vec<u64> = {
            let entry = self
                .index
                .entry(id)
                .ok_or_else(|| DatabaseError::NodeNotFound(format!("entry {}", NodeId::Uuid(*id))))?;
            entry.history.iter().map(|h| h.approximate_size(&self.binaries)).collect()
        };

        let mut drop = 0usize;
        if max_items >= 0 {
            drop = sizes.len().saturating_sub(max_items as usize);
        }
        if max_size >= 0 {
            let mut total: u64 = sizes[drop..].iter().sum();
            while total > max_size as u64 && drop < sizes.len() {
                total -= sizes[drop];
                drop += 1;
            }
        }

        if drop > 0 {
            if let Some(entry) = self.index.entry_mut(id) {
                entry.history.drain(..drop);
            }
        }
        Ok(())
    }

    /// Wipe secrets, nodes and scratch files; the engine is unusable afterwards
    pub fn clear(&mut self) {
        for entry in self.index.entries_mut() {
            for value in entry.fields.values_mut() {
                value.clear();
            }
            for old in entry.history.iter_mut() {
                for value in old.fields.values_mut() {
                    value.clear();
                }
            }
        }
        let root = Group::new(NodeId::Uuid(crate::utils::generate_uuid()), "");
        self.index = NodeIndex::new(root, self.index.change_duplicate_id());
        self.binaries.clear();
        self.master_key = None;
        self.deleted_objects.clear();
        self.meta.custom_icons.clear();
        self.state = EngineState::Cleared;
    }
}

impl std::fmt::Debug for DatabaseV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseV4")
            .field("name", &self.meta.name)
            .field("groups", &self.index.group_count())
            .field("entries", &self.index.entry_count())
            .field("cipher", &self.cipher)
            .field("kdf", &self.kdf.kind())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Engine with credentials "abc123", one group "Email" and one entry in it
    pub(crate) fn create_test_v4() -> (DatabaseV4, NodeId, Uuid) {
        let mut db = DatabaseV4::new("Test Database", &DatabaseConfig::default());
        db.set_credentials(Some("abc123"), None).unwrap();
        let root = db.index.root_id();

        let group = db.new_group("Email");
        let group = db.index.add_group_to(group, &root).unwrap();
        let mut entry = db.new_entry();
        entry.set_title("Gmail");
        entry.set_username("me@example.com");
        entry.set_password("secret");
        let entry_id = db.index.add_entry_to(entry, &group).unwrap();

        (db, group, entry_id)
    }

    #[test]
    fn test_new_database() {
        let db = DatabaseV4::new("Vault", &DatabaseConfig::default());
        assert_eq!(db.index.root().unwrap().title, "Vault");
        assert_eq!(db.meta.name, "Vault");
        assert!(db.is_recycle_bin_enabled());
        assert!(db.recycle_bin().is_none());
        assert_eq!(db.kdf().kind(), KdfKind::Argon2d);
        assert!(db.root_can_contain_entry());
    }

    #[test]
    fn test_new_entry_protection() {
        let (db, _, _) = create_test_v4();
        let entry = db.new_entry();
        assert!(entry.field(FIELD_PASSWORD).unwrap().is_protected());
        assert!(!entry.field(FIELD_URL).unwrap().is_protected());
    }

    #[test]
    fn test_recycle_and_undo() {
        let (mut db, group, entry_id) = create_test_v4();
        let entry_ref = NodeRef::Entry(entry_id);
        assert!(db.can_recycle(&entry_ref));

        db.recycle(&entry_ref).unwrap();
        let bin = db.recycle_bin().unwrap().id;
        assert_eq!(db.index.entry(&entry_id).unwrap().parent, Some(bin));
        assert_eq!(db.recycle_bin().unwrap().title, RECYCLE_BIN_NAME);
        assert_eq!(db.recycle_bin().unwrap().icon.standard, RECYCLE_BIN_ICON);
        assert!(!db.can_recycle(&entry_ref));
        assert!(!db.can_recycle(&NodeRef::Group(bin)));

        db.undo_recycle(&entry_ref, &group).unwrap();
        assert_eq!(db.index.entry(&entry_id).unwrap().parent, Some(group));
        assert!(db.index.is_consistent());
    }

    #[test]
    fn test_recycle_disabled() {
        let (mut db, _, entry_id) = create_test_v4();
        db.set_recycle_bin_enabled(false);
        assert!(!db.can_recycle(&NodeRef::Entry(entry_id)));
        assert!(matches!(db.recycle(&NodeRef::Entry(entry_id)), Err(DatabaseError::InvalidMove(_))));
    }

    #[test]
    fn test_searchable_rules() {
        let (mut db, group, _) = create_test_v4();
        assert!(db.is_group_searchable(Some(&group), true));

        let bin = db.ensure_recycle_bin().unwrap();
        assert!(!db.is_group_searchable(Some(&bin), true));

        let hidden = db.new_group("Hidden");
        let hidden = db.index.add_group_to(hidden, &group).unwrap();
        db.index.group_mut(&group).unwrap().enable_searching = Some(false);
        assert!(!db.is_group_searchable(Some(&hidden), false));
        db.index.group_mut(&hidden).unwrap().enable_searching = Some(true);
        assert!(db.is_group_searchable(Some(&hidden), false));
        assert!(!db.is_group_searchable(None, false));
    }

    #[test]
    fn test_remove_oldest_history_by_count() {
        let (mut db, _, entry_id) = create_test_v4();
        db.meta.history_max_items = 3;
        {
            let entry = db.index.entry_mut(&entry_id).unwrap();
            for i in 0..5 {
                let mut old = entry.clone();
                old.set_notes(&format!("version {}", i));
                entry.push_history(&old);
            }
        }
        db.remove_oldest_history(&entry_id).unwrap();

        let history = &db.index.entry(&entry_id).unwrap().history;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].notes(), "version 2");
        assert_eq!(history[2].notes(), "version 4");
    }

    #[test]
    fn test_remove_oldest_history_by_size() {
        let (mut db, _, entry_id) = create_test_v4();
        db.meta.history_max_items = -1;
        {
            let entry = db.index.entry_mut(&entry_id).unwrap();
            for _ in 0..4 {
                let mut old = entry.clone();
                old.set_notes(&"x".repeat(1000));
                entry.push_history(&old);
            }
        }
        let one = db.index.entry(&entry_id).unwrap().history[0].approximate_size(&db.binaries);
        db.meta.history_max_size = (one * 2) as i64;
        db.remove_oldest_history(&entry_id).unwrap();
        assert_eq!(db.index.entry(&entry_id).unwrap().history.len(), 2);

        db.meta.history_max_size = -1;
        db.meta.history_max_items = -1;
        db.remove_oldest_history(&entry_id).unwrap();
        assert_eq!(db.index.entry(&entry_id).unwrap().history.len(), 2);
    }

    #[test]
    fn test_tombstones() {
        let (mut db, _, entry_id) = create_test_v4();
        db.add_deleted_object(entry_id);
        db.add_deleted_object(entry_id);
        assert_eq!(db.deleted_objects().len(), 1);
        db.remove_deleted_object(&entry_id);
        assert!(db.deleted_objects().is_empty());
    }

    #[test]
    fn test_kdf_switch() {
        let (mut db, _, _) = create_test_v4();
        db.set_kdf(KdfKind::AesKdf);
        assert_eq!(db.kdf().kind(), KdfKind::AesKdf);
        assert_eq!(db.memory_usage(), None);
        db.set_rounds(1000).unwrap();
        assert_eq!(db.rounds(), 1000);
        assert!(matches!(db.set_rounds(0), Err(DatabaseError::NumberFormat(0))));
    }
}

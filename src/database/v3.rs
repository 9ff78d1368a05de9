//! KeePass 1.x (KDB) database engine

use uuid::Uuid;
use zeroize::Zeroizing;

use super::binary::BinaryPool;
use super::config::DatabaseConfig;
use super::entry::Entry;
use super::group::Group;
use super::index::NodeIndex;
use super::node::{NodeId, NodeRef};
use super::EngineState;
use crate::crypto::{self, EncryptionAlgorithm, KEY_LENGTH, KeyFormat};
use crate::error::{DatabaseError, Result};
use crate::{BACKUP_GROUP_NAME, MAX_ROUNDS_V3};

/// Id of the synthetic root group; never written to disk
pub const ROOT_GROUP_ID_V3: u32 = 0;

/// In-memory KDB database
pub struct DatabaseV3 {
    pub(crate) index: NodeIndex,
    pub(crate) binaries: BinaryPool,
    pub(crate) master_key: Option<Zeroizing<[u8; KEY_LENGTH]>>,
    pub(crate) rounds: u64,
    pub(crate) state: EngineState,
    pub(crate) password_encoding_error: bool,
}

impl DatabaseV3 {
    /// Create an empty database holding only the synthetic root
    pub fn new(config: &DatabaseConfig) -> Self {
        let root = Group::new(NodeId::Int(ROOT_GROUP_ID_V3), "");
        Self {
            index: NodeIndex::new(root, config.change_duplicate_id),
            binaries: BinaryPool::new(config.scratch_dir.clone(), config.memory_threshold),
            master_key: None,
            rounds: config.v3_rounds,
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

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Derive and keep the composite key for later saves
    pub fn set_credentials(&mut self, password: Option<&str>, key_file: Option<&[u8]>) -> Result<()> {
        let key = crypto::master_key(password, key_file, KeyFormat::Legacy)?;
        self.password_encoding_error =
            !crypto::validate_password_encoding(password, key_file.is_some(), KeyFormat::Legacy);
        self.master_key = Some(key);
        Ok(())
    }

    pub(crate) fn master_key(&self) -> Result<&[u8; KEY_LENGTH]> {
        self.master_key.as_deref().ok_or(DatabaseError::MissingCredentials)
    }

    pub fn is_password_encoding_error(&self) -> bool {
        self.password_encoding_error
    }

    /// KDB bodies are always AES-256
    pub fn encryption_algorithm(&self) -> EncryptionAlgorithm {
        EncryptionAlgorithm::Aes256
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Set AES-KDF rounds; KeePass 1.x stores them as a signed 32-bit value
    pub fn set_rounds(&mut self, rounds: u64) -> Result<()> {
        if rounds > MAX_ROUNDS_V3 {
            return Err(DatabaseError::NumberFormat(rounds));
        }
        self.rounds = rounds;
        Ok(())
    }

    /// New detached group with an unused id
    pub fn new_group(&self, title: &str) -> Group {
        Group::new(self.index.new_group_int_id(), title)
    }

    /// New detached entry with an unused id
    pub fn new_entry(&self) -> Entry {
        Entry::new(self.index.new_entry_id())
    }

    /// KDB keeps entries out of the synthetic root
    pub fn root_can_contain_entry(&self) -> bool {
        false
    }

    /// Add a group under `parent`, setting its level
    pub fn add_group_to(&mut self, mut group: Group, parent: &NodeId) -> Result<NodeId> {
        group.level = self.child_level(parent);
        self.index.add_group_to(group, parent)
    }

    /// Add an entry under `parent`; the root is rejected
    pub fn add_entry_to(&mut self, entry: Entry, parent: &NodeId) -> Result<Uuid> {
        self.check_entry_parent(parent)?;
        self.index.add_entry_to(entry, parent)
    }

    /// Move a group and renumber the levels of its subtree
    pub fn move_group(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        self.index.move_group(id, new_parent)?;
        self.update_levels(id);
        Ok(())
    }

    /// Move an entry; the root is rejected
    pub fn move_entry(&mut self, id: &Uuid, new_parent: &NodeId) -> Result<()> {
        self.check_entry_parent(new_parent)?;
        self.index.move_entry(id, new_parent)
    }

    fn check_entry_parent(&self, parent: &NodeId) -> Result<()> {
        if self.index.is_root(parent) {
            return Err(DatabaseError::InvalidMove(
                "KeePass 1 databases cannot hold entries in the root".to_string(),
            ));
        }
        Ok(())
    }

    fn child_level(&self, parent: &NodeId) -> u16 {
        u16::try_from(self.index.depth(parent) + 1).unwrap_or(0)
    }

    /// Recompute `level` for a group and everything below it
    pub(crate) fn update_levels(&mut self, id: &NodeId) {
        let ids: Vec<NodeId> = std::iter::once(*id).chain(self.index.descendant_groups(id)).collect();
        for g in ids {
            let level = u16::try_from(self.index.depth(&g)).unwrap_or(0);
            if let Some(group) = self.index.group_mut(&g) {
                group.level = level;
            }
        }
    }

    /// Whether a group is, or lies inside, the top-level "Backup" group
    pub fn is_backup(&self, id: &NodeId) -> bool {
        if self.index.is_root(id) {
            return false;
        }
        let top = self
            .index
            .ancestors(id)
            .into_iter()
            .rev()
            .nth(1)
            .unwrap_or(*id);
        self.index
            .group(&top)
            .map(|g| g.title.eq_ignore_ascii_case(BACKUP_GROUP_NAME))
            .unwrap_or(false)
    }

    /// Whether entries of a group show up in searches
    pub fn is_group_searchable(&self, id: Option<&NodeId>, omit_backup: bool) -> bool {
        match id {
            None => false,
            Some(id) if !self.index.contains_group(id) => false,
            Some(id) => !(omit_backup && self.is_backup(id)),
        }
    }

    /// KDB has no recycle bin
    pub fn can_recycle(&self, _node: &NodeRef) -> bool {
        false
    }

    /// Wipe secrets, nodes and scratch files; the engine is unusable afterwards
    pub fn clear(&mut self) {
        for entry in self.index.entries_mut() {
            for value in entry.fields.values_mut() {
                value.clear();
            }
        }
        let root = Group::new(NodeId::Int(ROOT_GROUP_ID_V3), "");
        self.index = NodeIndex::new(root, self.index.change_duplicate_id());
        self.binaries.clear();
        self.master_key = None;
        self.state = EngineState::Cleared;
    }
}

impl std::fmt::Debug for DatabaseV3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseV3")
            .field("groups", &self.index.group_count())
            .field("entries", &self.index.entry_count())
            .field("rounds", &self.rounds)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

//! Version dispatch over the two database engines

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::binary::BinaryPool;
use super::entry::Entry;
use super::group::Group;
use super::index::NodeIndex;
use super::node::{NodeId, NodeRef};
use super::v3::DatabaseV3;
use super::v4::DatabaseV4;
use super::EngineState;
use crate::crypto::{EncryptionAlgorithm, KdfKind};
use crate::error::Result;

/// On-disk format generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// KeePass 1.x `.kdb`
    V3,
    /// KeePass 2.x `.kdbx` version 4
    V4,
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::V3 => write!(f, "KeePass 1"),
            FormatVersion::V4 => write!(f, "KeePass 2"),
        }
    }
}

/// A loaded or freshly created database of either format
#[derive(Debug)]
pub enum Engine {
    V3(DatabaseV3),
    V4(DatabaseV4),
}

impl Engine {
    pub fn version(&self) -> FormatVersion {
        match self {
            Engine::V3(_) => FormatVersion::V3,
            Engine::V4(_) => FormatVersion::V4,
        }
    }

    pub fn index(&self) -> &NodeIndex {
        match self {
            Engine::V3(db) => db.index(),
            Engine::V4(db) => db.index(),
        }
    }

    pub fn index_mut(&mut self) -> &mut NodeIndex {
        match self {
            Engine::V3(db) => db.index_mut(),
            Engine::V4(db) => db.index_mut(),
        }
    }

    pub fn binaries(&self) -> &BinaryPool {
        match self {
            Engine::V3(db) => db.binaries(),
            Engine::V4(db) => db.binaries(),
        }
    }

    pub fn binaries_mut(&mut self) -> &mut BinaryPool {
        match self {
            Engine::V3(db) => db.binaries_mut(),
            Engine::V4(db) => db.binaries_mut(),
        }
    }

    pub fn state(&self) -> EngineState {
        match self {
            Engine::V3(db) => db.state,
            Engine::V4(db) => db.state,
        }
    }

    pub(crate) fn set_state(&mut self, state: EngineState) {
        match self {
            Engine::V3(db) => db.state = state,
            Engine::V4(db) => db.state = state,
        }
    }

    pub fn set_credentials(&mut self, password: Option<&str>, key_file: Option<&[u8]>) -> Result<()> {
        match self {
            Engine::V3(db) => db.set_credentials(password, key_file),
            Engine::V4(db) => db.set_credentials(password, key_file),
        }
    }

    pub fn is_password_encoding_error(&self) -> bool {
        match self {
            Engine::V3(db) => db.is_password_encoding_error(),
            Engine::V4(db) => db.is_password_encoding_error(),
        }
    }

    pub fn encryption_algorithm(&self) -> EncryptionAlgorithm {
        match self {
            Engine::V3(db) => db.encryption_algorithm(),
            Engine::V4(db) => db.encryption_algorithm(),
        }
    }

    /// Ciphers the format can write
    pub fn available_encryption_algorithms(&self) -> Vec<EncryptionAlgorithm> {
        match self {
            Engine::V3(_) => vec![EncryptionAlgorithm::Aes256],
            Engine::V4(_) => vec![EncryptionAlgorithm::Aes256, EncryptionAlgorithm::ChaCha20],
        }
    }

    pub fn kdf(&self) -> KdfKind {
        match self {
            Engine::V3(_) => KdfKind::AesKdf,
            Engine::V4(db) => db.kdf().kind(),
        }
    }

    /// KDFs the format can write
    pub fn available_kdfs(&self) -> Vec<KdfKind> {
        match self {
            Engine::V3(_) => vec![KdfKind::AesKdf],
            Engine::V4(_) => vec![KdfKind::AesKdf, KdfKind::Argon2d, KdfKind::Argon2id],
        }
    }

    pub fn rounds(&self) -> u64 {
        match self {
            Engine::V3(db) => db.rounds(),
            Engine::V4(db) => db.rounds(),
        }
    }

    pub fn set_rounds(&mut self, rounds: u64) -> Result<()> {
        match self {
            Engine::V3(db) => db.set_rounds(rounds),
            Engine::V4(db) => db.set_rounds(rounds),
        }
    }

    pub fn memory_usage(&self) -> Option<u64> {
        match self {
            Engine::V3(_) => None,
            Engine::V4(db) => db.memory_usage(),
        }
    }

    pub fn parallelism(&self) -> Option<u32> {
        match self {
            Engine::V3(_) => None,
            Engine::V4(db) => db.parallelism(),
        }
    }

    pub fn new_group(&self, title: &str) -> Group {
        match self {
            Engine::V3(db) => db.new_group(title),
            Engine::V4(db) => db.new_group(title),
        }
    }

    pub fn new_entry(&self) -> Entry {
        match self {
            Engine::V3(db) => db.new_entry(),
            Engine::V4(db) => db.new_entry(),
        }
    }

    pub fn root_can_contain_entry(&self) -> bool {
        match self {
            Engine::V3(db) => db.root_can_contain_entry(),
            Engine::V4(db) => db.root_can_contain_entry(),
        }
    }

    pub fn add_group_to(&mut self, group: Group, parent: &NodeId) -> Result<NodeId> {
        match self {
            Engine::V3(db) => db.add_group_to(group, parent),
            Engine::V4(db) => db.index.add_group_to(group, parent),
        }
    }

    pub fn add_entry_to(&mut self, entry: Entry, parent: &NodeId) -> Result<Uuid> {
        match self {
            Engine::V3(db) => db.add_entry_to(entry, parent),
            Engine::V4(db) => db.index.add_entry_to(entry, parent),
        }
    }

    pub fn move_group(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        match self {
            Engine::V3(db) => db.move_group(id, new_parent),
            Engine::V4(db) => db.index.move_group(id, new_parent),
        }
    }

    pub fn move_entry(&mut self, id: &Uuid, new_parent: &NodeId) -> Result<()> {
        match self {
            Engine::V3(db) => db.move_entry(id, new_parent),
            Engine::V4(db) => db.index.move_entry(id, new_parent),
        }
    }

    /// Re-attach a group subtree removed by a delete, at its old position
    pub(crate) fn undo_delete_group_from(&mut self, group: Group, parent: &NodeId, position: usize) -> Result<NodeId> {
        let id = self.index_mut().undo_delete_group_from(group, parent, position)?;
        if let Engine::V3(db) = self {
            db.update_levels(&id);
        }
        Ok(id)
    }

    pub fn is_backup(&self, id: &NodeId) -> bool {
        match self {
            Engine::V3(db) => db.is_backup(id),
            Engine::V4(db) => db.is_backup(id),
        }
    }

    pub fn is_group_searchable(&self, id: Option<&NodeId>, omit_backup: bool) -> bool {
        match self {
            Engine::V3(db) => db.is_group_searchable(id, omit_backup),
            Engine::V4(db) => db.is_group_searchable(id, omit_backup),
        }
    }

    pub fn is_recycle_bin_enabled(&self) -> bool {
        match self {
            Engine::V3(_) => false,
            Engine::V4(db) => db.is_recycle_bin_enabled(),
        }
    }

    pub fn recycle_bin(&self) -> Option<&Group> {
        match self {
            Engine::V3(_) => None,
            Engine::V4(db) => db.recycle_bin(),
        }
    }

    pub fn can_recycle(&self, node: &NodeRef) -> bool {
        match self {
            Engine::V3(db) => db.can_recycle(node),
            Engine::V4(db) => db.can_recycle(node),
        }
    }

    /// Move a node into the recycle bin; a no-op on KDB
    pub fn recycle(&mut self, node: &NodeRef) -> Result<()> {
        match self {
            Engine::V3(_) => Ok(()),
            Engine::V4(db) => db.recycle(node),
        }
    }

    pub fn undo_recycle(&mut self, node: &NodeRef, original_parent: &NodeId) -> Result<()> {
        match self {
            Engine::V3(_) => Ok(()),
            Engine::V4(db) => db.undo_recycle(node, original_parent),
        }
    }

    /// Record that a node was deleted (KDBX tombstone)
    pub(crate) fn record_deletion(&mut self, uuid: Option<Uuid>) {
        if let (Engine::V4(db), Some(uuid)) = (self, uuid) {
            db.add_deleted_object(uuid);
        }
    }

    /// Forget the tombstone of a restored node
    pub(crate) fn forget_deletion(&mut self, uuid: Option<Uuid>) {
        if let (Engine::V4(db), Some(uuid)) = (self, uuid) {
            db.remove_deleted_object(&uuid);
        }
    }

    /// Forget the recycle bin reference if the bin group was removed,
    /// returning the forgotten id
    pub(crate) fn check_recycle_bin(&mut self) -> Option<Uuid> {
        match self {
            Engine::V4(db) if db.recycle_bin().is_none() => db.meta.recycle_bin_uuid.take(),
            _ => None,
        }
    }

    /// Point the recycle bin reference back at a restored bin group
    pub(crate) fn restore_recycle_bin(&mut self, uuid: Uuid) {
        if let Engine::V4(db) = self {
            db.meta.recycle_bin_uuid = Some(uuid);
        }
    }

    /// Trim an entry's history to the configured limits; KDB keeps none
    pub fn remove_oldest_history(&mut self, id: &Uuid) -> Result<()> {
        match self {
            Engine::V3(_) => Ok(()),
            Engine::V4(db) => db.remove_oldest_history(id),
        }
    }

    /// Whether entries keep a history of prior versions
    pub fn supports_history(&self) -> bool {
        matches!(self, Engine::V4(_))
    }

    pub fn clear(&mut self) {
        match self {
            Engine::V3(db) => db.clear(),
            Engine::V4(db) => db.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::config::DatabaseConfig;
    use crate::database::v3::tests::create_test_v3;
    use crate::database::v4::tests::create_test_v4;
    use crate::error::DatabaseError;

    #[test]
    fn test_version_display() {
        assert_eq!(FormatVersion::V3.to_string(), "KeePass 1");
        assert_eq!(FormatVersion::V4.to_string(), "KeePass 2");
    }

    #[test]
    fn test_v3_dispatch() {
        let (db, internet, _, entry_id) = create_test_v3();
        let mut engine = Engine::V3(db);
        assert_eq!(engine.version(), FormatVersion::V3);
        assert_eq!(engine.kdf(), KdfKind::AesKdf);
        assert_eq!(engine.available_encryption_algorithms(), vec![EncryptionAlgorithm::Aes256]);
        assert!(!engine.can_recycle(&NodeRef::Entry(entry_id)));
        engine.recycle(&NodeRef::Entry(entry_id)).unwrap();
        assert_eq!(engine.index().entry(&entry_id).unwrap().parent, Some(internet));

        let root = engine.index().root_id();
        let entry = engine.new_entry();
        assert!(matches!(engine.add_entry_to(entry, &root), Err(DatabaseError::InvalidMove(_))));
    }

    #[test]
    fn test_v4_dispatch() {
        let (db, _, entry_id) = create_test_v4();
        let mut engine = Engine::V4(db);
        assert_eq!(engine.version(), FormatVersion::V4);
        assert!(engine.is_recycle_bin_enabled());
        assert_eq!(engine.available_kdfs().len(), 3);
        assert!(engine.supports_history());

        engine.recycle(&NodeRef::Entry(entry_id)).unwrap();
        let bin = engine.recycle_bin().unwrap().id;
        assert_eq!(engine.index().entry(&entry_id).unwrap().parent, Some(bin));

        engine.record_deletion(Some(entry_id));
        match &engine {
            Engine::V4(db) => assert_eq!(db.deleted_objects().len(), 1),
            Engine::V3(_) => unreachable!(),
        }
        engine.forget_deletion(Some(entry_id));
        match &engine {
            Engine::V4(db) => assert!(db.deleted_objects().is_empty()),
            Engine::V3(_) => unreachable!(),
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut engine = Engine::V4(DatabaseV4::new("x", &DatabaseConfig::default()));
        assert_eq!(engine.state(), EngineState::Empty);
        engine.set_state(EngineState::Loaded);
        assert_eq!(engine.state(), EngineState::Loaded);
        engine.clear();
        assert_eq!(engine.state(), EngineState::Cleared);
    }
}

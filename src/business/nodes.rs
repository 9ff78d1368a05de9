//! Node operations
//!
//! Lookups return `None` or `false` when nothing is loaded; mutations fail
//! with `NotLoaded`. Structural errors are raised before anything changes.

use log::debug;
use uuid::Uuid;

use super::database::Database;
use crate::database::{Entry, Group, NodeId, NodeRef};
use crate::error::{DatabaseError, Result};

/// One node detached by a delete, with where it used to be
#[derive(Debug, Clone, PartialEq)]
pub enum RemovedNode {
    Group { group: Group, parent: NodeId, position: usize },
    Entry { entry: Entry, parent: NodeId, position: usize },
}

/// Everything a delete detached, in removal order
///
/// Pass it back to [`Database::undo_delete`] to restore the subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletedNodes {
    pub removed: Vec<RemovedNode>,
    /// Recycle bin reference cleared because the bin itself was removed
    pub recycle_bin: Option<Uuid>,
}

impl DeletedNodes {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.removed.iter().filter_map(|r| match r {
            RemovedNode::Entry { entry, .. } => Some(entry),
            RemovedNode::Group { .. } => None,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.removed.iter().filter_map(|r| match r {
            RemovedNode::Group { group, .. } => Some(group),
            RemovedNode::Entry { .. } => None,
        })
    }
}

fn entry_not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NodeNotFound(NodeRef::Entry(*id).to_string())
}

fn group_not_found(id: &NodeId) -> DatabaseError {
    DatabaseError::NodeNotFound(NodeRef::Group(*id).to_string())
}

impl Database {
    pub fn root_group(&self) -> Option<&Group> {
        self.engine.as_ref()?.index().root()
    }

    pub fn get_group(&self, id: &NodeId) -> Option<&Group> {
        self.engine.as_ref()?.index().group(id)
    }

    pub fn get_entry(&self, id: &Uuid) -> Option<&Entry> {
        self.engine.as_ref()?.index().entry(id)
    }

    /// Detached group with an unused id of the right kind
    pub fn create_group(&self, title: &str) -> Option<Group> {
        Some(self.engine.as_ref()?.new_group(title))
    }

    /// Detached entry with an unused id and empty standard fields
    pub fn create_entry(&self) -> Option<Entry> {
        Some(self.engine.as_ref()?.new_entry())
    }

    /// Attach a new childless group under `parent`
    ///
    /// The group and all its ancestors are marked modified.
    pub fn add_group_to(&mut self, mut group: Group, parent: &NodeId) -> Result<NodeId> {
        let engine = self.require_engine_mut()?;
        group.child_groups.clear();
        group.child_entries.clear();
        let id = engine.add_group_to(group, parent)?;
        engine.index_mut().touch_group(&id, true, true);
        Ok(id)
    }

    /// Attach a new entry under `parent`; KDB roots cannot hold entries
    ///
    /// The entry and all its ancestors are marked modified.
    pub fn add_entry_to(&mut self, entry: Entry, parent: &NodeId) -> Result<Uuid> {
        let engine = self.require_engine_mut()?;
        let id = engine.add_entry_to(entry, parent)?;
        engine.index_mut().touch_entry(&id, true, true);
        Ok(id)
    }

    /// Replace an entry's content, returning the previous version
    ///
    /// The id and parent are kept. KDBX entries gain the previous version as
    /// a history item, trimmed to the configured limits.
    pub fn update_entry(&mut self, entry: Entry) -> Result<Entry> {
        let engine = self.require_engine_mut()?;
        let supports_history = engine.supports_history();
        let id = entry.id;
        let current = engine.index_mut().entry_mut(&id).ok_or_else(|| entry_not_found(&id))?;
        let old = current.clone();

        let mut updated = entry;
        updated.parent = old.parent;
        updated.history = if supports_history { old.history.clone() } else { Vec::new() };
        if supports_history {
            updated.push_history(&old);
        }
        updated.touch(true);
        *current = updated;

        engine.remove_oldest_history(&id)?;
        if let Some(parent) = old.parent {
            engine.index_mut().touch_group(&parent, false, false);
        }
        Ok(old)
    }

    /// Put back an entry version returned by [`Self::update_entry`]
    pub(crate) fn restore_entry(&mut self, old: Entry) -> Result<()> {
        let engine = self.require_engine_mut()?;
        let current = engine
            .index_mut()
            .entry_mut(&old.id)
            .ok_or_else(|| entry_not_found(&old.id))?;
        let parent = current.parent;
        *current = Entry { parent, ..old };
        Ok(())
    }

    pub fn move_group(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        let engine = self.require_engine_mut()?;
        engine.move_group(id, new_parent)?;
        engine.index_mut().touch_group(id, false, false);
        Ok(())
    }

    pub fn move_entry(&mut self, id: &Uuid, new_parent: &NodeId) -> Result<()> {
        let engine = self.require_engine_mut()?;
        engine.move_entry(id, new_parent)?;
        engine.index_mut().touch_entry(id, false, false);
        Ok(())
    }

    /// Deep copy of an entry under `parent` with a fresh id
    ///
    /// History is copied along. Attachments share their pool content.
    pub fn copy_entry(&mut self, id: &Uuid, parent: &NodeId) -> Result<Uuid> {
        let engine = self.require_engine_mut()?;
        let index = engine.index();
        let mut copy = index.entry(id).cloned().ok_or_else(|| entry_not_found(id))?;
        copy.id = index.new_entry_id();
        for old in copy.history.iter_mut() {
            old.id = copy.id;
        }
        copy.touch(true);

        let copied = engine.add_entry_to(copy, parent)?;
        engine.index_mut().touch_group(parent, true, false);
        debug!("Copied {} to {}", NodeRef::Entry(*id), NodeRef::Entry(copied));
        Ok(copied)
    }

    /// Permanently remove an entry
    pub fn delete_entry(&mut self, id: &Uuid) -> Result<DeletedNodes> {
        let engine = self.require_engine_mut()?;
        let (entry, position) = engine.index_mut().remove_entry_from(id)?;
        let parent = entry.parent.ok_or_else(|| entry_not_found(id))?;
        engine.record_deletion(Some(entry.id));
        engine.index_mut().touch_group(&parent, true, false);
        Ok(DeletedNodes {
            removed: vec![RemovedNode::Entry { entry, parent, position }],
            recycle_bin: None,
        })
    }

    /// Permanently remove a group and its whole subtree
    ///
    /// Entries of every descendant go first, then descendant groups bottom-up,
    /// then the group itself.
    pub fn delete_group(&mut self, id: &NodeId) -> Result<DeletedNodes> {
        let engine = self.require_engine_mut()?;
        let index = engine.index();
        if index.is_root(id) {
            return Err(DatabaseError::InvalidMove("the root group cannot be deleted".to_string()));
        }
        let parent = index.group(id).ok_or_else(|| group_not_found(id))?.parent;
        let entries = index.descendant_entries(id);
        let mut groups = index.descendant_groups(id);
        groups.reverse();
        groups.push(*id);

        let mut removed = Vec::with_capacity(entries.len() + groups.len());
        for entry_id in entries {
            let (entry, position) = engine.index_mut().remove_entry_from(&entry_id)?;
            if let Some(parent) = entry.parent {
                engine.record_deletion(Some(entry.id));
                removed.push(RemovedNode::Entry { entry, parent, position });
            }
        }
        for group_id in groups {
            let (group, position) = engine.index_mut().remove_group_from(&group_id)?;
            if let Some(parent) = group.parent {
                engine.record_deletion(group.id.as_uuid());
                removed.push(RemovedNode::Group { group, parent, position });
            }
        }

        let recycle_bin = engine.check_recycle_bin();
        if let Some(parent) = parent {
            engine.index_mut().touch_group(&parent, true, false);
        }
        debug!("Deleted {} with {} nodes", NodeRef::Group(*id), removed.len());
        Ok(DeletedNodes { removed, recycle_bin })
    }

    /// Restore everything a delete removed, in reverse order
    ///
    /// A restored recycle bin becomes the recycle bin again.
    pub fn undo_delete(&mut self, deleted: DeletedNodes) -> Result<()> {
        for node in deleted.removed.into_iter().rev() {
            match node {
                RemovedNode::Group { group, parent, position } => {
                    self.undo_delete_group(group, &parent, position)?;
                }
                RemovedNode::Entry { entry, parent, position } => {
                    self.undo_delete_entry(entry, &parent, position)?;
                }
            }
        }
        if let Some(bin) = deleted.recycle_bin {
            self.require_engine_mut()?.restore_recycle_bin(bin);
        }
        Ok(())
    }

    pub fn undo_delete_entry(&mut self, entry: Entry, parent: &NodeId, position: usize) -> Result<Uuid> {
        let engine = self.require_engine_mut()?;
        let uuid = entry.id;
        let id = engine.index_mut().undo_delete_entry_from(entry, parent, position)?;
        engine.forget_deletion(Some(uuid));
        Ok(id)
    }

    pub fn undo_delete_group(&mut self, group: Group, parent: &NodeId, position: usize) -> Result<NodeId> {
        let engine = self.require_engine_mut()?;
        let uuid = group.id.as_uuid();
        let id = engine.undo_delete_group_from(group, parent, position)?;
        engine.forget_deletion(uuid);
        Ok(id)
    }

    pub fn can_recycle(&self, node: &NodeRef) -> bool {
        self.engine.as_ref().is_some_and(|e| e.can_recycle(node))
    }

    /// Move a node into the recycle bin, creating the bin on first use
    pub fn recycle(&mut self, node: &NodeRef) -> Result<()> {
        self.require_engine_mut()?.recycle(node)
    }

    pub fn undo_recycle(&mut self, node: &NodeRef, original_parent: &NodeId) -> Result<()> {
        self.require_engine_mut()?.undo_recycle(node, original_parent)
    }

    pub fn is_group_searchable(&self, id: Option<&NodeId>, omit_backup: bool) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|e| e.is_group_searchable(id, omit_backup))
    }

    pub fn is_recycle_bin_enabled(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_recycle_bin_enabled())
    }

    pub fn recycle_bin(&self) -> Option<&Group> {
        self.engine.as_ref()?.recycle_bin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::database::tests::{create_test_database, create_test_database_v3};

    /// Facade with Outer/Inner groups and an entry "Mail" in Inner
    fn populated(mut db: Database) -> (Database, NodeId, NodeId, Uuid) {
        let root = db.root_group().unwrap().id;
        let outer = db.add_group_to(db.create_group("Outer").unwrap(), &root).unwrap();
        let inner = db.add_group_to(db.create_group("Inner").unwrap(), &outer).unwrap();
        let mut entry = db.create_entry().unwrap();
        entry.set_title("Mail");
        entry.set_username("alice");
        entry.set_password("hunter2");
        let entry = db.add_entry_to(entry, &inner).unwrap();
        (db, outer, inner, entry)
    }

    #[test]
    fn test_unloaded_facade() {
        let mut db = Database::new();
        let id = NodeId::Int(1);
        assert!(db.root_group().is_none());
        assert!(db.get_group(&id).is_none());
        assert!(db.create_entry().is_none());
        assert!(!db.can_recycle(&NodeRef::Group(id)));
        assert!(!db.is_group_searchable(Some(&id), true));
        assert!(!db.is_recycle_bin_enabled());
        assert!(matches!(db.move_group(&id, &id), Err(DatabaseError::NotLoaded)));
        assert!(matches!(db.delete_group(&id), Err(DatabaseError::NotLoaded)));
    }

    #[test]
    fn test_add_and_lookup() {
        for db in [create_test_database(), create_test_database_v3()] {
            let (db, outer, inner, entry) = populated(db);
            assert_eq!(db.get_group(&inner).unwrap().parent, Some(outer));
            assert_eq!(db.get_entry(&entry).unwrap().title(), "Mail");
            assert!(db.engine().unwrap().index().is_consistent());
        }
    }

    #[test]
    fn test_v3_root_rejects_entries() {
        let mut db = create_test_database_v3();
        let root = db.root_group().unwrap().id;
        let entry = db.create_entry().unwrap();
        assert!(matches!(db.add_entry_to(entry, &root), Err(DatabaseError::InvalidMove(_))));

        let (mut db, _, _, entry) = populated(create_test_database_v3());
        let root = db.root_group().unwrap().id;
        assert!(matches!(db.move_entry(&entry, &root), Err(DatabaseError::InvalidMove(_))));
    }

    #[test]
    fn test_update_entry_keeps_history() {
        let (mut db, _, inner, id) = populated(create_test_database());
        let mut changed = db.get_entry(&id).unwrap().clone();
        changed.set_password("correct horse");
        changed.parent = None;

        let old = db.update_entry(changed).unwrap();
        assert_eq!(old.password(), "hunter2");

        let entry = db.get_entry(&id).unwrap();
        assert_eq!(entry.password(), "correct horse");
        assert_eq!(entry.parent, Some(inner));
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].password(), "hunter2");
        assert!(entry.history[0].history.is_empty());

        db.restore_entry(old).unwrap();
        let entry = db.get_entry(&id).unwrap();
        assert_eq!(entry.password(), "hunter2");
        assert!(entry.history.is_empty());
    }

    #[test]
    fn test_update_entry_v3_has_no_history() {
        let (mut db, _, _, id) = populated(create_test_database_v3());
        let mut changed = db.get_entry(&id).unwrap().clone();
        changed.set_notes("rotated");
        db.update_entry(changed).unwrap();
        assert!(db.get_entry(&id).unwrap().history.is_empty());
    }

    #[test]
    fn test_move_group_into_descendant() {
        for db in [create_test_database(), create_test_database_v3()] {
            let (mut db, outer, inner, _) = populated(db);
            let before = db.get_group(&outer).unwrap().clone();
            assert!(matches!(db.move_group(&outer, &inner), Err(DatabaseError::InvalidMove(_))));
            assert_eq!(db.get_group(&outer).unwrap(), &before);
        }
    }

    #[test]
    fn test_copy_entry() {
        for db in [create_test_database(), create_test_database_v3()] {
            let (mut db, outer, _, id) = populated(db);
            let copy = db.copy_entry(&id, &outer).unwrap();
            assert_ne!(copy, id);

            let original = db.get_entry(&id).unwrap();
            let copied = db.get_entry(&copy).unwrap();
            assert_eq!(copied.fields, original.fields);
            assert_eq!(copied.parent, Some(outer));
            assert!(db.engine().unwrap().index().is_consistent());
        }
    }

    #[test]
    fn test_delete_group_and_undo() {
        for db in [create_test_database(), create_test_database_v3()] {
            let (mut db, outer, inner, entry) = populated(db);
            let root = db.root_group().unwrap().id;
            let before = db.root_group().unwrap().child_groups.clone();

            let deleted = db.delete_group(&outer).unwrap();
            assert_eq!(deleted.entries().count(), 1);
            assert_eq!(deleted.groups().count(), 2);
            assert!(db.get_group(&inner).is_none());
            assert!(db.get_entry(&entry).is_none());

            db.undo_delete(deleted).unwrap();
            assert_eq!(db.root_group().unwrap().child_groups, before);
            assert_eq!(db.get_group(&outer).unwrap().parent, Some(root));
            assert_eq!(db.get_entry(&entry).unwrap().parent, Some(inner));
            assert!(db.engine().unwrap().index().is_consistent());
        }
    }

    #[test]
    fn test_delete_records_tombstones() {
        let (mut db, outer, _, entry) = populated(create_test_database());
        let deleted = db.delete_group(&outer).unwrap();
        let tombstones = |db: &Database| match db.engine() {
            Some(crate::database::Engine::V4(v4)) => v4.deleted_objects().len(),
            _ => 0,
        };
        assert_eq!(tombstones(&db), 3);
        db.undo_delete(deleted).unwrap();
        assert_eq!(tombstones(&db), 0);

        db.delete_entry(&entry).unwrap();
        assert_eq!(tombstones(&db), 1);
    }

    #[test]
    fn test_delete_root_rejected() {
        let (mut db, _, _, _) = populated(create_test_database());
        let root = db.root_group().unwrap().id;
        let groups = db.engine().unwrap().index().group_count();
        assert!(matches!(db.delete_group(&root), Err(DatabaseError::InvalidMove(_))));
        assert_eq!(db.engine().unwrap().index().group_count(), groups);
    }

    #[test]
    fn test_recycle_and_undo() {
        let (mut db, _, inner, entry) = populated(create_test_database());
        let node = NodeRef::Entry(entry);
        assert!(db.is_recycle_bin_enabled());
        assert!(db.can_recycle(&node));

        db.recycle(&node).unwrap();
        let bin = db.recycle_bin().unwrap().id;
        assert_eq!(db.get_entry(&entry).unwrap().parent, Some(bin));
        assert!(!db.can_recycle(&node));
        assert!(!db.is_group_searchable(Some(&bin), true));

        db.undo_recycle(&node, &inner).unwrap();
        assert_eq!(db.get_entry(&entry).unwrap().parent, Some(inner));
    }

    #[test]
    fn test_add_touches_ancestors() {
        let (mut db, outer, inner, _) = populated(create_test_database());
        let root = db.root_group().unwrap().id;
        let past = db.root_group().unwrap().times.creation - chrono::Duration::days(30);
        let index = db.engine_mut().unwrap().index_mut();
        for id in [root, outer, inner] {
            index.group_mut(&id).unwrap().times.last_modification = past;
        }

        let entry = db.add_entry_to(db.create_entry().unwrap(), &inner).unwrap();
        assert!(db.get_entry(&entry).unwrap().times.last_modification > past);
        for id in [root, outer, inner] {
            assert!(db.get_group(&id).unwrap().times.last_modification > past);
        }

        let index = db.engine_mut().unwrap().index_mut();
        for id in [root, outer, inner] {
            index.group_mut(&id).unwrap().times.last_modification = past;
        }
        let group = db.add_group_to(db.create_group("Deep").unwrap(), &inner).unwrap();
        assert!(db.get_group(&group).unwrap().times.last_modification > past);
        for id in [root, outer, inner] {
            assert!(db.get_group(&id).unwrap().times.last_modification > past);
        }
    }

    #[test]
    fn test_undo_delete_restores_recycle_bin() {
        let (mut db, outer, _, entry) = populated(create_test_database());
        db.recycle(&NodeRef::Entry(entry)).unwrap();
        let bin = db.recycle_bin().unwrap().id;

        let deleted = db.delete_group(&bin).unwrap();
        assert_eq!(deleted.recycle_bin, bin.as_uuid());
        assert!(db.recycle_bin().is_none());

        db.undo_delete(deleted).unwrap();
        assert_eq!(db.recycle_bin().unwrap().id, bin);
        assert_eq!(db.get_entry(&entry).unwrap().parent, Some(bin));

        let mut second = db.create_entry().unwrap();
        second.set_title("Bank");
        let second = db.add_entry_to(second, &outer).unwrap();
        db.recycle(&NodeRef::Entry(second)).unwrap();
        assert_eq!(db.get_entry(&second).unwrap().parent, Some(bin));

        let bins = db
            .root_group()
            .unwrap()
            .child_groups
            .iter()
            .filter(|id| db.get_group(id).unwrap().title == crate::RECYCLE_BIN_NAME)
            .count();
        assert_eq!(bins, 1);
        assert!(db.engine().unwrap().index().is_consistent());
    }

    #[test]
    fn test_deleting_other_groups_keeps_recycle_bin() {
        let (mut db, outer, _, entry) = populated(create_test_database());
        db.recycle(&NodeRef::Entry(entry)).unwrap();
        let bin = db.recycle_bin().unwrap().id;

        let deleted = db.delete_group(&outer).unwrap();
        assert!(deleted.recycle_bin.is_none());
        assert_eq!(db.recycle_bin().unwrap().id, bin);
        db.undo_delete(deleted).unwrap();
        assert_eq!(db.recycle_bin().unwrap().id, bin);
    }

    #[test]
    fn test_deleting_recycle_bin_forgets_it() {
        let (mut db, outer, _, _) = populated(create_test_database());
        db.recycle(&NodeRef::Group(outer)).unwrap();
        let bin = db.recycle_bin().unwrap().id;
        db.delete_group(&bin).unwrap();
        assert!(db.recycle_bin().is_none());
        assert!(db.engine().unwrap().index().is_consistent());
    }
}

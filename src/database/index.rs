//! Node index: flat id-keyed storage for groups and entries
//!
//! The index owns every node. Tree structure is expressed through ids only:
//! a group lists its children, a child names its parent. Every mutation here
//! updates both directions together, and validates before touching state.

use std::collections::{HashMap, HashSet};

use log::warn;
use uuid::Uuid;

use super::entry::Entry;
use super::group::Group;
use super::node::{NodeId, NodeRef};
use crate::error::{DatabaseError, Result};
use crate::utils::{generate_group_int_id, generate_uuid, now};

/// Id-keyed storage for one database's nodes
#[derive(Debug, Clone)]
pub struct NodeIndex {
    groups: HashMap<NodeId, Group>,
    entries: HashMap<Uuid, Entry>,
    root: NodeId,
    change_duplicate_id: bool,
}

impl NodeIndex {
    /// Create an index holding only `root`
    pub fn new(mut root: Group, change_duplicate_id: bool) -> Self {
        root.parent = None;
        let id = root.id;
        let mut groups = HashMap::new();
        groups.insert(id, root);
        Self {
            groups,
            entries: HashMap::new(),
            root: id,
            change_duplicate_id,
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> Option<&Group> {
        self.groups.get(&self.root)
    }

    pub fn is_root(&self, id: &NodeId) -> bool {
        *id == self.root
    }

    /// Get a group by id
    pub fn group(&self, id: &NodeId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn group_mut(&mut self, id: &NodeId) -> Option<&mut Group> {
        self.groups.get_mut(id)
    }

    /// Get an entry by id
    pub fn entry(&self, id: &Uuid) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn entry_mut(&mut self, id: &Uuid) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    pub fn contains_group(&self, id: &NodeId) -> bool {
        self.groups.contains_key(id)
    }

    pub fn contains_entry(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// All groups, root included, in no particular order
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// All entries in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.values_mut()
    }

    /// Number of groups, not counting the root
    pub fn group_count(&self) -> usize {
        self.groups.len().saturating_sub(1)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn change_duplicate_id(&self) -> bool {
        self.change_duplicate_id
    }

    /// Unused random integer group id
    pub fn new_group_int_id(&self) -> NodeId {
        loop {
            let id = NodeId::Int(generate_group_int_id());
            if !self.groups.contains_key(&id) {
                return id;
            }
        }
    }

    /// Unused random UUID group id
    pub fn new_group_uuid(&self) -> NodeId {
        loop {
            let id = NodeId::Uuid(generate_uuid());
            if !self.groups.contains_key(&id) {
                return id;
            }
        }
    }

    /// Unused random entry id
    pub fn new_entry_id(&self) -> Uuid {
        loop {
            let id = generate_uuid();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    fn fresh_group_id_like(&self, id: &NodeId) -> NodeId {
        match id {
            NodeId::Int(_) => self.new_group_int_id(),
            NodeId::Uuid(_) => self.new_group_uuid(),
        }
    }

    /// Insert a group into the index only, enforcing id uniqueness
    ///
    /// With `change_duplicate_id` a colliding group gets a fresh id, otherwise
    /// the insert fails with `DuplicateIdentifier`. Returns the id used.
    pub fn add_group_index(&mut self, mut group: Group) -> Result<NodeId> {
        if self.groups.contains_key(&group.id) {
            if !self.change_duplicate_id {
                return Err(DatabaseError::DuplicateIdentifier {
                    kind: "group",
                    id: group.id.to_string(),
                });
            }
            let fresh = self.fresh_group_id_like(&group.id);
            warn!("Duplicate group id {} reassigned to {}", group.id, fresh);
            group.id = fresh;
        }
        let id = group.id;
        self.groups.insert(id, group);
        Ok(id)
    }

    /// Insert an entry into the index only, enforcing id uniqueness
    pub fn add_entry_index(&mut self, mut entry: Entry) -> Result<Uuid> {
        if self.entries.contains_key(&entry.id) {
            if !self.change_duplicate_id {
                return Err(DatabaseError::DuplicateIdentifier {
                    kind: "entry",
                    id: NodeId::Uuid(entry.id).to_string(),
                });
            }
            let fresh = self.new_entry_id();
            warn!("Duplicate entry id {} reassigned to {}", NodeId::Uuid(entry.id), NodeId::Uuid(fresh));
            entry.id = fresh;
        }
        let id = entry.id;
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Remove a group from the index only
    pub fn remove_group_index(&mut self, id: &NodeId) -> Option<Group> {
        if self.is_root(id) {
            return None;
        }
        self.groups.remove(id)
    }

    /// Remove an entry from the index only
    pub fn remove_entry_index(&mut self, id: &Uuid) -> Option<Entry> {
        self.entries.remove(id)
    }

    fn require_group(&self, id: &NodeId) -> Result<()> {
        if self.groups.contains_key(id) {
            Ok(())
        } else {
            Err(DatabaseError::NodeNotFound(format!("group {}", id)))
        }
    }

    /// Add a group under `parent` at the end of its children
    pub fn add_group_to(&mut self, group: Group, parent: &NodeId) -> Result<NodeId> {
        self.insert_group_at(group, parent, usize::MAX)
    }

    /// Add a group under `parent` at `position` (clamped to the child count)
    pub fn insert_group_at(&mut self, mut group: Group, parent: &NodeId, position: usize) -> Result<NodeId> {
        self.require_group(parent)?;
        group.parent = Some(*parent);
        let id = self.add_group_index(group)?;
        if let Some(p) = self.groups.get_mut(parent) {
            let position = position.min(p.child_groups.len());
            p.child_groups.insert(position, id);
        }
        Ok(id)
    }

    /// Add an entry under `parent` at the end of its children
    pub fn add_entry_to(&mut self, entry: Entry, parent: &NodeId) -> Result<Uuid> {
        self.insert_entry_at(entry, parent, usize::MAX)
    }

    /// Add an entry under `parent` at `position` (clamped to the child count)
    pub fn insert_entry_at(&mut self, mut entry: Entry, parent: &NodeId, position: usize) -> Result<Uuid> {
        self.require_group(parent)?;
        entry.parent = Some(*parent);
        let id = self.add_entry_index(entry)?;
        if let Some(p) = self.groups.get_mut(parent) {
            let position = position.min(p.child_entries.len());
            p.child_entries.insert(position, id);
        }
        Ok(id)
    }

    /// Detach a group from its parent and remove it from the index
    ///
    /// Children are left untouched; callers remove them first. Returns the
    /// group and its former position in the parent's child list.
    pub fn remove_group_from(&mut self, id: &NodeId) -> Result<(Group, usize)> {
        if self.is_root(id) {
            return Err(DatabaseError::InvalidMove("the root group cannot be removed".to_string()));
        }
        let group = self
            .groups
            .remove(id)
            .ok_or_else(|| DatabaseError::NodeNotFound(format!("group {}", id)))?;
        let mut position = 0;
        if let Some(parent) = group.parent.and_then(|p| self.groups.get_mut(&p)) {
            if let Some(pos) = parent.child_groups.iter().position(|c| c == id) {
                parent.child_groups.remove(pos);
                position = pos;
            }
        }
        Ok((group, position))
    }

    /// Detach an entry from its parent and remove it from the index
    pub fn remove_entry_from(&mut self, id: &Uuid) -> Result<(Entry, usize)> {
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| DatabaseError::NodeNotFound(format!("entry {}", NodeId::Uuid(*id))))?;
        let mut position = 0;
        if let Some(parent) = entry.parent.and_then(|p| self.groups.get_mut(&p)) {
            if let Some(pos) = parent.child_entries.iter().position(|c| c == id) {
                parent.child_entries.remove(pos);
                position = pos;
            }
        }
        Ok((entry, position))
    }

    /// Re-attach a group removed by [`Self::remove_group_from`]
    pub fn undo_delete_group_from(&mut self, group: Group, parent: &NodeId, position: usize) -> Result<NodeId> {
        self.insert_group_at(group, parent, position)
    }

    /// Re-attach an entry removed by [`Self::remove_entry_from`]
    pub fn undo_delete_entry_from(&mut self, entry: Entry, parent: &NodeId, position: usize) -> Result<Uuid> {
        self.insert_entry_at(entry, parent, position)
    }

    /// Whether `node` lies somewhere below `container`
    pub fn is_contained_in(&self, node: &NodeRef, container: &NodeId) -> bool {
        let mut current = match node {
            NodeRef::Group(id) => self.groups.get(id).and_then(|g| g.parent),
            NodeRef::Entry(id) => self.entries.get(id).and_then(|e| e.parent),
        };
        // Bounded by the group count so a corrupt cycle cannot hang
        let mut steps = self.groups.len();
        while let Some(id) = current {
            if id == *container {
                return true;
            }
            if steps == 0 {
                break;
            }
            steps -= 1;
            current = self.groups.get(&id).and_then(|g| g.parent);
        }
        false
    }

    /// Parent of a node
    pub fn parent_of(&self, node: &NodeRef) -> Option<NodeId> {
        match node {
            NodeRef::Group(id) => self.groups.get(id).and_then(|g| g.parent),
            NodeRef::Entry(id) => self.entries.get(id).and_then(|e| e.parent),
        }
    }

    /// Ancestors of a group, nearest first, ending with the root
    pub fn ancestors(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.groups.get(id).and_then(|g| g.parent);
        while let Some(p) = current {
            if out.contains(&p) || out.len() > self.groups.len() {
                break;
            }
            out.push(p);
            current = self.groups.get(&p).and_then(|g| g.parent);
        }
        out
    }

    /// Depth below the root: top-level groups are 0, the root is -1
    pub fn depth(&self, id: &NodeId) -> i32 {
        self.ancestors(id).len() as i32 - 1
    }

    /// Groups below `id` in pre-order (parents before children), excluding `id`
    pub fn descendant_groups(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = match self.groups.get(id) {
            Some(g) => g.child_groups.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(g) = self.groups.get(&current) {
                stack.extend(g.child_groups.iter().rev().copied());
            }
        }
        out
    }

    /// Entries of `id` and all its descendants, group by group in pre-order
    pub fn descendant_entries(&self, id: &NodeId) -> Vec<Uuid> {
        std::iter::once(*id)
            .chain(self.descendant_groups(id))
            .filter_map(|g| self.groups.get(&g))
            .flat_map(|g| g.child_entries.iter().copied())
            .collect()
    }

    /// Move a group under a new parent
    ///
    /// Fails with `InvalidMove` when the target is the group itself or one of
    /// its descendants, or when moving the root. Nothing changes on failure.
    pub fn move_group(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        if self.is_root(id) {
            return Err(DatabaseError::InvalidMove("the root group cannot be moved".to_string()));
        }
        self.require_group(id)?;
        self.require_group(new_parent)?;
        if id == new_parent || self.is_contained_in(&NodeRef::Group(*new_parent), id) {
            return Err(DatabaseError::InvalidMove(format!(
                "group {} cannot be moved into itself or a descendant",
                id
            )));
        }

        let old_parent = self.groups.get(id).and_then(|g| g.parent);
        if old_parent == Some(*new_parent) {
            return Ok(());
        }
        if let Some(p) = old_parent.and_then(|p| self.groups.get_mut(&p)) {
            p.child_groups.retain(|c| c != id);
        }
        if let Some(p) = self.groups.get_mut(new_parent) {
            p.child_groups.push(*id);
        }
        if let Some(g) = self.groups.get_mut(id) {
            g.parent = Some(*new_parent);
            g.times.location_changed = now();
        }
        Ok(())
    }

    /// Move an entry under a new parent
    pub fn move_entry(&mut self, id: &Uuid, new_parent: &NodeId) -> Result<()> {
        if !self.entries.contains_key(id) {
            return Err(DatabaseError::NodeNotFound(format!("entry {}", NodeId::Uuid(*id))));
        }
        self.require_group(new_parent)?;

        let old_parent = self.entries.get(id).and_then(|e| e.parent);
        if old_parent == Some(*new_parent) {
            return Ok(());
        }
        if let Some(p) = old_parent.and_then(|p| self.groups.get_mut(&p)) {
            p.child_entries.retain(|c| c != id);
        }
        if let Some(p) = self.groups.get_mut(new_parent) {
            p.child_entries.push(*id);
        }
        if let Some(e) = self.entries.get_mut(id) {
            e.parent = Some(*new_parent);
            e.times.location_changed = now();
        }
        Ok(())
    }

    /// Touch a group, optionally walking every ancestor up to the root
    pub fn touch_group(&mut self, id: &NodeId, modified: bool, touch_parents: bool) {
        if let Some(g) = self.groups.get_mut(id) {
            g.touch(modified);
        }
        if touch_parents {
            for p in self.ancestors(id) {
                if let Some(g) = self.groups.get_mut(&p) {
                    g.touch(modified);
                }
            }
        }
    }

    /// Touch an entry, optionally walking every ancestor group up to the root
    pub fn touch_entry(&mut self, id: &Uuid, modified: bool, touch_parents: bool) {
        let parent = match self.entries.get_mut(id) {
            Some(e) => {
                e.touch(modified);
                e.parent
            }
            None => return,
        };
        if let (true, Some(p)) = (touch_parents, parent) {
            self.touch_group(&p, modified, true);
        }
    }

    /// Check that parent and child links agree and that every indexed node
    /// is reachable from the root exactly once
    pub fn is_consistent(&self) -> bool {
        let mut seen_groups = 1usize;
        let mut seen_entries = 0usize;
        let mut stack = vec![self.root];
        let mut visited = HashSet::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                return false;
            }
            let Some(group) = self.groups.get(&id) else {
                return false;
            };
            for child in &group.child_groups {
                match self.groups.get(child) {
                    Some(c) if c.parent == Some(id) => {
                        seen_groups += 1;
                        stack.push(*child);
                    }
                    _ => return false,
                }
            }
            for child in &group.child_entries {
                match self.entries.get(child) {
                    Some(e) if e.parent == Some(id) => seen_entries += 1,
                    _ => return false,
                }
            }
        }

        seen_groups == self.groups.len() && seen_entries == self.entries.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Index with a UUID root, two nested groups and one entry in the inner one
    pub(crate) fn create_test_index() -> (NodeIndex, NodeId, NodeId, Uuid) {
        let root = Group::new(NodeId::Uuid(Uuid::new_v4()), "Root");
        let root_id = root.id;
        let mut index = NodeIndex::new(root, false);

        let outer = index.add_group_to(Group::new(index.new_group_uuid(), "Outer"), &root_id).unwrap();
        let inner = index.add_group_to(Group::new(index.new_group_uuid(), "Inner"), &outer).unwrap();
        let mut entry = Entry::new(index.new_entry_id());
        entry.set_title("Mail");
        let entry_id = index.add_entry_to(entry, &inner).unwrap();

        (index, outer, inner, entry_id)
    }

    #[test]
    fn test_add_links_both_ways() {
        let (index, outer, inner, entry_id) = create_test_index();
        assert_eq!(index.group(&inner).unwrap().parent, Some(outer));
        assert_eq!(index.group(&outer).unwrap().child_groups, vec![inner]);
        assert_eq!(index.entry(&entry_id).unwrap().parent, Some(inner));
        assert_eq!(index.group_count(), 2);
        assert_eq!(index.entry_count(), 1);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let (mut index, outer, _, _) = create_test_index();
        let root = index.root_id();
        let result = index.add_group_to(Group::new(outer, "Clash"), &root);
        assert!(matches!(result, Err(DatabaseError::DuplicateIdentifier { kind: "group", .. })));
        assert!(index.is_consistent());
    }

    #[test]
    fn test_duplicate_entry_reassigned() {
        let root = Group::new(NodeId::Int(0), "Root");
        let mut index = NodeIndex::new(root, true);
        let group = index.add_group_to(Group::new(NodeId::Int(7), "G"), &NodeId::Int(0)).unwrap();
        let dup_group = index.add_group_to(Group::new(NodeId::Int(7), "G2"), &NodeId::Int(0)).unwrap();
        assert_ne!(group, dup_group);
        assert!(matches!(dup_group, NodeId::Int(_)));

        let id = Uuid::new_v4();
        let a = index.add_entry_to(Entry::new(id), &group).unwrap();
        let b = index.add_entry_to(Entry::new(id), &group).unwrap();
        assert_eq!(a, id);
        assert_ne!(b, id);
        assert_eq!(index.group(&group).unwrap().child_entries, vec![a, b]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_add_to_missing_parent() {
        let (mut index, _, _, _) = create_test_index();
        let missing = NodeId::Uuid(Uuid::new_v4());
        let result = index.add_entry_to(Entry::new(Uuid::new_v4()), &missing);
        assert!(matches!(result, Err(DatabaseError::NodeNotFound(_))));
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_move_group_into_descendant_fails_without_mutation() {
        let (mut index, outer, inner, _) = create_test_index();
        let before = index.clone();

        assert!(matches!(index.move_group(&outer, &inner), Err(DatabaseError::InvalidMove(_))));
        assert!(matches!(index.move_group(&outer, &outer), Err(DatabaseError::InvalidMove(_))));
        let root = index.root_id();
        assert!(matches!(index.move_group(&root, &outer), Err(DatabaseError::InvalidMove(_))));

        assert_eq!(index.group(&outer), before.group(&outer));
        assert_eq!(index.group(&inner), before.group(&inner));
        assert!(index.is_consistent());
    }

    #[test]
    fn test_move_group_and_entry() {
        let (mut index, outer, inner, entry_id) = create_test_index();
        let root = index.root_id();

        index.move_group(&inner, &root).unwrap();
        assert_eq!(index.group(&inner).unwrap().parent, Some(root));
        assert!(index.group(&outer).unwrap().child_groups.is_empty());

        index.move_entry(&entry_id, &outer).unwrap();
        assert_eq!(index.entry(&entry_id).unwrap().parent, Some(outer));
        assert!(index.group(&inner).unwrap().child_entries.is_empty());
        assert!(index.is_consistent());
    }

    #[test]
    fn test_is_contained_in() {
        let (index, outer, inner, entry_id) = create_test_index();
        let root = index.root_id();
        assert!(index.is_contained_in(&NodeRef::Entry(entry_id), &outer));
        assert!(index.is_contained_in(&NodeRef::Entry(entry_id), &root));
        assert!(index.is_contained_in(&NodeRef::Group(inner), &outer));
        assert!(!index.is_contained_in(&NodeRef::Group(outer), &inner));
        assert!(!index.is_contained_in(&NodeRef::Group(outer), &outer));
    }

    #[test]
    fn test_remove_and_undo_keeps_position() {
        let (mut index, outer, _, _) = create_test_index();
        let root = index.root_id();
        let second = index.add_group_to(Group::new(index.new_group_uuid(), "Second"), &root).unwrap();

        let (group, position) = index.remove_group_from(&second).unwrap();
        assert_eq!(position, 1);
        assert!(!index.contains_group(&second));

        index.undo_delete_group_from(group, &root, position).unwrap();
        assert_eq!(index.root().unwrap().child_groups, vec![outer, second]);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let (mut index, _, _, _) = create_test_index();
        let root = index.root_id();
        assert!(matches!(index.remove_group_from(&root), Err(DatabaseError::InvalidMove(_))));
        assert!(index.remove_group_index(&root).is_none());
    }

    #[test]
    fn test_descendants() {
        let (mut index, outer, inner, entry_id) = create_test_index();
        let sibling = index.add_group_to(Group::new(index.new_group_uuid(), "Sibling"), &outer).unwrap();
        let extra = index.add_entry_to(Entry::new(index.new_entry_id()), &outer).unwrap();

        assert_eq!(index.descendant_groups(&outer), vec![inner, sibling]);
        assert_eq!(index.descendant_entries(&outer), vec![extra, entry_id]);
        assert_eq!(index.depth(&outer), 0);
        assert_eq!(index.depth(&inner), 1);
        assert_eq!(index.depth(&index.root_id()), -1);
    }

    #[test]
    fn test_descendants_of_large_tree() {
        let (mut index, outer, inner, _) = create_test_index();
        let mut expected = vec![inner];
        let mut parent = inner;
        for depth in 0..200 {
            let chain = index.add_group_to(Group::new(index.new_group_uuid(), "Chain"), &parent).unwrap();
            expected.push(chain);
            for leaf in 0..20 {
                let title = format!("Leaf {} {}", depth, leaf);
                expected.push(index.add_group_to(Group::new(index.new_group_uuid(), &title), &chain).unwrap());
            }
            parent = chain;
        }

        let mut found = index.descendant_groups(&outer);
        assert_eq!(found.len(), expected.len());
        assert_eq!(found[..2], expected[..2]);
        found.sort_by_key(|id| id.to_string());
        expected.sort_by_key(|id| id.to_string());
        assert_eq!(found, expected);
    }

    #[test]
    fn test_touch_parents() {
        let (mut index, outer, _, entry_id) = create_test_index();
        let old = index.group(&outer).unwrap().times.last_access - chrono::Duration::days(1);
        index.group_mut(&outer).unwrap().times.last_access = old;

        index.touch_entry(&entry_id, false, false);
        assert_eq!(index.group(&outer).unwrap().times.last_access, old);

        index.touch_entry(&entry_id, true, true);
        assert!(index.group(&outer).unwrap().times.last_access > old);
    }
}

//! Group node

use uuid::Uuid;

use super::node::{NodeIcon, NodeId, NodeTimes};

/// Standard icon for folders
pub const ICON_FOLDER: u32 = 48;

/// Group (folder) in the database tree
///
/// Children are held as identifiers; the owning [`super::NodeIndex`] resolves
/// them. Insertion order is the natural display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group identifier
    pub id: NodeId,
    /// Display name
    pub title: String,
    /// Free-form notes (KDBX only)
    pub notes: String,
    /// Icon reference
    pub icon: NodeIcon,
    /// Timestamps
    pub times: NodeTimes,
    /// Parent group, `None` for the root
    pub parent: Option<NodeId>,
    /// Child groups in order
    pub child_groups: Vec<NodeId>,
    /// Child entries in order
    pub child_entries: Vec<Uuid>,
    /// Depth below the root (KDB only, top-level groups are 0)
    pub level: u16,
    /// Group flags (KDB only)
    pub flags: u32,
    /// Expanded in the tree view (KDBX only)
    pub is_expanded: bool,
    /// Searching override, `None` inherits from the parent (KDBX only)
    pub enable_searching: Option<bool>,
    /// Auto-type override, `None` inherits from the parent (KDBX only)
    pub enable_auto_type: Option<bool>,
    /// Default auto-type sequence (KDBX only)
    pub default_auto_type_sequence: String,
    /// Entry shown at the top of the list (KDBX only)
    pub last_top_visible_entry: Option<Uuid>,
}

impl Group {
    /// Create a group with fresh timestamps and no parent
    pub fn new(id: NodeId, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            notes: String::new(),
            icon: NodeIcon::standard(ICON_FOLDER),
            times: NodeTimes::new(),
            parent: None,
            child_groups: Vec::new(),
            child_entries: Vec::new(),
            level: 0,
            flags: 0,
            is_expanded: true,
            enable_searching: None,
            enable_auto_type: None,
            default_auto_type_sequence: String::new(),
            last_top_visible_entry: None,
        }
    }

    /// Whether the group has no children at all
    pub fn is_empty(&self) -> bool {
        self.child_groups.is_empty() && self.child_entries.is_empty()
    }

    /// Update access (and modification) time
    pub fn touch(&mut self, modified: bool) {
        self.times.touch(modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_group() {
        let group = Group::new(NodeId::Int(3), "Internet");
        assert_eq!(group.title, "Internet");
        assert!(group.parent.is_none());
        assert!(group.is_empty());
        assert_eq!(group.icon.standard, ICON_FOLDER);
        assert_eq!(group.enable_searching, None);
    }
}

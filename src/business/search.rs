//! Search functionality

use log::debug;

use super::database::Database;
use crate::SEARCH_RESULTS_TITLE;
use crate::database::{Entry, FormatVersion, Group, NodeId};
use crate::utils::generate_uuid;

/// Entries matching a query, held by a synthetic group outside the tree
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// "Search results" group with its own id, listing the matches
    pub group: Group,
    /// Snapshots of the matching entries
    pub entries: Vec<Entry>,
}

impl Database {
    /// Case-insensitive substring search
    ///
    /// Matches title, username, URL and notes (plus tags on KDBX) of entries in
    /// searchable groups. The recycle bin, the KDB backup group and KDB
    /// meta-stream entries are skipped. At most `max` entries are returned.
    /// Returns `None` when nothing is loaded or the query is empty.
    pub fn search(&self, query: &str, max: usize) -> Option<SearchResult> {
        let engine = self.engine.as_ref()?;
        if query.is_empty() {
            return None;
        }
        let needle = query.to_lowercase();
        let include_tags = engine.version() == FormatVersion::V4;
        let index = engine.index();
        let root = index.root_id();

        let mut entries = Vec::new();
        'groups: for group_id in std::iter::once(root).chain(index.descendant_groups(&root)) {
            if !engine.is_group_searchable(Some(&group_id), true) {
                continue;
            }
            let Some(group) = index.group(&group_id) else {
                continue;
            };
            for entry in group.child_entries.iter().filter_map(|id| index.entry(id)) {
                if entries.len() >= max {
                    break 'groups;
                }
                if !entry.is_meta_stream() && entry.matches(&needle, include_tags) {
                    entries.push(entry.snapshot());
                }
            }
        }

        let mut group = Group::new(NodeId::Uuid(generate_uuid()), SEARCH_RESULTS_TITLE);
        group.child_entries = entries.iter().map(|e| e.id).collect();
        debug!("Search found {} entries", entries.len());
        Some(SearchResult { group, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BACKUP_GROUP_NAME;
    use crate::business::database::tests::{create_test_database, create_test_database_v3};
    use crate::database::NodeRef;

    fn add(db: &mut Database, parent: &NodeId, title: &str, url: &str) -> uuid::Uuid {
        let mut entry = db.create_entry().unwrap();
        entry.set_title(title);
        entry.set_url(url);
        db.add_entry_to(entry, parent).unwrap()
    }

    #[test]
    fn test_search_unloaded_or_empty() {
        assert!(Database::new().search("mail", 10).is_none());
        let db = create_test_database();
        assert!(db.search("", 10).is_none());
    }

    #[test]
    fn test_search_matches_case_insensitively() {
        let mut db = create_test_database();
        let root = db.root_group().unwrap().id;
        let web = db.add_group_to(db.create_group("Web").unwrap(), &root).unwrap();
        let mail = add(&mut db, &web, "Webmail", "https://MAIL.example.com");
        add(&mut db, &web, "Bank", "https://bank.example.com");

        let result = db.search("mail", 10).unwrap();
        assert_eq!(result.group.title, SEARCH_RESULTS_TITLE);
        assert!(db.get_group(&result.group.id).is_none());
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].id, mail);
        assert_eq!(result.group.child_entries, vec![mail]);
    }

    #[test]
    fn test_search_tags_only_on_kdbx() {
        let mut db = create_test_database();
        let root = db.root_group().unwrap().id;
        let mut entry = db.create_entry().unwrap();
        entry.set_title("Router");
        entry.tags.push("Infrastructure".to_string());
        db.add_entry_to(entry, &root).unwrap();
        assert_eq!(db.search("infra", 10).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_search_skips_recycle_bin() {
        let mut db = create_test_database();
        let root = db.root_group().unwrap().id;
        let kept = add(&mut db, &root, "Mail one", "");
        let binned = add(&mut db, &root, "Mail two", "");
        db.recycle(&NodeRef::Entry(binned)).unwrap();

        let result = db.search("mail", 10).unwrap();
        assert_eq!(result.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![kept]);
    }

    #[test]
    fn test_search_skips_v3_backup() {
        let mut db = create_test_database_v3();
        let root = db.root_group().unwrap().id;
        let backup = db.add_group_to(db.create_group(BACKUP_GROUP_NAME).unwrap(), &root).unwrap();
        let general = db.add_group_to(db.create_group("General").unwrap(), &root).unwrap();
        add(&mut db, &backup, "Old mail", "");
        let live = add(&mut db, &general, "Mail", "");

        let result = db.search("MAIL", 10).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].id, live);
    }

    #[test]
    fn test_search_respects_max() {
        let mut db = create_test_database();
        let root = db.root_group().unwrap().id;
        for i in 0..5 {
            add(&mut db, &root, &format!("Account {}", i), "");
        }
        assert_eq!(db.search("account", 3).unwrap().entries.len(), 3);
        assert!(db.search("account", 0).unwrap().entries.is_empty());
    }
}

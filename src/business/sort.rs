//! Child ordering for tree views

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::database::{NodeId, NodeRef, NodeTimes};

/// Sort key for a group's children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortNodeEnum {
    /// Order stored in the database
    #[default]
    Db,
    Title,
    Username,
    CreationTime,
    LastModifyTime,
    LastAccessTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOptions {
    pub kind: SortNodeEnum,
    pub ascending: bool,
    /// Keep groups ahead of entries regardless of direction
    pub groups_before: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            kind: SortNodeEnum::Db,
            ascending: true,
            groups_before: true,
        }
    }
}

struct SortKey<'a> {
    node: NodeRef,
    position: usize,
    title: String,
    username: String,
    times: &'a NodeTimes,
}

impl SortKey<'_> {
    fn is_group(&self) -> bool {
        matches!(self.node, NodeRef::Group(_))
    }

    fn time(&self, kind: SortNodeEnum) -> Option<DateTime<Utc>> {
        match kind {
            SortNodeEnum::CreationTime => Some(self.times.creation),
            SortNodeEnum::LastModifyTime => Some(self.times.last_modification),
            SortNodeEnum::LastAccessTime => Some(self.times.last_access),
            _ => None,
        }
    }

    fn compare(&self, other: &Self, kind: SortNodeEnum) -> Ordering {
        let primary = match kind {
            SortNodeEnum::Db => Ordering::Equal,
            SortNodeEnum::Title => self.title.cmp(&other.title),
            SortNodeEnum::Username => self.username.cmp(&other.username),
            _ => self.time(kind).cmp(&other.time(kind)),
        };
        primary.then(self.position.cmp(&other.position))
    }
}

impl Database {
    /// Children of a group, groups then entries in stored order, sorted
    /// per `options`
    ///
    /// Titles and usernames compare case-insensitively; ties keep the stored
    /// order. Unknown groups yield nothing.
    pub fn sorted_children(&self, id: &NodeId, options: SortOptions) -> Vec<NodeRef> {
        let Some(index) = self.engine.as_ref().map(|e| e.index()) else {
            return Vec::new();
        };
        let Some(group) = index.group(id) else {
            return Vec::new();
        };

        let groups = group.child_groups.iter().filter_map(|g| index.group(g)).map(|g| {
            (NodeRef::Group(g.id), g.title.to_lowercase(), String::new(), &g.times)
        });
        let entries = group.child_entries.iter().filter_map(|e| index.entry(e)).map(|e| {
            (NodeRef::Entry(e.id), e.title().to_lowercase(), e.username().to_lowercase(), &e.times)
        });
        let mut keys: Vec<SortKey> = groups
            .chain(entries)
            .enumerate()
            .map(|(position, (node, title, username, times))| SortKey {
                node,
                position,
                title,
                username,
                times,
            })
            .collect();

        keys.sort_by(|a, b| {
            if options.groups_before && a.is_group() != b.is_group() {
                return b.is_group().cmp(&a.is_group());
            }
            let ord = a.compare(b, options.kind);
            if options.ascending { ord } else { ord.reverse() }
        });
        keys.into_iter().map(|k| k.node).collect()
    }
}

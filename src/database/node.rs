//! Node identifiers, references and timestamps shared by groups and entries

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::{never_expires, now};

/// Group or entry identifier
///
/// KDB groups use 32-bit integers; KDB entries and every KDBX node use UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeId {
    Int(u32),
    Uuid(Uuid),
}

impl NodeId {
    pub fn as_int(&self) -> Option<u32> {
        match self {
            NodeId::Int(id) => Some(*id),
            NodeId::Uuid(_) => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            NodeId::Int(_) => None,
            NodeId::Uuid(uuid) => Some(*uuid),
        }
    }
}

impl fmt::Display for NodeId {
    /// Integers in decimal, UUIDs as 32 uppercase hex digits
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Int(id) => write!(f, "{}", id),
            NodeId::Uuid(uuid) => write!(f, "{}", uuid.simple().to_string().to_uppercase()),
        }
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId::Int(id)
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        NodeId::Uuid(uuid)
    }
}

/// Typed handle to a node in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Group(NodeId),
    Entry(Uuid),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Group(id) => write!(f, "group {}", id),
            NodeRef::Entry(id) => write!(f, "entry {}", NodeId::Uuid(*id)),
        }
    }
}

/// Icon reference: a standard icon index plus an optional custom icon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeIcon {
    /// Standard icon index (0 = key)
    pub standard: u32,
    /// Custom icon UUID (KDBX only)
    pub custom: Option<Uuid>,
}

impl NodeIcon {
    pub fn standard(id: u32) -> Self {
        Self { standard: id, custom: None }
    }
}

/// Timestamps and usage counters shared by groups and entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimes {
    /// Creation time
    pub creation: DateTime<Utc>,
    /// Last modification time
    pub last_modification: DateTime<Utc>,
    /// Last access time
    pub last_access: DateTime<Utc>,
    /// Expiry time (only meaningful when `expires` is set)
    pub expiry: DateTime<Utc>,
    /// Whether the node expires
    pub expires: bool,
    /// Usage counter (KDBX only)
    pub usage_count: u64,
    /// Time of the last move to another parent (KDBX only)
    pub location_changed: DateTime<Utc>,
}

impl NodeTimes {
    /// All timestamps set to now, never expiring
    pub fn new() -> Self {
        let t = now();
        Self {
            creation: t,
            last_modification: t,
            last_access: t,
            expiry: never_expires(),
            expires: false,
            usage_count: 0,
            location_changed: t,
        }
    }

    /// Record an access, and a modification if `modified`
    pub fn touch(&mut self, modified: bool) {
        let t = now();
        self.last_access = t;
        if modified {
            self.last_modification = t;
        }
    }

    /// Whether the node has expired at `at`
    pub fn is_expired_at(&self, at: &DateTime<Utc>) -> bool {
        self.expires && self.expiry <= *at
    }
}

impl Default for NodeTimes {
    fn default() -> Self {
        Self::new()
    }
}

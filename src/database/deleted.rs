//! Tombstones and custom icons kept by KDBX databases

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::now;

/// Record of a deleted node
///
/// Two tombstones are equal when they name the same node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedObject {
    /// Identifier of the deleted node
    pub uuid: Uuid,
    /// Time of deletion
    pub deletion_time: DateTime<Utc>,
}

impl DeletedObject {
    /// Tombstone stamped with the current time
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid, deletion_time: now() }
    }
}

impl PartialEq for DeletedObject {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for DeletedObject {}

/// Custom icon image
#[derive(Debug, Clone)]
pub struct CustomIcon {
    /// Icon identifier
    pub uuid: Uuid,
    /// PNG bytes
    pub data: Vec<u8>,
    /// Optional display name
    pub name: Option<String>,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
}

impl PartialEq for CustomIcon {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for CustomIcon {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_object_equality_by_uuid() {
        let uuid = Uuid::new_v4();
        let a = DeletedObject::new(uuid);
        let mut b = DeletedObject::new(uuid);
        b.deletion_time = b.deletion_time - chrono::Duration::days(3);
        assert_eq!(a, b);
        assert_ne!(a, DeletedObject::new(Uuid::new_v4()));
    }

    #[test]
    fn test_deleted_object_serde() {
        let obj = DeletedObject::new(Uuid::nil());
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["uuid"], "00000000-0000-0000-0000-000000000000");
        assert!(json["deletion_time"].is_string());
    }

    #[test]
    fn test_custom_icon_equality_by_uuid() {
        let uuid = Uuid::new_v4();
        let a = CustomIcon { uuid, data: vec![1], name: None, last_modified: None };
        let b = CustomIcon { uuid, data: vec![2], name: Some("x".into()), last_modified: None };
        assert_eq!(a, b);
    }
}

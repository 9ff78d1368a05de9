//! In-memory database model
//!
//! Nodes live in a [`NodeIndex`] arena keyed by identifier; parent and child
//! links are identifiers only. [`DatabaseV3`] and [`DatabaseV4`] add the
//! format-specific rules on top, and [`Engine`] selects between them.

pub mod binary;
pub mod config;
pub mod deleted;
pub mod engine;
pub mod entry;
pub mod group;
pub mod index;
pub mod node;
pub mod protected;
pub mod v3;
pub mod v4;

pub use binary::{BinaryAttachment, BinaryId, BinaryPool};
pub use config::{Compression, DatabaseConfig};
pub use deleted::{CustomIcon, DeletedObject};
pub use engine::{Engine, FormatVersion};
pub use entry::{AutoType, AutoTypeAssociation, Entry};
pub use group::Group;
pub use index::NodeIndex;
pub use node::{NodeIcon, NodeId, NodeRef, NodeTimes};
pub use protected::ProtectedValue;
pub use v3::DatabaseV3;
pub use v4::{DatabaseV4, MemoryProtection, MetaV4};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, nothing loaded
    Empty,
    /// Importer is filling the index
    Loading,
    /// Ready for use
    Loaded,
    /// Secrets wiped; terminal
    Cleared,
}

//! Business logic layer
//!
//! [`Database`] is the facade callers hold. Its operations are split by
//! concern across the submodules, each adding an `impl Database` block.

pub mod actions;
pub mod database;
pub mod nodes;
pub mod search;
pub mod sort;

pub use actions::{ActionNodeValues, ActionResult, NodeAction, NodeSnapshot};
pub use database::Database;
pub use nodes::{DeletedNodes, RemovedNode};
pub use search::SearchResult;
pub use sort::{SortNodeEnum, SortOptions};

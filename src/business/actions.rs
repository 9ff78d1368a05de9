//! Node actions
//!
//! An action is a pure mutation of the tree. [`Database::apply_action`] runs
//! it and reports before/after snapshots; [`Database::run_action`] also saves
//! and puts the tree back when the save fails.

use std::path::Path;

use log::{info, warn};
use uuid::Uuid;

use super::database::Database;
use super::nodes::DeletedNodes;
use crate::database::{Entry, Group, NodeId, NodeRef};
use crate::error::{DatabaseError, Result};
use crate::format::ProgressSink;

/// Mutation requested by a caller
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAction {
    AddEntry { entry: Entry, parent: NodeId },
    AddGroup { group: Group, parent: NodeId },
    /// Replace the content of the entry with the same id
    UpdateEntry { entry: Entry },
    MoveNodes { nodes: Vec<NodeRef>, parent: NodeId },
    /// Copy entries; groups cannot be copied
    CopyNodes { nodes: Vec<NodeRef>, parent: NodeId },
    /// Recycle where possible, delete permanently otherwise
    DeleteNodes { nodes: Vec<NodeRef> },
}

/// Copy of a node taken while an action ran
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSnapshot {
    Group(Group),
    Entry(Entry),
}

impl NodeSnapshot {
    pub fn node(&self) -> NodeRef {
        match self {
            NodeSnapshot::Group(g) => NodeRef::Group(g.id),
            NodeSnapshot::Entry(e) => NodeRef::Entry(e.id),
        }
    }
}

/// Nodes as they were before and after an action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionNodeValues {
    pub old_nodes: Vec<NodeSnapshot>,
    pub new_nodes: Vec<NodeSnapshot>,
}

/// Outcome of [`Database::run_action`]
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    /// Error message when `success` is false
    pub message: Option<String>,
    pub values: ActionNodeValues,
}

impl ActionResult {
    fn failed(error: &DatabaseError, values: ActionNodeValues) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            values,
        }
    }
}

/// How to undo one step of an applied action
enum Revert {
    RemoveEntry(Uuid),
    RemoveGroup(NodeId),
    RestoreEntry(Entry),
    MoveBack(NodeRef, NodeId),
    Unrecycle(NodeRef, NodeId),
    Undelete(DeletedNodes),
}

impl Database {
    fn snapshot(&self, node: &NodeRef) -> Option<NodeSnapshot> {
        match node {
            NodeRef::Group(id) => self.get_group(id).cloned().map(NodeSnapshot::Group),
            NodeRef::Entry(id) => self.get_entry(id).cloned().map(NodeSnapshot::Entry),
        }
    }

    fn require_snapshot(&self, node: &NodeRef) -> Result<NodeSnapshot> {
        self.snapshot(node)
            .ok_or_else(|| DatabaseError::NodeNotFound(node.to_string()))
    }

    fn parent_of(&self, node: &NodeRef) -> Result<NodeId> {
        self.require_engine()?
            .index()
            .parent_of(node)
            .ok_or_else(|| DatabaseError::NodeNotFound(node.to_string()))
    }

    /// Apply an action and return old and new node snapshots
    ///
    /// A multi-node action that fails part way is undone before the error is
    /// returned.
    pub fn apply_action(&mut self, action: NodeAction) -> Result<ActionNodeValues> {
        self.apply(action).map(|(values, _)| values)
    }

    /// Apply an action, then save to `save_target` if given
    ///
    /// When the save fails the action is reverted and the result carries the
    /// save error. Only this action layer reverts; a plain
    /// [`Database::save_file`] never rolls back tree changes.
    pub fn run_action(
        &mut self,
        action: NodeAction,
        save_target: Option<&Path>,
        progress: &mut dyn ProgressSink,
    ) -> ActionResult {
        let (values, steps) = match self.apply(action) {
            Ok(applied) => applied,
            Err(e) => return ActionResult::failed(&e, ActionNodeValues::default()),
        };
        if let Some(path) = save_target {
            if let Err(e) = self.save_file(path, progress) {
                if let Err(revert) = self.revert(steps) {
                    warn!("Could not revert action after failed save: {}", revert);
                }
                return ActionResult::failed(&e, values);
            }
            info!("Action saved to {}", path.display());
        }
        ActionResult {
            success: true,
            message: None,
            values,
        }
    }

    fn apply(&mut self, action: NodeAction) -> Result<(ActionNodeValues, Vec<Revert>)> {
        let mut values = ActionNodeValues::default();
        let mut steps = Vec::new();

        match action {
            NodeAction::AddEntry { entry, parent } => {
                let id = self.add_entry_to(entry, &parent)?;
                steps.push(Revert::RemoveEntry(id));
                values.new_nodes.push(self.require_snapshot(&NodeRef::Entry(id))?);
            }
            NodeAction::AddGroup { group, parent } => {
                let id = self.add_group_to(group, &parent)?;
                steps.push(Revert::RemoveGroup(id));
                values.new_nodes.push(self.require_snapshot(&NodeRef::Group(id))?);
            }
            NodeAction::UpdateEntry { entry } => {
                let id = entry.id;
                let old = self.update_entry(entry)?;
                values.old_nodes.push(NodeSnapshot::Entry(old.clone()));
                steps.push(Revert::RestoreEntry(old));
                values.new_nodes.push(self.require_snapshot(&NodeRef::Entry(id))?);
            }
            NodeAction::MoveNodes { nodes, parent } => {
                if let Err(e) = self.move_nodes(&nodes, &parent, &mut values, &mut steps) {
                    self.undo_partial(steps);
                    return Err(e);
                }
            }
            NodeAction::CopyNodes { nodes, parent } => {
                if let Err(e) = self.copy_nodes(&nodes, &parent, &mut values, &mut steps) {
                    self.undo_partial(steps);
                    return Err(e);
                }
            }
            NodeAction::DeleteNodes { nodes } => {
                if let Err(e) = self.delete_nodes(&nodes, &mut values, &mut steps) {
                    self.undo_partial(steps);
                    return Err(e);
                }
            }
        }
        Ok((values, steps))
    }

    fn move_nodes(
        &mut self,
        nodes: &[NodeRef],
        parent: &NodeId,
        values: &mut ActionNodeValues,
        steps: &mut Vec<Revert>,
    ) -> Result<()> {
        for node in nodes {
            let old = self.require_snapshot(node)?;
            let original_parent = self.parent_of(node)?;
            match node {
                NodeRef::Group(id) => self.move_group(id, parent)?,
                NodeRef::Entry(id) => self.move_entry(id, parent)?,
            }
            steps.push(Revert::MoveBack(*node, original_parent));
            values.old_nodes.push(old);
            values.new_nodes.push(self.require_snapshot(node)?);
        }
        Ok(())
    }

    fn copy_nodes(
        &mut self,
        nodes: &[NodeRef],
        parent: &NodeId,
        values: &mut ActionNodeValues,
        steps: &mut Vec<Revert>,
    ) -> Result<()> {
        if let Some(group) = nodes.iter().find(|n| matches!(n, NodeRef::Group(_))) {
            return Err(DatabaseError::InvalidMove(format!("{} cannot be copied", group)));
        }
        for node in nodes {
            if let NodeRef::Entry(id) = node {
                let old = self.require_snapshot(node)?;
                let copy = self.copy_entry(id, parent)?;
                steps.push(Revert::RemoveEntry(copy));
                values.old_nodes.push(old);
                values.new_nodes.push(self.require_snapshot(&NodeRef::Entry(copy))?);
            }
        }
        Ok(())
    }

    fn delete_nodes(
        &mut self,
        nodes: &[NodeRef],
        values: &mut ActionNodeValues,
        steps: &mut Vec<Revert>,
    ) -> Result<()> {
        // Nodes inside another selected group go along with that group
        let index = self.require_engine()?.index();
        let selected: Vec<NodeRef> = nodes
            .iter()
            .filter(|node| {
                !nodes.iter().any(|other| match other {
                    NodeRef::Group(g) => other != *node && index.is_contained_in(node, g),
                    NodeRef::Entry(_) => false,
                })
            })
            .copied()
            .collect();

        for node in &selected {
            let Some(old) = self.snapshot(node) else {
                continue;
            };
            if self.can_recycle(node) {
                let original_parent = self.parent_of(node)?;
                self.recycle(node)?;
                steps.push(Revert::Unrecycle(*node, original_parent));
                values.new_nodes.push(self.require_snapshot(node)?);
            } else {
                let deleted = match node {
                    NodeRef::Group(id) => self.delete_group(id)?,
                    NodeRef::Entry(id) => self.delete_entry(id)?,
                };
                steps.push(Revert::Undelete(deleted));
            }
            values.old_nodes.push(old);
        }
        Ok(())
    }

    fn undo_partial(&mut self, steps: Vec<Revert>) {
        if let Err(e) = self.revert(steps) {
            warn!("Could not undo partially applied action: {}", e);
        }
    }

    /// Undo applied steps, newest first
    fn revert(&mut self, steps: Vec<Revert>) -> Result<()> {
        for step in steps.into_iter().rev() {
            match step {
                Revert::RemoveEntry(id) => {
                    self.require_engine_mut()?.index_mut().remove_entry_from(&id)?;
                }
                Revert::RemoveGroup(id) => {
                    self.require_engine_mut()?.index_mut().remove_group_from(&id)?;
                }
                Revert::RestoreEntry(old) => self.restore_entry(old)?,
                Revert::MoveBack(NodeRef::Group(id), parent) => self.move_group(&id, &parent)?,
                Revert::MoveBack(NodeRef::Entry(id), parent) => self.move_entry(&id, &parent)?,
                Revert::Unrecycle(node, parent) => self.undo_recycle(&node, &parent)?,
                Revert::Undelete(deleted) => self.undo_delete(deleted)?,
            }
        }
        Ok(())
    }
}

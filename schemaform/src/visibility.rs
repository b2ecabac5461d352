//! Field visibility and requiredness, with an audit trail.
//!
//! `show` reveals a container and every ancestor container up to the root,
//! `hide` affects only the targeted container. Each call appends to the
//! field's [`FieldVisibilityRecord`], which is never edited or truncated.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    event::{EventBus, FormEvent},
    tree::{ATTR_REQUIRED, ATTR_SCHEMA_PATH, CLASS_HIDDEN, CLASS_REQUIRED_BADGE, FieldTree, NodeId},
};

/// A show/hide action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityAction {
    Show,
    Hide,
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibilityEntry {
    pub action: VisibilityAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only visibility history of one field path.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FieldVisibilityRecord {
    entries: Vec<VisibilityEntry>,
}

impl FieldVisibilityRecord {
    fn push(&mut self, action: VisibilityAction, reason: &str) {
        self.entries.push(VisibilityEntry {
            action,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// The full history, oldest first.
    pub fn entries(&self) -> &[VisibilityEntry] {
        &self.entries
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> &[VisibilityEntry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    /// The most recent entry.
    pub fn last(&self) -> Option<&VisibilityEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies visibility and requiredness to field containers.
#[derive(Debug, Clone, Default)]
pub struct VisibilityController {
    records: BTreeMap<String, FieldVisibilityRecord>,
}

impl VisibilityController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reveal the container at `path` and its ancestor containers.
    ///
    /// A missing container is a silent no-op.
    pub fn show<T: FieldTree>(&mut self, tree: &mut T, bus: &EventBus, path: &str, reason: &str) {
        let Some(node) = tree.find_by_path(path) else {
            return;
        };
        tree.remove_class(node, CLASS_HIDDEN);
        self.record(bus, path, VisibilityAction::Show, reason);

        let revealed = format!("revealed by {path}");
        let mut visited = HashSet::from([node]);
        let mut current = tree.parent(node);
        while let Some(ancestor) = current {
            if !visited.insert(ancestor) {
                warn!("cycle in container ancestry above {path}");
                break;
            }
            if let Some(ancestor_path) = tree.get_attribute(ancestor, ATTR_SCHEMA_PATH)
                && tree.has_class(ancestor, CLASS_HIDDEN)
            {
                tree.remove_class(ancestor, CLASS_HIDDEN);
                self.record(bus, &ancestor_path, VisibilityAction::Show, &revealed);
            }
            current = tree.parent(ancestor);
        }
    }

    /// Hide the container at `path` only.
    pub fn hide<T: FieldTree>(&mut self, tree: &mut T, bus: &EventBus, path: &str, reason: &str) {
        let Some(node) = tree.find_by_path(path) else {
            return;
        };
        tree.add_class(node, CLASS_HIDDEN);
        self.record(bus, path, VisibilityAction::Hide, reason);
    }

    fn record(&mut self, bus: &EventBus, path: &str, action: VisibilityAction, reason: &str) {
        debug!("{action:?} {path}: {reason}");
        self.records
            .entry(path.to_string())
            .or_default()
            .push(action, reason);
        let field = path.to_string();
        let reason = reason.to_string();
        bus.emit(&match action {
            VisibilityAction::Show => FormEvent::FieldShow { field, reason },
            VisibilityAction::Hide => FormEvent::FieldHide { field, reason },
        });
    }

    /// Mark every input of the container required and reveal its badge.
    pub fn require<T: FieldTree>(&self, tree: &mut T, path: &str) {
        self.set_required(tree, path, true);
    }

    /// Clear the required marker of every input of the container.
    pub fn unrequire<T: FieldTree>(&self, tree: &mut T, path: &str) {
        self.set_required(tree, path, false);
    }

    fn set_required<T: FieldTree>(&self, tree: &mut T, path: &str, required: bool) {
        let Some(node) = tree.find_by_path(path) else {
            return;
        };
        for n in tree.descendants(node) {
            if tree.is_input(n) {
                if required {
                    tree.set_attribute(n, ATTR_REQUIRED, "true");
                } else {
                    tree.remove_attribute(n, ATTR_REQUIRED);
                }
            } else if tree.has_class(n, CLASS_REQUIRED_BADGE) {
                if required {
                    tree.remove_class(n, CLASS_HIDDEN);
                } else {
                    tree.add_class(n, CLASS_HIDDEN);
                }
            }
        }
    }

    /// Returns `None` if there is no container for `path`; otherwise whether
    /// the container and all its ancestors are unhidden.
    pub fn is_visible<T: FieldTree>(&self, tree: &T, path: &str) -> Option<bool> {
        let node = tree.find_by_path(path)?;
        Some(!self_or_ancestor_hidden(tree, node))
    }

    /// Returns `None` if there is no container for `path`; otherwise whether
    /// any of its inputs carries the required marker.
    pub fn is_required<T: FieldTree>(&self, tree: &T, path: &str) -> Option<bool> {
        let node = tree.find_by_path(path)?;
        Some(
            tree.inputs_within(node)
                .into_iter()
                .any(|n| tree.get_attribute(n, ATTR_REQUIRED).is_some()),
        )
    }

    /// Returns true if the container itself carries the hidden marker.
    pub fn is_hidden_marker<T: FieldTree>(&self, tree: &T, path: &str) -> Option<bool> {
        let node = tree.find_by_path(path)?;
        Some(tree.has_class(node, CLASS_HIDDEN))
    }

    /// History of one field path.
    pub fn history(&self, path: &str) -> Option<&FieldVisibilityRecord> {
        self.records.get(path)
    }

    /// Every recorded path with its history.
    pub fn records(&self) -> &BTreeMap<String, FieldVisibilityRecord> {
        &self.records
    }

    /// Total number of history entries across all paths.
    pub fn total_entries(&self) -> usize {
        self.records.values().map(FieldVisibilityRecord::len).sum()
    }
}

fn self_or_ancestor_hidden<T: FieldTree>(tree: &T, node: NodeId) -> bool {
    let mut current = Some(node);
    let mut seen = HashSet::new();
    while let Some(n) = current {
        if !seen.insert(n) {
            break;
        }
        if tree.has_class(n, CLASS_HIDDEN) {
            return true;
        }
        current = tree.parent(n);
    }
    false
}

#![forbid(unsafe_code)]

//! The effect list: nodes with pending side effects in completion order.
//!
//! Nodes append themselves when they complete, so the list is post-order:
//! every entry precedes the entries of its ancestors. Deletions are
//! appended while the parent reconciles its children, which places them
//! ahead of every entry the parent's new children produce. When a boundary
//! captures a throw, the list is truncated back to the length it had when
//! the boundary began, dropping effects of the discarded subtree.

use fiber_core::EffectFlags;

use crate::store::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectTarget {
    /// The node's own work buffer carries the effects.
    Node(NodeId),
    /// Remove `node`'s subtree from under `parent`.
    Deletion { node: NodeId, parent: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EffectEntry {
    pub(crate) target: EffectTarget,
    pub(crate) flags: EffectFlags,
}

impl EffectEntry {
    pub(crate) fn node(&self) -> NodeId {
        match self.target {
            EffectTarget::Node(node) | EffectTarget::Deletion { node, .. } => node,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct EffectList {
    entries: Vec<EffectEntry>,
}

impl EffectList {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push_node(&mut self, node: NodeId, flags: EffectFlags) {
        self.entries.push(EffectEntry {
            target: EffectTarget::Node(node),
            flags,
        });
    }

    pub(crate) fn push_deletion(&mut self, node: NodeId, parent: NodeId) {
        self.entries.push(EffectEntry {
            target: EffectTarget::Deletion { node, parent },
            flags: EffectFlags::DELETION,
        });
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub(crate) fn entries(&self) -> &[EffectEntry] {
        &self.entries
    }
}

#![forbid(unsafe_code)]

//! Child reconciliation.
//!
//! New child elements are matched against the committed children by key:
//! an explicit [`Key`] when the element has one, its position in the element
//! list otherwise. A match of the same type is reused with the new props;
//! everything else is created fresh. Committed children left unmatched, or
//! matched with a different type, are deleted.
//!
//! Siblings sharing a key are matched in order: the first new child with
//! that key takes the first old one, and so on.
//!
//! Moves are detected the usual way: walking the new list, a reused child
//! whose old position is left of the rightmost old position reused so far
//! has moved and is flagged for placement.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use fiber_core::EffectFlags;

use crate::element::{Element, ElementNode, Key, WorkKind};
use crate::fiber::Fiber;
use crate::host::HostBinding;
use crate::reconciler::Reconciler;
use crate::store::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(Key),
    Implicit(usize),
}

impl<H: HostBinding> Reconciler<H> {
    /// Make `elements` the work children of `parent`. Returns the first one.
    pub(crate) fn reconcile_children(
        &mut self,
        parent: NodeId,
        elements: &[Element],
    ) -> Option<NodeId> {
        let hydrating_root =
            parent == self.root && self.pass.as_ref().is_some_and(|p| p.is_hydrating());
        // Portal content is placed even when the portal itself is new.
        let portal = self.store.work(parent).kind() == WorkKind::Portal;
        let track = (self.store.is_committed(parent) || portal) && !hydrating_root;

        let old_children: Vec<NodeId> = self
            .store
            .current(parent)
            .map(|c| c.children.clone())
            .unwrap_or_default();
        let mut existing: AHashMap<ChildKey, VecDeque<NodeId>> =
            AHashMap::with_capacity(old_children.len());
        for &old in &old_children {
            if let Some(fiber) = self.store.current(old) {
                let key = match &fiber.key {
                    Some(key) => ChildKey::Explicit(key.clone()),
                    None => ChildKey::Implicit(fiber.index),
                };
                existing.entry(key).or_default().push_back(old);
            }
        }

        let mut children = Vec::with_capacity(elements.len());
        let mut last_placed = 0;
        for (index, element) in elements.iter().enumerate() {
            let Some(ty) = element.node.element_type() else {
                continue;
            };
            let key = element
                .key
                .clone()
                .map_or(ChildKey::Implicit(index), ChildKey::Explicit);
            let matched = existing.get_mut(&key).and_then(VecDeque::pop_front);
            let reusable = matched.and_then(|old| {
                let fiber = self.store.current(old)?;
                (fiber.ty == ty).then_some((old, fiber.index))
            });
            let child = match reusable {
                Some((old, old_index)) => {
                    let wip = self.store.prepare(old);
                    wip.pending_props = element.node.clone();
                    wip.key = element.key.clone();
                    wip.index = index;
                    if let ElementNode::Host(host) = &*element.node {
                        wip.node_ref = host.node_ref.clone();
                    }
                    if track && old_index < last_placed {
                        wip.flags |= EffectFlags::PLACEMENT;
                    } else {
                        last_placed = old_index;
                    }
                    old
                }
                None => {
                    if let Some(old) = matched {
                        self.delete_child(parent, old);
                    }
                    let mut fiber = Fiber::new(ty, element.key.clone(), element.node.clone());
                    fiber.index = index;
                    if track {
                        fiber.flags |= EffectFlags::PLACEMENT;
                    }
                    let id = self.store.create(Some(parent), fiber);
                    if let Some(pass) = self.pass.as_mut() {
                        pass.created.push(id);
                    }
                    id
                }
            };
            self.store.work_mut(child).position = children.len();
            children.push(child);
        }

        let leftover: AHashSet<NodeId> = existing.into_values().flatten().collect();
        if !leftover.is_empty() {
            for old in old_children {
                if leftover.contains(&old) {
                    self.delete_child(parent, old);
                }
            }
        }

        let first = children.first().copied();
        self.store.work_mut(parent).children = children;
        first
    }

    fn delete_child(&mut self, parent: NodeId, old: NodeId) {
        let wip = self.store.work_mut(parent);
        wip.deletions.push(old);
        wip.flags |= EffectFlags::CHILD_DELETION;
        if let Some(pass) = self.pass.as_mut() {
            pass.effects.push_deletion(old, parent);
        }
    }
}

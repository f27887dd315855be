#![forbid(unsafe_code)]

//! Completing work on a node.
//!
//! Completion runs bottom-up. Host nodes create their instances here (the
//! children already exist, so they are appended right away) or compute the
//! prop diff an update needs. Every node then bubbles its children's lanes
//! and effect flags, and appends itself to the effect list if it has work
//! for the commit.
//!
//! While hydrating, new host nodes claim pre-existing host instances in
//! document order instead of creating them. Any mismatch fails the pass,
//! which is then rendered again from scratch.

use std::rc::Rc;

use fiber_core::{EffectFlags, Lane, Lanes, PropDiff, Props};

use crate::element::{ElementNode, WorkKind};
use crate::error::HostError;
use crate::host::HostBinding;
use crate::reconciler::Reconciler;
use crate::store::NodeId;

impl<H: HostBinding> Reconciler<H> {
    pub(crate) fn complete_work(&mut self, id: NodeId) -> Result<(), HostError> {
        match self.store.work(id).kind() {
            WorkKind::HostElement => self.complete_host_element(id)?,
            WorkKind::HostText => self.complete_text(id)?,
            WorkKind::Portal => self.complete_portal(id)?,
            WorkKind::Offscreen => self.complete_offscreen(id),
            WorkKind::SuspenseBoundary => self.complete_suspense(id),
            WorkKind::HostRoot => self.complete_root(),
            WorkKind::FunctionComponent | WorkKind::ClassComponent | WorkKind::Fragment => {}
        }
        if self.store.work(id).kind() != WorkKind::Offscreen {
            self.bubble_properties(id);
        }
        let flags = self.store.work(id).flags;
        if flags.intersects(EffectFlags::ENTRY_MASK) {
            if let Some(pass) = self.pass.as_mut() {
                pass.effects.push_node(id, flags);
            }
        }
        Ok(())
    }

    /// Fold the children's lanes and flags into `id`.
    fn bubble_properties(&mut self, id: NodeId) {
        let mut child_lanes = Lanes::empty();
        let mut subtree_flags = EffectFlags::empty();
        for &child in &self.store.work(id).children {
            let fiber = self.store.work(child);
            child_lanes |= fiber.lanes | fiber.child_lanes;
            if self.store.in_pass(child) {
                subtree_flags |= fiber.flags | fiber.subtree_flags;
            }
        }
        let wip = self.store.work_mut(id);
        wip.child_lanes = child_lanes;
        wip.subtree_flags = subtree_flags;
    }

    fn complete_host_element(&mut self, id: NodeId) -> Result<(), HostError> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Host(element) = &*props else {
            return Ok(());
        };
        if let Some(current) = self.store.current(id) {
            let diff = match &*current.memoized_props {
                ElementNode::Host(old) => PropDiff::between(&old.props, &element.props),
                _ => None,
            };
            let ref_changed = match (&current.node_ref, &element.node_ref) {
                (Some(old), Some(new)) => !old.same_as(new),
                (None, None) => false,
                _ => true,
            };
            let wip = self.store.work_mut(id);
            if let Some(diff) = diff {
                wip.update_payload = Some(diff);
                wip.flags |= EffectFlags::UPDATE;
            }
            if ref_changed {
                wip.flags |= EffectFlags::REF;
            }
            return Ok(());
        }

        let claimed = self
            .pass
            .as_ref()
            .is_some_and(|p| p.hydrated.contains(&id));
        if claimed {
            self.exit_hydrated_instance();
        } else {
            let instance = self.host.create_instance(&element.tag, &element.props)?;
            self.append_all_children(&instance, id)?;
            if self
                .host
                .finalize_initial_children(&instance, &element.tag, &element.props)
            {
                self.store.work_mut(id).flags |= EffectFlags::HOST_MOUNT;
            }
            self.instances.insert(id, instance);
        }
        if element.node_ref.is_some() {
            self.store.work_mut(id).flags |= EffectFlags::REF;
        }
        Ok(())
    }

    fn complete_text(&mut self, id: NodeId) -> Result<(), HostError> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Text(text) = &*props else {
            return Ok(());
        };
        if let Some(current) = self.store.current(id) {
            let changed = match &*current.memoized_props {
                ElementNode::Text(old) => old != text,
                _ => true,
            };
            if changed {
                self.store.work_mut(id).flags |= EffectFlags::UPDATE;
            }
            return Ok(());
        }
        let claimed = self
            .pass
            .as_ref()
            .is_some_and(|p| p.hydrated.contains(&id));
        if !claimed {
            let instance = self.host.create_text_instance(text)?;
            self.instances.insert(id, instance);
        }
        Ok(())
    }

    fn complete_portal(&mut self, id: NodeId) -> Result<(), HostError> {
        if self.instances.contains_key(&id) {
            return Ok(());
        }
        let container = match &self.store.work(id).ty {
            crate::element::ElementType::Portal(target) => self.host.portal_container(target)?,
            _ => return Ok(()),
        };
        self.instances.insert(id, container);
        Ok(())
    }

    fn complete_offscreen(&mut self, id: NodeId) {
        if let Some(pass) = self.pass.as_mut() {
            if pass.lane_overrides.last().is_some_and(|(node, _)| *node == id) {
                pass.lane_overrides.pop();
            }
        }
        let (hidden, deferred) = match &*self.store.work(id).pending_props {
            ElementNode::Offscreen {
                hidden, deferred, ..
            } => (*hidden, *deferred),
            _ => (false, false),
        };
        let was_hidden = self.store.current(id).map(|c| c.hidden);
        let rendered_children = self
            .store
            .work(id)
            .children
            .iter()
            .any(|child| self.store.in_pass(*child));
        let toggled = was_hidden.map_or(hidden, |was| was != hidden);

        self.bubble_properties(id);
        let wip = self.store.work_mut(id);
        if toggled || (hidden && rendered_children) {
            wip.flags |= EffectFlags::VISIBILITY;
        }
        if hidden {
            let below = std::mem::take(&mut wip.child_lanes);
            if deferred && !below.is_empty() {
                wip.lanes |= Lane::OFFSCREEN.lanes();
            }
        }
    }

    fn complete_suspense(&mut self, id: NodeId) {
        let was_showing_fallback = self
            .store
            .current(id)
            .is_some_and(|c| c.suspense.showing_fallback);
        let wip = self.store.work_mut(id);
        if was_showing_fallback && !wip.suspense.showing_fallback {
            wip.flags |= EffectFlags::UPDATE;
        }
    }

    fn complete_root(&mut self) {
        let leftover = self
            .pass
            .as_ref()
            .and_then(|p| p.hydration.as_ref())
            .is_some_and(|h| h.next.is_some());
        if leftover {
            tracing::debug!(target: "fiber.work_loop", "container has unclaimed host nodes");
            if let Some(pass) = self.pass.as_mut() {
                pass.hydration_failed = true;
            }
        }
    }

    /// Append the top-level host nodes below `id` to a fresh instance.
    fn append_all_children(&mut self, parent: &H::Instance, id: NodeId) -> Result<(), HostError> {
        let mut stack: Vec<NodeId> = self.store.work(id).children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            let fiber = self.store.work(node);
            match fiber.kind() {
                WorkKind::HostElement | WorkKind::HostText => {
                    if let Some(child) = self.instances.get(&node) {
                        self.host.append_initial_child(parent, child)?;
                    }
                }
                WorkKind::Portal => {}
                _ => stack.extend(fiber.children.iter().rev()),
            }
        }
        Ok(())
    }

    // ---- hydration ----

    /// Claim the next pre-existing host node for a new host element.
    pub(crate) fn hydrate_instance(&mut self, id: NodeId, tag: &str, props: &Props) {
        let Some(pass) = self.pass.as_mut() else {
            return;
        };
        let Some(cursor) = pass.hydration.as_mut() else {
            return;
        };
        match cursor.next.take() {
            Some(candidate) if self.host.can_hydrate_instance(&candidate, tag, props) => {
                cursor
                    .stack
                    .push(self.host.next_hydratable_sibling(&candidate));
                cursor.next = self.host.first_hydratable_child(&candidate);
                pass.hydrated.insert(id);
                self.instances.insert(id, candidate);
            }
            _ => {
                tracing::debug!(target: "fiber.work_loop", node = %id, tag, "hydration mismatch");
                pass.hydration_failed = true;
            }
        }
    }

    /// Claim the next pre-existing host node for a new text node.
    pub(crate) fn hydrate_text(&mut self, id: NodeId) {
        if self.store.is_committed(id) {
            return;
        }
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Text(text) = &*props else {
            return;
        };
        let Some(pass) = self.pass.as_mut() else {
            return;
        };
        let Some(cursor) = pass.hydration.as_mut() else {
            return;
        };
        match cursor.next.take() {
            Some(candidate) if self.host.can_hydrate_text_instance(&candidate, text) => {
                cursor.next = self.host.next_hydratable_sibling(&candidate);
                pass.hydrated.insert(id);
                self.instances.insert(id, candidate);
            }
            _ => {
                tracing::debug!(target: "fiber.work_loop", node = %id, "text hydration mismatch");
                pass.hydration_failed = true;
            }
        }
    }

    /// A claimed element completed: its host children must all be claimed.
    fn exit_hydrated_instance(&mut self) {
        let Some(cursor) = self.pass.as_mut().and_then(|p| p.hydration.as_mut()) else {
            return;
        };
        let unclaimed = cursor.next.is_some();
        cursor.next = cursor.stack.pop().flatten();
        if unclaimed {
            if let Some(pass) = self.pass.as_mut() {
                pass.hydration_failed = true;
            }
        }
    }
}

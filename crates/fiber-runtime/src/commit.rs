#![forbid(unsafe_code)]

//! The commit: applying a finished pass to the host, atomically.
//!
//! Phases, in order, each a walk over the effect list:
//!
//! 1. **Before mutation**: class snapshots, while the host still shows the
//!    previous tree.
//! 2. **Mutation**: deletions, placements, prop and text updates, layout
//!    effect teardown, visibility toggles.
//! 3. **Layout**: class lifecycles, layout effects, ref attachment, mount
//!    hooks of new host instances, retry listeners of suspended boundaries.
//!
//! Only then does the finished tree become current. Passive effects are
//! queued and run later, before the next render pass begins.
//!
//! Everything scheduled by callbacks running during the commit is recorded
//! and processed after it; the commit itself never yields.

use std::any::Any;
use std::rc::Rc;

use ahash::AHashMap;
use fiber_core::{EffectFlags, Lane, Lanes};

use crate::effects::EffectTarget;
use crate::element::{ElementNode, WorkKind};
use crate::error::{HostError, ReconcilerError};
use crate::fiber::Fiber;
use crate::hooks::{EffectHook, EffectKind, HookSlot, RawHandle};
use crate::host::HostBinding;
use crate::inbox::ExecutionPhase;
use crate::reconciler::Reconciler;
use crate::root::UpdaterInfo;
use crate::store::NodeId;
use crate::telemetry::{self, CommitRecord, EffectSummary};
use crate::work_loop::{Capture, RenderPass};

/// Passive effect work waiting for the next flush.
#[derive(Default)]
pub(crate) struct PassiveQueue {
    /// Nodes whose pending passive effects must be (re)run.
    mounts: Vec<NodeId>,
    /// Effects of deleted nodes whose teardown is still owed.
    unmounts: Vec<EffectHook>,
}

impl PassiveQueue {
    pub(crate) fn is_empty(&self) -> bool {
        self.mounts.is_empty() && self.unmounts.is_empty()
    }
}

/// Effect hooks of `kind` the last render asked to run.
fn pending_effects(fiber: &Fiber, kind: EffectKind) -> Vec<EffectHook> {
    fiber
        .hooks
        .iter()
        .filter_map(|slot| match slot {
            HookSlot::Effect(hook) if hook.kind == kind && hook.pending => Some(hook.clone()),
            _ => None,
        })
        .collect()
}

fn effect_hooks(fiber: &Fiber) -> impl Iterator<Item = &EffectHook> {
    fiber.hooks.iter().filter_map(|slot| match slot {
        HookSlot::Effect(hook) => Some(hook),
        _ => None,
    })
}

type Snapshots = AHashMap<NodeId, Box<dyn Any>>;

impl<H: HostBinding> Reconciler<H> {
    /// Commit the finished pass.
    pub(crate) fn finish_pass(&mut self) -> Result<(), ReconcilerError> {
        let Some(pass) = self.pass.take() else {
            return Ok(());
        };
        let started = self.clock.now();
        let span = tracing::debug_span!(
            "fiber.commit",
            lanes = %pass.lanes,
            effects = pass.effects.len()
        );
        let _guard = span.enter();

        let previous_phase = self.inbox.set_phase(ExecutionPhase::Layout);
        let applied = self.commit_effects(&pass);
        self.inbox.set_phase(previous_phase);
        let deleted = applied?;

        self.flip_finished_tree();
        for entry in pass.effects.entries() {
            if let EffectTarget::Node(node) = entry.target {
                if entry.flags.contains(EffectFlags::PASSIVE) {
                    self.passive.mounts.push(node);
                }
            }
        }
        self.store.end_pass();
        for node in deleted {
            self.release_node(node);
        }
        for node in &pass.created {
            if self.store.contains(*node) && !self.store.is_committed(*node) {
                self.release_node(*node);
            }
        }
        self.hydrate = false;

        let suspended = self.finish_root_schedule(&pass);
        self.commit_count += 1;
        telemetry::count_commit();
        let record = CommitRecord {
            commit_index: self.commit_count,
            lanes: pass.lanes,
            root: self.root,
            updaters: unique_updaters(&pass.updaters),
            effects: pass
                .effects
                .entries()
                .iter()
                .map(|entry| EffectSummary {
                    node: entry.node(),
                    flags: entry.flags,
                })
                .collect(),
            suspended_boundaries: suspended,
            forced: pass.forced,
            render_duration: pass.render_time,
            commit_duration: self.clock.now().saturating_sub(started),
        };
        tracing::debug!(
            target: "fiber.commit",
            commit = record.commit_index,
            lanes = %record.lanes,
            effects = record.effects.len(),
            units = pass.units,
            remaining = %self.schedule.pending(),
            "committed"
        );
        for observer in &mut self.observers {
            observer.on_commit(&record);
        }
        self.last_commit = Some(record);
        Ok(())
    }

    fn commit_effects(&mut self, pass: &RenderPass<H::Instance>) -> Result<Vec<NodeId>, HostError> {
        let entries = pass.effects.entries();
        self.host.prepare_for_commit()?;

        let mut snapshots = Snapshots::new();
        for entry in entries {
            if let EffectTarget::Node(node) = entry.target {
                if entry.flags.contains(EffectFlags::SNAPSHOT) {
                    if let Some(snapshot) = self.class_snapshot(node) {
                        snapshots.insert(node, snapshot);
                    }
                }
            }
        }

        if self.clear_container {
            self.host.clear_container(&self.container)?;
            self.clear_container = false;
        }
        let mut deleted = Vec::new();
        for entry in entries {
            match entry.target {
                EffectTarget::Deletion { node, parent } => {
                    self.commit_deletion(node, parent, &mut deleted)?;
                }
                EffectTarget::Node(node) => self.commit_mutation(node, entry.flags)?,
            }
        }
        self.host.reset_after_commit()?;

        for entry in entries {
            if let EffectTarget::Node(node) = entry.target {
                self.commit_layout(node, entry.flags, &mut snapshots)?;
            }
        }
        Ok(deleted)
    }

    fn class_snapshot(&self, node: NodeId) -> Option<Box<dyn Any>> {
        let current = self.store.current(node)?;
        let work = self.store.work(node);
        let (ElementNode::Class { component, .. }, ElementNode::Class { component: prev, .. }) =
            (&*work.pending_props, &*current.memoized_props)
        else {
            return None;
        };
        component.snapshot_before_update(
            prev.as_ref(),
            current.state.first()?,
            work.state.first()?,
        )
    }

    // ---- mutation ----

    fn commit_mutation(&mut self, node: NodeId, flags: EffectFlags) -> Result<(), HostError> {
        let kind = self.store.work(node).kind();
        if flags.contains(EffectFlags::REF) {
            self.detach_ref(node);
        }
        if flags.contains(EffectFlags::PLACEMENT) {
            self.commit_placement(node)?;
            self.store.work_mut(node).flags.remove(EffectFlags::PLACEMENT);
        }
        if flags.contains(EffectFlags::UPDATE) {
            self.commit_update(node, kind)?;
        }
        if flags.contains(EffectFlags::LAYOUT) && kind == WorkKind::FunctionComponent {
            for hook in pending_effects(self.store.work(node), EffectKind::Layout) {
                hook.run_destroy();
            }
        }
        if flags.contains(EffectFlags::VISIBILITY) {
            self.commit_visibility(node)?;
        }
        Ok(())
    }

    fn commit_update(&mut self, node: NodeId, kind: WorkKind) -> Result<(), HostError> {
        let work = self.store.work(node);
        let Some(instance) = self.instances.get(&node) else {
            return Ok(());
        };
        match (kind, &*work.pending_props) {
            (WorkKind::HostElement, ElementNode::Host(element)) => {
                if let Some(diff) = &work.update_payload {
                    self.host.commit_update(instance, &element.tag, diff)?;
                }
            }
            (WorkKind::HostText, ElementNode::Text(text)) => {
                let old = match self.store.current(node).map(|c| &*c.memoized_props) {
                    Some(ElementNode::Text(old)) => old.as_str(),
                    _ => "",
                };
                self.host.commit_text_update(instance, old, text)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn detach_ref(&self, node: NodeId) {
        let Some(node_ref) = self.store.current(node).and_then(|c| c.node_ref.as_ref()) else {
            return;
        };
        if node_ref.current() == Some(node) {
            node_ref.set(None);
        }
    }

    fn host_instance_of(&self, host_parent: NodeId) -> Option<H::Instance> {
        if host_parent == self.root {
            Some(self.container.clone())
        } else {
            self.instances.get(&host_parent).cloned()
        }
    }

    /// Nearest ancestor of `node` owning a host instance or container.
    fn host_parent(&self, node: NodeId) -> Option<NodeId> {
        let mut cursor = self.store.parent(node);
        while let Some(parent) = cursor {
            if self.store.work(parent).kind().is_host_parent() {
                return Some(parent);
            }
            cursor = self.store.parent(parent);
        }
        None
    }

    /// Host nodes at the top of `node`'s subtree, in order. Portals are
    /// skipped; their content lives in another container.
    fn top_host_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            let fiber = self.store.work(node);
            match fiber.kind() {
                WorkKind::HostElement | WorkKind::HostText => found.push(node),
                WorkKind::Portal => {}
                _ => stack.extend(fiber.children.iter().rev()),
            }
        }
        found
    }

    /// The host instance `node`'s content must be inserted before: the first
    /// stable host node after it in tree order under the same host parent.
    fn host_sibling(&self, node: NodeId) -> Option<H::Instance> {
        let mut node = node;
        'siblings: loop {
            loop {
                if let Some(sibling) = self.next_sibling(node) {
                    node = sibling;
                    break;
                }
                let parent = self.store.parent(node)?;
                if self.store.work(parent).kind().is_host_parent() {
                    return None;
                }
                node = parent;
            }
            loop {
                let fiber = self.store.work(node);
                if fiber.kind().is_host_leaf_or_element() {
                    break;
                }
                if fiber.flags.contains(EffectFlags::PLACEMENT)
                    || fiber.kind() == WorkKind::Portal
                {
                    continue 'siblings;
                }
                match fiber.children.first() {
                    Some(child) => node = *child,
                    None => continue 'siblings,
                }
            }
            if !self.store.work(node).flags.contains(EffectFlags::PLACEMENT) {
                if let Some(instance) = self.instances.get(&node) {
                    return Some(instance.clone());
                }
            }
        }
    }

    fn commit_placement(&mut self, node: NodeId) -> Result<(), HostError> {
        let Some(parent) = self.host_parent(node).and_then(|p| self.host_instance_of(p)) else {
            return Ok(());
        };
        let before = self.host_sibling(node);
        for host_node in self.top_host_nodes(node) {
            let Some(instance) = self.instances.get(&host_node) else {
                continue;
            };
            match &before {
                Some(before) => self.host.insert_before(&parent, instance, before)?,
                None => self.host.append_child(&parent, instance)?,
            }
        }
        Ok(())
    }

    fn commit_visibility(&mut self, node: NodeId) -> Result<(), HostError> {
        let hidden = self.store.work(node).hidden;
        let children = self.store.work(node).children.clone();
        for child in children {
            for host_node in self.top_host_nodes(child) {
                let Some(instance) = self.instances.get(&host_node) else {
                    continue;
                };
                if hidden {
                    self.host.hide_instance(instance)?;
                } else {
                    self.host.unhide_instance(instance)?;
                }
            }
        }
        Ok(())
    }

    /// Detach a deleted subtree from the host and run its unmount work.
    fn commit_deletion(
        &mut self,
        node: NodeId,
        parent: NodeId,
        deleted: &mut Vec<NodeId>,
    ) -> Result<(), HostError> {
        let host_parent = if self.store.work(parent).kind().is_host_parent() {
            Some(parent)
        } else {
            self.host_parent(parent)
        };
        if let Some(container) = host_parent.and_then(|p| self.host_instance_of(p)) {
            for host_node in self.top_host_nodes(node) {
                if let Some(instance) = self.instances.get(&host_node) {
                    self.host.remove_child(&container, instance)?;
                }
            }
        }

        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            deleted.push(node);
            let fiber = self.store.work(node);
            match (&*fiber.memoized_props, fiber.kind()) {
                (ElementNode::Host(_), _) => self.detach_ref(node),
                (ElementNode::Class { component, .. }, _) => {
                    if let Some(state) = fiber.state.first() {
                        component.will_unmount(state);
                    }
                }
                (_, WorkKind::FunctionComponent) => {
                    for hook in effect_hooks(fiber) {
                        match hook.kind {
                            EffectKind::Layout => hook.run_destroy(),
                            EffectKind::Passive => self.passive.unmounts.push(hook.clone()),
                        }
                    }
                }
                (_, WorkKind::Portal) => {
                    if let Some(container) = self.instances.get(&node) {
                        for child in &fiber.children {
                            for host_node in self.top_host_nodes(*child) {
                                if let Some(instance) = self.instances.get(&host_node) {
                                    self.host.remove_child(container, instance)?;
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
            stack.extend(fiber.children.iter().rev());
        }
        Ok(())
    }

    // ---- layout ----

    fn commit_layout(
        &mut self,
        node: NodeId,
        flags: EffectFlags,
        snapshots: &mut Snapshots,
    ) -> Result<(), HostError> {
        let (kind, showing_fallback) = {
            let work = self.store.work(node);
            (work.kind(), work.suspense.showing_fallback)
        };
        match kind {
            WorkKind::ClassComponent if flags.contains(EffectFlags::CALLBACK) => {
                self.commit_class_layout(node, snapshots.remove(&node));
            }
            WorkKind::FunctionComponent if flags.contains(EffectFlags::LAYOUT) => {
                for hook in pending_effects(self.store.work(node), EffectKind::Layout) {
                    hook.run_create();
                }
            }
            WorkKind::HostElement if flags.contains(EffectFlags::HOST_MOUNT) => {
                let work = self.store.work(node);
                if let (ElementNode::Host(element), Some(instance)) =
                    (&*work.pending_props, self.instances.get(&node))
                {
                    self.host.commit_mount(instance, &element.tag, &element.props)?;
                }
            }
            WorkKind::SuspenseBoundary => {
                if flags.contains(EffectFlags::RETRY) {
                    self.attach_retry_listeners(node);
                }
                if flags.contains(EffectFlags::UPDATE) && !showing_fallback {
                    self.retry_counts.remove(&node);
                }
            }
            _ => {}
        }
        if flags.contains(EffectFlags::REF) {
            if let Some(node_ref) = &self.store.work(node).node_ref {
                node_ref.set(Some(node));
            }
        }
        Ok(())
    }

    fn commit_class_layout(&self, node: NodeId, snapshot: Option<Box<dyn Any>>) {
        let work = self.store.work(node);
        let ElementNode::Class { component, .. } = &*work.pending_props else {
            return;
        };
        let Some(state) = work.state.first() else {
            return;
        };
        let handle = RawHandle::new(node, &self.inbox);
        match self.store.current(node) {
            Some(current) => {
                if let (ElementNode::Class { component: prev, .. }, Some(prev_state)) =
                    (&*current.memoized_props, current.state.first())
                {
                    component.did_update(
                        prev.as_ref(),
                        prev_state,
                        state,
                        snapshot.as_deref(),
                        &handle,
                    );
                }
            }
            None => component.did_mount(state, &handle),
        }
        if let Some(error) = &work.caught {
            component.did_catch(error, state, &handle);
        }
    }

    fn attach_retry_listeners(&mut self, boundary: NodeId) {
        let suspense = &self.store.work(boundary).suspense;
        let attempt = suspense.attempt;
        for thenable in &suspense.waiting_on {
            if !self
                .retry_listeners
                .insert((boundary, thenable.id(), attempt))
            {
                continue;
            }
            let inbox = Rc::downgrade(&self.inbox);
            thenable.on_settle(move || {
                if let Some(inbox) = inbox.upgrade() {
                    inbox.ping_retry(boundary, attempt);
                }
            });
        }
    }

    // ---- after the commit ----

    /// Make every node the pass touched current.
    fn flip_finished_tree(&mut self) {
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if !self.store.in_pass(node) {
                continue;
            }
            let fiber = self.store.work(node);
            stack.extend(fiber.children.iter().copied());
            let consumed = fiber.queue.consumed_seq();
            self.store.retain_pending_after(node, consumed);
            self.store.commit(node);
        }
    }

    fn release_node(&mut self, node: NodeId) {
        self.instances.remove(&node);
        self.retry_counts.remove(&node);
        self.retry_listeners.retain(|(boundary, _, _)| *boundary != node);
        self.store.release(node);
    }

    /// Settle the root's lanes after a commit. Returns the boundaries that
    /// suspended in the pass.
    fn finish_root_schedule(&mut self, pass: &RenderPass<H::Instance>) -> Vec<NodeId> {
        let remaining = self
            .store
            .current(self.root)
            .map_or(Lanes::empty(), |root| root.lanes | root.child_lanes);
        self.schedule.finish(remaining);

        let mut suspended: Vec<NodeId> = pass
            .captures
            .iter()
            .filter(|(_, capture)| matches!(capture, Capture::Suspended(_)))
            .map(|(node, _)| *node)
            .collect();
        suspended.sort();
        if !suspended.is_empty() {
            self.schedule.entangle(pass.lanes | Lanes::RETRY);
            for (_, info) in &pass.updaters {
                self.schedule
                    .add_updater(Lane::RETRY, info.clone());
            }
        }
        suspended
    }

    // ---- passive effects ----

    /// Run passive effects of past commits: teardowns first, then creates.
    /// Returns whether there was anything to run.
    pub fn flush_passive_effects(&mut self) -> Result<bool, ReconcilerError> {
        if self.is_poisoned() {
            return Err(ReconcilerError::Poisoned);
        }
        if self.passive.is_empty() {
            return Ok(false);
        }
        let PassiveQueue { mounts, unmounts } = std::mem::take(&mut self.passive);
        let previous_phase = self.inbox.set_phase(ExecutionPhase::Passive);
        for hook in &unmounts {
            hook.run_destroy();
        }
        let mut created = Vec::new();
        for node in &mounts {
            if let Some(fiber) = self.store.current(*node) {
                let hooks = pending_effects(fiber, EffectKind::Passive);
                for hook in &hooks {
                    hook.run_destroy();
                }
                created.extend(hooks);
            }
        }
        for hook in &created {
            hook.run_create();
        }
        self.inbox.set_phase(previous_phase);
        tracing::trace!(
            target: "fiber.commit",
            teardowns = unmounts.len(),
            nodes = mounts.len(),
            "passive effects flushed"
        );
        Ok(true)
    }
}

/// Updaters in scheduling order, one entry per node.
fn unique_updaters(updaters: &[(Lane, UpdaterInfo)]) -> Vec<UpdaterInfo> {
    let mut unique: Vec<UpdaterInfo> = Vec::with_capacity(updaters.len());
    for (_, info) in updaters {
        if !unique.iter().any(|u| u.node == info.node) {
            unique.push(info.clone());
        }
    }
    unique
}

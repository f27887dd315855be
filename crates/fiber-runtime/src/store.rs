#![forbid(unsafe_code)]

//! Double-buffered work node arena.
//!
//! Every node occupies one slot holding two [`Fiber`] buffers. One is the
//! *current* (committed) version; the other is the *work* version a render
//! pass builds. Preparing a node for work copies the current buffer over
//! the alternate with `clone_from`, reusing the alternate's allocations.
//! Committing a node flips which buffer is current, so the committed tree
//! changes atomically once the commit walks the finished tree.
//!
//! # Invariants
//!
//! 1. A node's work buffer is only readable through [`NodeStore::work`]
//!    while it has been prepared in the active pass; otherwise `work`
//!    returns the committed buffer.
//! 2. Nodes created during a pass are not committed until the commit flips
//!    them. Abandoning the pass releases them.
//! 3. Pending updates live on the slot, shared by both buffers, so an
//!    abandoned pass loses none.
//! 4. Released slots bump their generation; stale [`NodeId`]s never alias a
//!    reused slot.

use std::fmt;

use fiber_core::{EffectFlags, Lanes, Update};

use crate::fiber::Fiber;

/// Handle to a work node. Stays valid for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "N{}", self.index)
        } else {
            write!(f, "N{}v{}", self.index, self.generation)
        }
    }
}

/// What folding a node's pending updates produced.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct QueueOutcome {
    pub(crate) changed: bool,
    pub(crate) force_render: bool,
}

struct Slot {
    generation: u32,
    occupied: bool,
    current: usize,
    committed: bool,
    prepared_epoch: u64,
    parent: Option<NodeId>,
    pending: Vec<Update>,
    buffers: [Fiber; 2],
}

impl Slot {
    fn split(&mut self) -> (&Fiber, &mut Fiber) {
        let current = self.current;
        let (lo, hi) = self.buffers.split_at_mut(1);
        if current == 0 {
            (&lo[0], &mut hi[0])
        } else {
            (&hi[0], &mut lo[0])
        }
    }
}

#[derive(Default)]
pub(crate) struct NodeStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    epoch: u64,
    in_pass: bool,
    live: usize,
}

impl fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStore")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .field("epoch", &self.epoch)
            .field("in_pass", &self.in_pass)
            .finish()
    }
}

impl NodeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_pass(&mut self) {
        self.epoch += 1;
        self.in_pass = true;
    }

    /// Invalidate every prepared work buffer.
    pub(crate) fn end_pass(&mut self) {
        self.epoch += 1;
        self.in_pass = false;
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// Allocate a node. Both buffers start as `fiber`; it counts as
    /// prepared in the active pass.
    pub(crate) fn create(&mut self, parent: Option<NodeId>, fiber: Fiber) -> NodeId {
        let epoch = self.epoch;
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupied = true;
            slot.current = 0;
            slot.committed = false;
            slot.prepared_epoch = epoch;
            slot.parent = parent;
            slot.buffers[0].clone_from(&fiber);
            slot.buffers[1] = fiber;
            return NodeId::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            occupied: true,
            current: 0,
            committed: false,
            prepared_epoch: epoch,
            parent,
            pending: Vec::new(),
            buffers: [fiber.clone(), fiber],
        });
        NodeId::new(index, 0)
    }

    /// Free a slot. Its id becomes stale.
    pub(crate) fn release(&mut self, id: NodeId) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        slot.occupied = false;
        slot.committed = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.parent = None;
        slot.pending.clear();
        slot.buffers = [Fiber::vacant(), Fiber::vacant()];
        self.live -= 1;
        self.free.push(id.index);
    }

    pub(crate) fn is_committed(&self, id: NodeId) -> bool {
        self.slot(id).is_some_and(|s| s.committed)
    }

    /// Whether the node's work buffer belongs to the active pass.
    pub(crate) fn in_pass(&self, id: NodeId) -> bool {
        self.in_pass && self.slot(id).is_some_and(|s| s.prepared_epoch == self.epoch)
    }

    /// The committed version, if the node has ever been committed.
    pub(crate) fn current(&self, id: NodeId) -> Option<&Fiber> {
        self.slot(id)
            .filter(|s| s.committed)
            .map(|s| &s.buffers[s.current])
    }

    /// The version the active pass sees.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale; callers only hold ids of live nodes.
    pub(crate) fn work(&self, id: NodeId) -> &Fiber {
        let in_pass = self.in_pass;
        let epoch = self.epoch;
        let slot = self.slot(id).unwrap_or_else(|| panic!("stale node id {id}"));
        if in_pass && slot.prepared_epoch == epoch {
            &slot.buffers[1 - slot.current]
        } else {
            &slot.buffers[slot.current]
        }
    }

    /// Mutable access to a prepared work buffer.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale.
    pub(crate) fn work_mut(&mut self, id: NodeId) -> &mut Fiber {
        debug_assert!(self.in_pass(id), "{id} was not prepared in this pass");
        let slot = self
            .slot_mut(id)
            .unwrap_or_else(|| panic!("stale node id {id}"));
        slot.split().1
    }

    /// Make the node's work buffer a fresh copy of its committed version,
    /// unless that already happened in this pass.
    pub(crate) fn prepare(&mut self, id: NodeId) -> &mut Fiber {
        let epoch = self.epoch;
        let slot = self
            .slot_mut(id)
            .unwrap_or_else(|| panic!("stale node id {id}"));
        if slot.prepared_epoch != epoch {
            slot.prepared_epoch = epoch;
            let (current, work) = slot.split();
            work.clone_from(current);
            work.reset_pass_output();
        }
        slot.split().1
    }

    /// Drop the node's work buffer from the active pass.
    pub(crate) fn unprepare(&mut self, id: NodeId) {
        if let Some(slot) = self.slot_mut(id) {
            if slot.committed {
                slot.prepared_epoch = 0;
            }
        }
    }

    /// Discard the work done on a node so it can begin again. A pending
    /// placement survives.
    pub(crate) fn restart(&mut self, id: NodeId) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        let committed = slot.committed;
        let (current, work) = slot.split();
        let props = work.pending_props.clone();
        let node_ref = work.node_ref.clone();
        let (index, position) = (work.index, work.position);
        let placement = work.flags & EffectFlags::PLACEMENT;
        if committed {
            work.clone_from(current);
            work.reset_pass_output();
        } else {
            work.reset_for_remount();
        }
        work.pending_props = props;
        work.node_ref = node_ref;
        work.index = index;
        work.position = position;
        work.flags |= placement;
    }

    /// Make the work buffer current.
    pub(crate) fn commit(&mut self, id: NodeId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.current = 1 - slot.current;
            slot.committed = true;
            slot.prepared_epoch = 0;
        }
    }

    pub(crate) fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.parent)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, id: NodeId) -> &[Update] {
        self.slot(id).map_or(&[], |s| s.pending.as_slice())
    }

    pub(crate) fn push_pending(&mut self, id: NodeId, update: Update) {
        if let Some(slot) = self.slot_mut(id) {
            slot.pending.push(update);
        }
    }

    /// Drop pending updates a committed queue has folded in.
    pub(crate) fn retain_pending_after(&mut self, id: NodeId, seq: u64) {
        if let Some(slot) = self.slot_mut(id) {
            slot.pending.retain(|u| u.seq > seq);
        }
    }

    /// Fold the slot's pending updates into the work buffer's queue.
    pub(crate) fn process_updates(&mut self, id: NodeId, lanes: Lanes) -> QueueOutcome {
        let Some(slot) = self.slot_mut(id) else {
            return QueueOutcome::default();
        };
        let alternate = 1 - slot.current;
        let work = &mut slot.buffers[alternate];
        let processed = work.queue.process(&slot.pending, lanes, &work.state);
        work.state = processed.state;
        work.lanes |= processed.remaining;
        QueueOutcome {
            changed: processed.changed,
            force_render: processed.force_render,
        }
    }

    /// Remove `lanes` from every node.
    pub(crate) fn drop_lanes(&mut self, lanes: Lanes) {
        for slot in self.slots.iter_mut().filter(|s| s.occupied) {
            for fiber in &mut slot.buffers {
                fiber.lanes -= lanes;
                fiber.child_lanes -= lanes;
            }
        }
    }

    /// Record work on the node itself in both buffers.
    pub(crate) fn mark_lanes(&mut self, id: NodeId, lanes: Lanes) {
        if let Some(slot) = self.slot_mut(id) {
            for fiber in &mut slot.buffers {
                fiber.lanes |= lanes;
            }
        }
    }

    /// Record work somewhere below the node in both buffers.
    pub(crate) fn mark_child_lanes(&mut self, id: NodeId, lanes: Lanes) {
        if let Some(slot) = self.slot_mut(id) {
            for fiber in &mut slot.buffers {
                fiber.child_lanes |= lanes;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementNode, ElementType};
    use std::rc::Rc;

    fn fragment() -> Fiber {
        Fiber::new(ElementType::Fragment, None, Rc::new(ElementNode::Empty))
    }

    #[test]
    fn created_node_is_uncommitted_until_commit() {
        let mut store = NodeStore::new();
        store.begin_pass();
        let id = store.create(None, fragment());
        assert!(store.in_pass(id));
        assert!(store.current(id).is_none());
        store.work_mut(id).index = 3;
        store.commit(id);
        store.end_pass();
        assert_eq!(store.current(id).map(|f| f.index), Some(3));
        assert!(!store.in_pass(id));
    }

    #[test]
    fn prepare_copies_current_and_commit_flips() {
        let mut store = NodeStore::new();
        store.begin_pass();
        let id = store.create(None, fragment());
        store.commit(id);
        store.end_pass();

        store.begin_pass();
        store.prepare(id).index = 7;
        // The committed version is untouched until commit.
        assert_eq!(store.current(id).map(|f| f.index), Some(0));
        assert_eq!(store.work(id).index, 7);
        store.end_pass();
        // Abandoned: work view falls back to the committed buffer.
        assert_eq!(store.work(id).index, 0);

        store.begin_pass();
        assert_eq!(store.prepare(id).index, 0);
        store.work_mut(id).index = 9;
        store.commit(id);
        store.end_pass();
        assert_eq!(store.current(id).map(|f| f.index), Some(9));
    }

    #[test]
    fn released_ids_go_stale() {
        let mut store = NodeStore::new();
        store.begin_pass();
        let a = store.create(None, fragment());
        store.release(a);
        let b = store.create(None, fragment());
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!store.contains(a));
        assert!(store.contains(b));
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn pending_updates_survive_abandoned_passes() {
        use fiber_core::{UpdatePayload, Update};
        let mut store = NodeStore::new();
        let id = store.create(None, fragment());
        store.commit(id);
        store.push_pending(id, Update::new(Lanes::DEFAULT, 0, UpdatePayload::ForceRender, 1));
        store.push_pending(id, Update::new(Lanes::DEFAULT, 0, UpdatePayload::ForceRender, 2));
        store.begin_pass();
        store.prepare(id);
        store.end_pass();
        assert_eq!(store.pending(id).len(), 2);
        store.retain_pending_after(id, 1);
        assert_eq!(store.pending(id).len(), 1);
    }

    #[test]
    fn lane_marks_land_in_both_buffers() {
        let mut store = NodeStore::new();
        let id = store.create(None, fragment());
        store.commit(id);
        store.mark_lanes(id, Lanes::SYNC);
        store.mark_child_lanes(id, Lanes::DEFAULT);
        store.begin_pass();
        let work = store.prepare(id);
        assert_eq!(work.lanes, Lanes::SYNC);
        assert_eq!(work.child_lanes, Lanes::DEFAULT);
    }

    #[test]
    fn restart_resets_uncommitted_work() {
        let mut store = NodeStore::new();
        store.begin_pass();
        let id = store.create(None, fragment());
        store.work_mut(id).children.push(NodeId::new(5, 0));
        store.work_mut(id).index = 2;
        store.restart(id);
        assert!(store.work(id).children.is_empty());
        assert_eq!(store.work(id).index, 2);
    }
}

#![forbid(unsafe_code)]

//! Per-node update queues with lane-aware skip and replay.
//!
//! A node's state is a vector of type-erased slots ([`StateValue`]). Updates
//! target one slot and carry the lane they were scheduled at. Processing a
//! queue for a set of render lanes applies, in insertion order, every update
//! whose lane is included and skips the rest.
//!
//! # Skip and replay
//!
//! The first skipped update freezes the *base state*: the state as it was
//! just before that update. Every update from that point on is retained in
//! the base list, including the ones that were applied; applied ones are
//! rebased to the empty lane so they apply in any later pass. The next pass
//! that includes the skipped lane starts from the base state and replays the
//! retained list, so the final state always equals the left fold of every
//! update in insertion order, whatever lane subsets were rendered in between.
//!
//! Pending updates live outside the queue (they are shared by both buffers
//! of a node). The queue records the highest sequence number it has folded
//! in, so reprocessing the same pending list is idempotent.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::lane::Lanes;

/// A type-erased state slot.
pub type StateValue = Rc<dyn Any>;

/// A state transition computed from the previous value.
pub type Reducer = Rc<dyn Fn(&StateValue) -> StateValue>;

/// What an update does to its slot.
#[derive(Clone)]
pub enum UpdatePayload {
    /// Replace the slot wholesale.
    Replace(StateValue),
    /// Compute the next value from the previous one.
    Reduce(Reducer),
    /// Leave state alone but force the node to re-render.
    ForceRender,
}

impl fmt::Debug for UpdatePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(_) => f.write_str("Replace"),
            Self::Reduce(_) => f.write_str("Reduce"),
            Self::ForceRender => f.write_str("ForceRender"),
        }
    }
}

/// One scheduled state change.
#[derive(Debug, Clone)]
pub struct Update {
    /// Lane the update was scheduled at. Empty once rebased.
    pub lane: Lanes,
    /// State slot the update targets.
    pub slot: usize,
    pub payload: UpdatePayload,
    /// Monotonic insertion order.
    pub seq: u64,
    /// Scheduled by the node on itself while it was rendering.
    pub render_phase: bool,
}

impl Update {
    #[must_use]
    pub fn new(lane: Lanes, slot: usize, payload: UpdatePayload, seq: u64) -> Self {
        Self {
            lane,
            slot,
            payload,
            seq,
            render_phase: false,
        }
    }

    /// Mark the update as scheduled from inside its node's own render.
    #[must_use]
    pub fn in_render_phase(mut self) -> Self {
        self.render_phase = true;
        self
    }

    fn rebased(&self) -> Self {
        Self {
            lane: Lanes::empty(),
            ..self.clone()
        }
    }

    /// Apply this update to `state`. Returns whether it forces a render.
    pub fn apply(&self, state: &mut [StateValue]) -> bool {
        let Some(value) = state.get_mut(self.slot) else {
            return false;
        };
        match &self.payload {
            UpdatePayload::Replace(next) => *value = next.clone(),
            UpdatePayload::Reduce(reducer) => *value = reducer(value),
            UpdatePayload::ForceRender => return true,
        }
        false
    }
}

/// Result of processing a queue for a set of render lanes.
pub struct Processed {
    /// The state visible to this render.
    pub state: Vec<StateValue>,
    /// Lanes of updates that were skipped.
    pub remaining: Lanes,
    /// Whether any slot now holds a different value than before processing.
    pub changed: bool,
    /// Whether a [`UpdatePayload::ForceRender`] update was applied.
    pub force_render: bool,
}

/// Base state plus the retained updates that must be replayed against it.
#[derive(Clone, Default)]
pub struct UpdateQueue {
    base_state: Vec<StateValue>,
    base_updates: Vec<Update>,
    consumed_seq: u64,
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("slots", &self.base_state.len())
            .field("base_updates", &self.base_updates)
            .field("consumed_seq", &self.consumed_seq)
            .finish()
    }
}

impl UpdateQueue {
    #[must_use]
    pub fn new(initial: Vec<StateValue>) -> Self {
        Self {
            base_state: initial,
            base_updates: Vec::new(),
            consumed_seq: 0,
        }
    }

    #[must_use]
    pub fn base_state(&self) -> &[StateValue] {
        &self.base_state
    }

    #[must_use]
    pub fn base_updates(&self) -> &[Update] {
        &self.base_updates
    }

    /// Highest pending sequence number folded into this queue.
    #[must_use]
    pub fn consumed_seq(&self) -> u64 {
        self.consumed_seq
    }

    /// Lanes of retained updates that have not been applied yet.
    #[must_use]
    pub fn skipped_lanes(&self) -> Lanes {
        self.base_updates
            .iter()
            .fold(Lanes::empty(), |acc, update| acc | update.lane)
    }

    /// Fold newly pending updates in and compute the state for `render_lanes`.
    ///
    /// `current` is the state before processing; it only feeds the
    /// [`Processed::changed`] comparison.
    pub fn process(
        &mut self,
        pending: &[Update],
        render_lanes: Lanes,
        current: &[StateValue],
    ) -> Processed {
        let seen = self.consumed_seq;
        let mut queue = std::mem::take(&mut self.base_updates);
        for update in pending.iter().filter(|u| u.seq > seen) {
            self.consumed_seq = self.consumed_seq.max(update.seq);
            queue.push(update.clone());
        }

        let mut state = self.base_state.clone();
        let mut frozen_base: Option<Vec<StateValue>> = None;
        let mut retained = Vec::new();
        let mut remaining = Lanes::empty();
        let mut force_render = false;

        for update in queue {
            if !render_lanes.contains(update.lane) {
                if frozen_base.is_none() {
                    frozen_base = Some(state.clone());
                }
                remaining |= update.lane;
                retained.push(update);
                continue;
            }
            if frozen_base.is_some() {
                retained.push(update.rebased());
            }
            force_render |= update.apply(&mut state);
        }

        self.base_state = frozen_base.unwrap_or_else(|| state.clone());
        self.base_updates = retained;

        let changed = state.len() != current.len()
            || state
                .iter()
                .zip(current)
                .any(|(next, prev)| !same_value(next, prev));
        Processed {
            state,
            remaining,
            changed,
            force_render,
        }
    }

    /// Record updates applied outside normal processing (render-phase
    /// updates) so later replays include them.
    pub fn record_applied(&mut self, update: &Update, state: &[StateValue]) {
        if self.base_updates.is_empty() {
            self.base_state = state.to_vec();
        } else {
            self.base_updates.push(update.rebased());
        }
    }

    /// Adopt slots appended after the queue was created (hooks mounting).
    pub fn adopt_new_slots(&mut self, state: &[StateValue]) {
        if self.base_state.len() < state.len() {
            let start = self.base_state.len();
            self.base_state.extend(state[start..].iter().cloned());
        }
    }
}

/// Identity comparison of two state values.
#[must_use]
pub fn same_value(a: &StateValue, b: &StateValue) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

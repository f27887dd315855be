#![forbid(unsafe_code)]

//! Update intake shared between the reconciler and state handles.
//!
//! Setters may run at any time: from event handlers, effects, lifecycle
//! callbacks, or from inside a render. The inbox only *records* them. The
//! reconciler folds recorded updates into the node store between render
//! passes, so an in-progress pass never observes a half-applied schedule;
//! while a pass runs, the inbox is only consulted for its most urgent lane
//! to decide whether to interrupt.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fiber_core::{Lane, Lanes, Update, UpdatePayload};

use crate::store::NodeId;

/// What the reconciler is doing right now. Determines default lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionPhase {
    Idle,
    Render,
    /// Layout callbacks; updates scheduled here are synchronous.
    Layout,
    /// Passive effects; updates scheduled here use the default lane.
    Passive,
}

/// A recorded request for work.
#[derive(Debug)]
pub(crate) enum Scheduled {
    Update { node: NodeId, update: Update },
    /// A thenable a boundary was waiting on settled.
    Retry { boundary: NodeId, attempt: u64 },
}

impl Scheduled {
    fn lane(&self) -> Option<Lane> {
        match self {
            Self::Update { update, .. } => update.lane.highest_priority(),
            Self::Retry { .. } => Some(Lane::RETRY),
        }
    }
}

#[derive(Debug)]
pub struct UpdateInbox {
    queue: RefCell<Vec<Scheduled>>,
    next_seq: Cell<u64>,
    priority: Cell<Option<Lane>>,
    phase: Cell<ExecutionPhase>,
    rendering: Cell<Option<NodeId>>,
    render_phase: RefCell<Vec<Update>>,
    /// Nodes that scheduled work from layout callbacks since the last take.
    layout_updaters: RefCell<Vec<NodeId>>,
}

impl UpdateInbox {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            queue: RefCell::new(Vec::new()),
            next_seq: Cell::new(1),
            priority: Cell::new(None),
            phase: Cell::new(ExecutionPhase::Idle),
            rendering: Cell::new(None),
            render_phase: RefCell::new(Vec::new()),
            layout_updaters: RefCell::new(Vec::new()),
        })
    }

    /// Lane for an update scheduled right now without an explicit priority.
    pub(crate) fn request_lane(&self) -> Lane {
        if let Some(lane) = self.priority.get() {
            return lane;
        }
        match self.phase.get() {
            ExecutionPhase::Layout => Lane::SYNC,
            ExecutionPhase::Idle | ExecutionPhase::Render | ExecutionPhase::Passive => {
                Lane::DEFAULT
            }
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    /// Record an update at the ambient lane. Returns the lane used.
    pub(crate) fn enqueue(&self, node: NodeId, slot: usize, payload: UpdatePayload) -> Lane {
        let lane = self.request_lane();
        self.enqueue_at(node, slot, payload, lane);
        lane
    }

    pub(crate) fn enqueue_at(&self, node: NodeId, slot: usize, payload: UpdatePayload, lane: Lane) {
        let update = Update::new(lane.lanes(), slot, payload, self.next_seq());
        if self.rendering.get() == Some(node) {
            tracing::trace!(target: "fiber.scheduler", node = %node, "render-phase update");
            self.render_phase.borrow_mut().push(update.in_render_phase());
        } else {
            if self.phase.get() == ExecutionPhase::Layout {
                self.layout_updaters.borrow_mut().push(node);
            }
            self.queue.borrow_mut().push(Scheduled::Update { node, update });
        }
    }

    pub(crate) fn ping_retry(&self, boundary: NodeId, attempt: u64) {
        self.queue
            .borrow_mut()
            .push(Scheduled::Retry { boundary, attempt });
    }

    /// Most urgent lane among recorded requests.
    pub(crate) fn most_urgent(&self) -> Option<Lane> {
        self.queue.borrow().iter().filter_map(Scheduled::lane).min()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub(crate) fn drain(&self) -> Vec<Scheduled> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    /// Drop recorded updates scheduled at any of `lanes`. Retries stay.
    pub(crate) fn discard_updates(&self, lanes: Lanes) -> usize {
        let mut queue = self.queue.borrow_mut();
        let before = queue.len();
        queue.retain(|scheduled| match scheduled {
            Scheduled::Update { update, .. } => !lanes.intersects(update.lane),
            Scheduled::Retry { .. } => true,
        });
        before - queue.len()
    }

    /// Nodes that scheduled updates during layout since the last call.
    pub(crate) fn take_layout_updaters(&self) -> Vec<NodeId> {
        std::mem::take(&mut *self.layout_updaters.borrow_mut())
    }

    pub(crate) fn begin_render(&self, node: NodeId) {
        self.rendering.set(Some(node));
    }

    /// Stop attributing updates to `node`; returns its render-phase updates.
    pub(crate) fn end_render(&self) -> Vec<Update> {
        self.rendering.set(None);
        std::mem::take(&mut *self.render_phase.borrow_mut())
    }

    pub(crate) fn set_phase(&self, phase: ExecutionPhase) -> ExecutionPhase {
        self.phase.replace(phase)
    }

    /// Run `f` with every update it schedules assigned to `lane`.
    pub(crate) fn with_priority<R>(&self, lane: Lane, f: impl FnOnce() -> R) -> R {
        let previous = self.priority.replace(Some(lane));
        let out = f();
        self.priority.set(previous);
        out
    }
}

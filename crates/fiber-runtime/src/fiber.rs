#![forbid(unsafe_code)]

//! The work node record.

use std::rc::Rc;

use fiber_core::{EffectFlags, Lanes, PropDiff, StateValue, Thenable, UpdateQueue};

use crate::element::{ElementNode, ElementRef, ElementType, Key, WorkKind};
use crate::error::RenderError;
use crate::hooks::HookSlot;
use crate::store::NodeId;

/// Suspense bookkeeping carried on boundary nodes.
#[derive(Debug, Clone, Default)]
pub(crate) struct SuspenseState {
    /// Whether the committed output is the fallback.
    pub(crate) showing_fallback: bool,
    /// Thenables the fallback is waiting on.
    pub(crate) waiting_on: Vec<Thenable>,
    /// Incremented whenever a fresh suspension is committed. A retry ping
    /// carrying an older attempt is stale.
    pub(crate) attempt: u64,
}

/// One version of a work node. Each node keeps two: the committed one and
/// the one being worked on.
#[derive(Debug, Clone)]
pub(crate) struct Fiber {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) pending_props: Rc<ElementNode>,
    pub(crate) memoized_props: Rc<ElementNode>,
    pub(crate) state: Vec<StateValue>,
    pub(crate) queue: UpdateQueue,
    pub(crate) hooks: Vec<HookSlot>,
    pub(crate) suspense: SuspenseState,
    /// Current visibility for offscreen nodes.
    pub(crate) hidden: bool,
    pub(crate) children: Vec<NodeId>,
    /// Position in the parent's element list; implicit key and move
    /// detection use it.
    pub(crate) index: usize,
    /// Position in the parent's `children`.
    pub(crate) position: usize,
    pub(crate) flags: EffectFlags,
    pub(crate) subtree_flags: EffectFlags,
    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,
    pub(crate) deletions: Vec<NodeId>,
    pub(crate) node_ref: Option<ElementRef>,
    pub(crate) update_payload: Option<PropDiff>,
    /// Error captured by this boundary during the pass, delivered in layout.
    pub(crate) caught: Option<RenderError>,
    /// Length of the effect list when this node began.
    pub(crate) effect_start: usize,
}

impl Fiber {
    pub(crate) fn new(ty: ElementType, key: Option<Key>, props: Rc<ElementNode>) -> Self {
        let node_ref = match &*props {
            ElementNode::Host(host) => host.node_ref.clone(),
            _ => None,
        };
        Self {
            ty,
            key,
            memoized_props: props.clone(),
            pending_props: props,
            state: Vec::new(),
            queue: UpdateQueue::default(),
            hooks: Vec::new(),
            suspense: SuspenseState::default(),
            hidden: false,
            children: Vec::new(),
            index: 0,
            position: 0,
            flags: EffectFlags::empty(),
            subtree_flags: EffectFlags::empty(),
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
            deletions: Vec::new(),
            node_ref,
            update_payload: None,
            caught: None,
            effect_start: 0,
        }
    }

    /// An unoccupied slot.
    pub(crate) fn vacant() -> Self {
        Self::new(ElementType::Fragment, None, Rc::new(ElementNode::Empty))
    }

    pub(crate) fn kind(&self) -> WorkKind {
        self.ty.kind()
    }

    /// Reset per-pass output before the node is worked on again.
    pub(crate) fn reset_pass_output(&mut self) {
        self.flags = EffectFlags::empty();
        self.subtree_flags = EffectFlags::empty();
        self.deletions.clear();
        self.update_payload = None;
        self.caught = None;
    }

    /// Forget everything rendered; used when a never-committed node is
    /// rendered again from scratch.
    pub(crate) fn reset_for_remount(&mut self) {
        self.reset_pass_output();
        self.state.clear();
        self.queue = UpdateQueue::default();
        self.hooks.clear();
        self.suspense = SuspenseState::default();
        self.children.clear();
        self.child_lanes = Lanes::empty();
    }
}

#![forbid(unsafe_code)]

//! The interruptible work loop.
//!
//! A render pass walks the work tree depth first. Each *unit of work* begins
//! one node, which reconciles its children and returns the first one to
//! descend into. A node without children (or one that bailed out) completes,
//! and completion climbs back up until it finds a sibling to begin next.
//! The root's completion finishes the pass.
//!
//! Between units the loop checks two things, except for the very first unit
//! of a slice and for *forced* passes (sync or expired lanes):
//!
//! - updates recorded at a more urgent lane than the pass abandon it, and
//! - the [`YieldSignal`] may ask to hand control back; the pass then
//!   resumes exactly where it stopped on the next call.
//!
//! # Throws
//!
//! A node that throws during begin unwinds to the nearest boundary able to
//! handle it. The boundary's partial work and the effects its subtree
//! produced are discarded, the capture is recorded, and the boundary begins
//! again to render its fallback or error state.

use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use fiber_core::{Lane, Lanes, Thenable};

use crate::effects::EffectList;
use crate::element::WorkKind;
use crate::error::{HostError, ReconcilerError, RenderError, Throw};
use crate::host::HostBinding;
use crate::inbox::ExecutionPhase;
use crate::reconciler::{Abandon, Reconciler};
use crate::root::UpdaterInfo;
use crate::store::NodeId;
use crate::telemetry;
use crate::yield_signal::YieldSignal;

/// What a boundary caught during the pass.
#[derive(Debug, Clone)]
pub(crate) enum Capture {
    Suspended(Vec<Thenable>),
    Error(RenderError),
}

/// Failure of a single unit of work.
#[derive(Debug)]
pub(crate) enum UnitError {
    Throw(Throw),
    Host(HostError),
}

impl From<Throw> for UnitError {
    fn from(throw: Throw) -> Self {
        Self::Throw(throw)
    }
}

impl From<RenderError> for UnitError {
    fn from(err: RenderError) -> Self {
        Self::Throw(Throw::Error(err))
    }
}

impl From<HostError> for UnitError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    Completed,
    Yielded,
    Interrupted,
    HydrationFailed,
}

/// Position in the pre-existing host tree while hydrating.
#[derive(Debug)]
pub(crate) struct HydrationCursor<I> {
    /// Next candidate at the current depth.
    pub(crate) next: Option<I>,
    /// Candidates to resume with after the claimed parent closes.
    pub(crate) stack: Vec<Option<I>>,
}

/// State of one render pass.
#[derive(Debug)]
pub(crate) struct RenderPass<I> {
    pub(crate) lanes: Lanes,
    pub(crate) forced: bool,
    pub(crate) next: Option<NodeId>,
    pub(crate) effects: EffectList,
    pub(crate) captures: AHashMap<NodeId, Capture>,
    /// Nodes allocated by this pass; released if it is abandoned.
    pub(crate) created: Vec<NodeId>,
    pub(crate) updaters: Vec<(Lane, UpdaterInfo)>,
    /// Lanes that replace the pass lanes below an offscreen node.
    pub(crate) lane_overrides: Vec<(NodeId, Lanes)>,
    pub(crate) hydration: Option<HydrationCursor<I>>,
    pub(crate) hydrated: AHashSet<NodeId>,
    pub(crate) hydration_failed: bool,
    pub(crate) render_time: Duration,
    pub(crate) units: u64,
}

impl<I> RenderPass<I> {
    /// Lanes the node about to begin renders at.
    pub(crate) fn render_lanes(&self) -> Lanes {
        self.lane_overrides
            .last()
            .map_or(self.lanes, |(_, lanes)| *lanes)
    }

    pub(crate) fn is_hydrating(&self) -> bool {
        self.hydration.is_some()
    }
}

impl<H: HostBinding> Reconciler<H> {
    pub(crate) fn start_pass(&mut self, lanes: Lanes) {
        self.store.begin_pass();
        self.store.prepare(self.root);
        let forced = self.schedule.is_forced(lanes);
        let updaters = self.schedule.take_updaters(lanes);
        let hydration = self.hydrate.then(|| HydrationCursor {
            next: self.host.first_hydratable_child(&self.container),
            stack: Vec::new(),
        });
        tracing::debug!(
            target: "fiber.work_loop",
            lanes = %lanes,
            forced,
            hydrating = hydration.is_some(),
            "render pass started"
        );
        self.pass = Some(RenderPass {
            lanes,
            forced,
            next: Some(self.root),
            effects: EffectList::default(),
            captures: AHashMap::new(),
            created: Vec::new(),
            updaters,
            lane_overrides: Vec::new(),
            hydration,
            hydrated: AHashSet::new(),
            hydration_failed: false,
            render_time: Duration::ZERO,
            units: 0,
        });
    }

    /// Throw the pass away. The committed tree never saw it.
    pub(crate) fn abandon_pass(&mut self, reason: Abandon) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        for node in &pass.created {
            if self.store.contains(*node) && !self.store.is_committed(*node) {
                self.instances.remove(node);
                self.store.release(*node);
            }
        }
        self.store.end_pass();
        self.schedule.restore_updaters(pass.updaters);
        if reason == Abandon::Interrupted {
            self.schedule
                .record_interruption(pass.lanes, &self.policy.starvation);
            telemetry::count_abandoned_pass();
        }
        tracing::debug!(
            target: "fiber.work_loop",
            lanes = %pass.lanes,
            reason = ?reason,
            units = pass.units,
            "render pass abandoned"
        );
    }

    /// Perform units of work until the pass completes or must stop.
    pub(crate) fn work_loop(
        &mut self,
        signal: &mut dyn YieldSignal,
    ) -> Result<LoopOutcome, ReconcilerError> {
        let slice_start = self.clock.now();
        let previous_phase = self.inbox.set_phase(ExecutionPhase::Render);
        let mut did_work = false;
        let outcome = loop {
            let Some(pass) = self.pass.as_ref() else {
                break Ok(LoopOutcome::Completed);
            };
            if pass.hydration_failed {
                break Ok(LoopOutcome::HydrationFailed);
            }
            let Some(unit) = pass.next else {
                break Ok(LoopOutcome::Completed);
            };
            if did_work && !pass.forced {
                if self.inbox_preempts(pass.lanes) {
                    break Ok(LoopOutcome::Interrupted);
                }
                if signal.should_yield() {
                    break Ok(LoopOutcome::Yielded);
                }
            }
            if let Err(err) = self.perform_unit_of_work(unit) {
                break Err(err);
            }
            did_work = true;
        };
        self.inbox.set_phase(previous_phase);
        let elapsed = self.clock.now().saturating_sub(slice_start);
        if let Some(pass) = self.pass.as_mut() {
            pass.render_time += elapsed;
        }
        if matches!(outcome, Ok(LoopOutcome::Yielded)) {
            tracing::trace!(target: "fiber.work_loop", ?elapsed, "yielded");
        }
        outcome
    }

    fn pass_mut(&mut self) -> &mut RenderPass<H::Instance> {
        self.pass
            .as_mut()
            .unwrap_or_else(|| unreachable!("unit of work outside a render pass"))
    }

    fn perform_unit_of_work(&mut self, unit: NodeId) -> Result<(), ReconcilerError> {
        telemetry::count_unit_of_work();
        self.pass_mut().units += 1;
        match self.begin_work(unit) {
            Ok(Some(child)) => {
                self.pass_mut().next = Some(child);
                Ok(())
            }
            Ok(None) => self.complete_unit_of_work(unit),
            Err(UnitError::Throw(throw)) => self.handle_throw(unit, throw),
            Err(UnitError::Host(err)) => Err(ReconcilerError::Host(err)),
        }
    }

    /// Complete `unit`, then its ancestors until one has a next sibling.
    fn complete_unit_of_work(&mut self, unit: NodeId) -> Result<(), ReconcilerError> {
        let mut node = unit;
        loop {
            self.complete_work(node)?;
            if node == self.root {
                self.pass_mut().next = None;
                return Ok(());
            }
            if let Some(sibling) = self.next_sibling(node) {
                self.pass_mut().next = Some(sibling);
                return Ok(());
            }
            match self.store.parent(node) {
                Some(parent) => node = parent,
                None => {
                    self.pass_mut().next = None;
                    return Ok(());
                }
            }
        }
    }

    /// The node after `node` among its parent's work children.
    pub(crate) fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.store.parent(node)?;
        let position = self.store.work(node).position;
        let siblings = &self.store.work(parent).children;
        match siblings.get(position) {
            Some(at) if *at == node => siblings.get(position + 1).copied(),
            _ => None,
        }
    }

    // ---- throws ----

    fn handle_throw(&mut self, unit: NodeId, throw: Throw) -> Result<(), ReconcilerError> {
        if self.pass_mut().is_hydrating() {
            tracing::debug!(target: "fiber.work_loop", node = %unit, "throw while hydrating");
            self.pass_mut().hydration_failed = true;
            return Ok(());
        }
        let (boundary, capture) = match throw {
            Throw::Suspend(thenable) => {
                let Some(boundary) = self.find_boundary(unit, WorkKind::SuspenseBoundary) else {
                    return Err(ReconcilerError::Uncaught(
                        RenderError::suspended_without_boundary(thenable.label()),
                    ));
                };
                telemetry::count_suspension();
                tracing::debug!(
                    target: "fiber.boundary",
                    boundary = %boundary,
                    thrower = %unit,
                    thenable = %thenable.id(),
                    "suspension captured"
                );
                (boundary, Capture::Suspended(vec![thenable]))
            }
            Throw::Error(error) => {
                let Some(boundary) = self.find_boundary(unit, WorkKind::ClassComponent) else {
                    return Err(ReconcilerError::Uncaught(error));
                };
                tracing::debug!(
                    target: "fiber.boundary",
                    boundary = %boundary,
                    thrower = %unit,
                    error = %error,
                    "error captured"
                );
                (boundary, Capture::Error(error))
            }
        };
        self.pass_mut().captures.insert(boundary, capture);
        self.rewind_to(boundary);
        Ok(())
    }

    /// Nearest ancestor of `unit` of the boundary kind that has not already
    /// captured something this pass.
    fn find_boundary(&self, unit: NodeId, kind: WorkKind) -> Option<NodeId> {
        let pass = self.pass.as_ref()?;
        let mut cursor = self.store.parent(unit);
        while let Some(node) = cursor {
            let fiber = self.store.work(node);
            let eligible = match kind {
                WorkKind::SuspenseBoundary => fiber.kind() == WorkKind::SuspenseBoundary,
                WorkKind::ClassComponent => self.is_error_boundary(node),
                _ => false,
            };
            if eligible && !pass.captures.contains_key(&node) {
                return Some(node);
            }
            cursor = self.store.parent(node);
        }
        None
    }

    fn is_error_boundary(&self, node: NodeId) -> bool {
        match &*self.store.work(node).pending_props {
            crate::element::ElementNode::Class { component, .. } => component.is_error_boundary(),
            _ => false,
        }
    }

    fn is_strict_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.store.parent(node);
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.store.parent(parent);
        }
        false
    }

    /// Discard `boundary`'s work below it and begin it again.
    fn rewind_to(&mut self, boundary: NodeId) {
        let start = self.store.work(boundary).effect_start;
        let children = self.store.work(boundary).children.clone();
        loop {
            let top = self.pass_mut().lane_overrides.last().map(|(n, _)| *n);
            match top {
                Some(node) if self.is_strict_descendant(node, boundary) => {
                    self.pass_mut().lane_overrides.pop();
                }
                _ => break,
            }
        }
        self.pass_mut().effects.truncate(start);
        for child in children {
            self.discard_subtree(child);
        }
        self.store.restart(boundary);
        self.pass_mut().next = Some(boundary);
    }

    /// Undo work done under `node` in this pass. Committed nodes fall back to
    /// their committed version; nodes created by the pass are released.
    fn discard_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if !self.store.in_pass(node) {
                continue;
            }
            stack.extend(self.store.work(node).children.iter().copied());
            let pass = self.pass_mut();
            pass.captures.remove(&node);
            pass.hydrated.remove(&node);
            if self.store.is_committed(node) {
                self.store.unprepare(node);
            } else {
                self.instances.remove(&node);
                self.store.release(node);
            }
        }
    }
}

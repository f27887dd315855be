#![forbid(unsafe_code)]

//! The reconciler: one root, its node store and its schedule.
//!
//! # Driving work
//!
//! Nothing renders until the embedder drives the reconciler:
//!
//! - [`Reconciler::perform_work`] runs render passes cooperatively, asking a
//!   [`YieldSignal`] between units of work whether to hand control back.
//! - [`Reconciler::flush_work`] runs until no work is left.
//! - [`Reconciler::flush_sync_work`] only runs work that must not wait
//!   (the sync lane and expired lanes).
//!
//! Updates scheduled at the sync lane outside [`Reconciler::batched_updates`]
//! are flushed before the scheduling call returns.
//!
//! # Failure
//!
//! A render error no boundary captures abandons the pass, drops its lanes
//! and is returned as [`ReconcilerError::Uncaught`]; the committed tree stays
//! as it was. A host failure during commit leaves the host in an unknown
//! state, so the reconciler refuses all further work with
//! [`ReconcilerError::Poisoned`].

use std::rc::Rc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use fiber_core::{Clock, Lane, Lanes, SystemClock, ThenableId, UpdatePayload};

use crate::commit::PassiveQueue;
use crate::element::{Element, ElementNode, ElementType, Key, WorkKind};
use crate::error::{ReconcilerError, RenderError};
use crate::fiber::Fiber;
use crate::host::HostBinding;
use crate::inbox::{Scheduled, UpdateInbox};
use crate::policy_config::ReconcilerPolicy;
use crate::root::{RootSchedule, UpdaterInfo};
use crate::store::{NodeId, NodeStore};
use crate::telemetry::{CommitObserver, CommitRecord};
use crate::work_loop::{LoopOutcome, RenderPass};
use crate::yield_signal::{NeverYield, YieldSignal};

/// Construction options for a [`Reconciler`].
#[derive(Clone)]
pub struct RootOptions {
    pub policy: ReconcilerPolicy,
    pub clock: Rc<dyn Clock>,
    /// Adopt host nodes already in the container on the first render
    /// instead of creating them.
    pub hydrate: bool,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            policy: ReconcilerPolicy::default(),
            clock: Rc::new(SystemClock::new()),
            hydrate: false,
        }
    }
}

/// Result of driving work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// No work is left.
    Idle,
    /// Work remains; drive again.
    Yielded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    All,
    SyncOnly,
}

/// Why a pass was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Abandon {
    Interrupted,
    HydrationMismatch,
    Failed,
}

/// Read-only view of a committed node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: WorkKind,
    pub name: String,
    pub key: Option<Key>,
}

pub struct Reconciler<H: HostBinding> {
    pub(crate) host: H,
    pub(crate) container: H::Instance,
    pub(crate) store: NodeStore,
    pub(crate) instances: AHashMap<NodeId, H::Instance>,
    pub(crate) inbox: Rc<UpdateInbox>,
    pub(crate) root: NodeId,
    pub(crate) policy: ReconcilerPolicy,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) schedule: RootSchedule,
    pub(crate) pass: Option<RenderPass<H::Instance>>,
    pub(crate) passive: PassiveQueue,
    pub(crate) observers: Vec<Box<dyn CommitObserver>>,
    pub(crate) retry_counts: AHashMap<NodeId, u32>,
    pub(crate) retry_listeners: AHashSet<(NodeId, ThenableId, u64)>,
    pub(crate) commit_count: u64,
    pub(crate) last_commit: Option<CommitRecord>,
    pub(crate) hydrate: bool,
    pub(crate) clear_container: bool,
    batch_depth: u32,
    /// Consecutive commits whose layout callbacks scheduled more work.
    nested_updates: u32,
    poisoned: bool,
}

impl<H: HostBinding> std::fmt::Debug for Reconciler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("root", &self.root)
            .field("store", &self.store)
            .field("pending", &self.schedule.pending())
            .field("expired", &self.schedule.expired())
            .field("rendering", &self.pass.is_some())
            .field("commits", &self.commit_count)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl<H: HostBinding> Reconciler<H> {
    /// A root rendering into `container` with default options.
    pub fn new(host: H, container: H::Instance) -> Self {
        Self::with_options(host, container, RootOptions::default())
    }

    pub fn with_options(host: H, container: H::Instance, options: RootOptions) -> Self {
        let mut store = NodeStore::new();
        let mut fiber = Fiber::new(ElementType::Root, None, Rc::new(ElementNode::Empty));
        fiber.state = vec![Rc::new(Element::empty())];
        fiber.queue = fiber_core::UpdateQueue::new(fiber.state.clone());
        let root = store.create(None, fiber);
        store.commit(root);
        let hydrate = options.hydrate && host.supports_hydration();
        Self {
            host,
            container,
            store,
            instances: AHashMap::new(),
            inbox: UpdateInbox::new(),
            root,
            policy: options.policy,
            clock: options.clock,
            schedule: RootSchedule::default(),
            pass: None,
            passive: PassiveQueue::default(),
            observers: Vec::new(),
            retry_counts: AHashMap::new(),
            retry_listeners: AHashSet::new(),
            commit_count: 0,
            last_commit: None,
            hydrate,
            clear_container: false,
            batch_depth: 0,
            nested_updates: 0,
            poisoned: false,
        }
    }

    // ---- scheduling ----

    /// Render `element` as the root's content. Returns the lane used.
    pub fn update_container(&mut self, element: Element) -> Result<Lane, ReconcilerError> {
        self.ensure_healthy()?;
        let lane = self
            .inbox
            .enqueue(self.root, 0, UpdatePayload::Replace(Rc::new(element)));
        tracing::debug!(target: "fiber.scheduler", lane = %lane, "container update scheduled");
        self.flush_if_sync(lane)?;
        Ok(lane)
    }

    /// Schedule a state update on `node` at an explicit lane.
    pub fn schedule_update(
        &mut self,
        node: NodeId,
        slot: usize,
        payload: UpdatePayload,
        lane: Lane,
    ) -> Result<(), ReconcilerError> {
        self.ensure_healthy()?;
        self.inbox.enqueue_at(node, slot, payload, lane);
        self.flush_if_sync(lane)
    }

    /// Run `f` with every update it schedules assigned to `lane`.
    pub fn with_priority<R>(&mut self, lane: Lane, f: impl FnOnce(&mut Self) -> R) -> R {
        let inbox = Rc::clone(&self.inbox);
        inbox.with_priority(lane, || f(self))
    }

    /// Run `f` at the sync lane, then flush sync work.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcilerError> {
        self.ensure_healthy()?;
        self.batch_depth += 1;
        let out = self.with_priority(Lane::SYNC, f);
        self.batch_depth -= 1;
        self.flush_sync_work()?;
        Ok(out)
    }

    /// Defer sync flushing until `f` returns, so its updates commit together.
    pub fn batched_updates<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcilerError> {
        self.batch_depth += 1;
        let out = f(self);
        self.batch_depth -= 1;
        if self.batch_depth == 0 && self.inbox.most_urgent() == Some(Lane::SYNC) {
            self.flush_sync_work()?;
        }
        Ok(out)
    }

    fn flush_if_sync(&mut self, lane: Lane) -> Result<(), ReconcilerError> {
        if lane == Lane::SYNC && self.batch_depth == 0 {
            self.flush_sync_work()?;
        }
        Ok(())
    }

    // ---- driving work ----

    /// Run render passes until the signal asks to yield or no work is left.
    pub fn perform_work(
        &mut self,
        signal: &mut dyn YieldSignal,
    ) -> Result<WorkStatus, ReconcilerError> {
        self.run(signal, RunMode::All)
    }

    /// Run every pending pass to completion.
    pub fn flush_work(&mut self) -> Result<(), ReconcilerError> {
        self.run(&mut NeverYield, RunMode::All).map(|_| ())
    }

    /// Run passes that must not wait: sync and expired lanes. A concurrent
    /// pass in progress is left for later unless it has to make way.
    pub fn flush_sync_work(&mut self) -> Result<WorkStatus, ReconcilerError> {
        self.run(&mut NeverYield, RunMode::SyncOnly)
    }

    fn run(
        &mut self,
        signal: &mut dyn YieldSignal,
        mode: RunMode,
    ) -> Result<WorkStatus, ReconcilerError> {
        self.ensure_healthy()?;
        loop {
            if let Some(pass_lanes) = self.pass.as_ref().map(|p| p.lanes) {
                let now = self.clock.now();
                self.schedule.mark_starved(now);
                let forced = self.schedule.is_forced(pass_lanes);
                if let Some(pass) = self.pass.as_mut() {
                    pass.forced |= forced;
                }
                if !forced && self.inbox_preempts(pass_lanes) {
                    self.abandon_pass(Abandon::Interrupted);
                    continue;
                }
                if mode == RunMode::SyncOnly && !forced {
                    return Ok(WorkStatus::Yielded);
                }
            } else {
                self.flush_passive_effects()?;
                self.drain_inbox();
                self.schedule.mark_starved(self.clock.now());
                let Some(lanes) = self.schedule.next_lanes() else {
                    return Ok(WorkStatus::Idle);
                };
                if mode == RunMode::SyncOnly && !self.schedule.is_forced(lanes) {
                    return Ok(WorkStatus::Yielded);
                }
                self.start_pass(lanes);
            }

            let forced = self.pass.as_ref().is_some_and(|p| p.forced);
            let outcome = if forced {
                self.work_loop(&mut NeverYield)
            } else {
                self.work_loop(signal)
            };
            match outcome {
                Ok(LoopOutcome::Completed) => {
                    let committed = self.finish_pass().and_then(|()| self.track_nested_updates());
                    if let Err(err) = committed {
                        return Err(self.fail(err));
                    }
                }
                Ok(LoopOutcome::Yielded) => return Ok(WorkStatus::Yielded),
                Ok(LoopOutcome::Interrupted) => self.abandon_pass(Abandon::Interrupted),
                Ok(LoopOutcome::HydrationFailed) => {
                    tracing::warn!(
                        target: "fiber.work_loop",
                        "hydration mismatch; rendering the root from scratch"
                    );
                    self.abandon_pass(Abandon::HydrationMismatch);
                    self.hydrate = false;
                    self.clear_container = true;
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Count commits that keep scheduling work for themselves from layout
    /// callbacks. Past the policy limit the cascade's synchronous updates are
    /// dropped and the last updater is blamed.
    fn track_nested_updates(&mut self) -> Result<(), ReconcilerError> {
        let updaters = self.inbox.take_layout_updaters();
        let Some(&last) = updaters.last() else {
            self.nested_updates = 0;
            return Ok(());
        };
        self.nested_updates += 1;
        let limit = self.policy.render.max_nested_updates;
        if self.nested_updates <= limit {
            return Ok(());
        }
        self.nested_updates = 0;
        let discarded = self.inbox.discard_updates(Lanes::SYNC);
        tracing::warn!(
            target: "fiber.scheduler",
            node = %last,
            discarded,
            limit,
            "nested update limit reached"
        );
        let mut error = RenderError::maximum_update_depth(limit);
        if let Some(name) = self.component_name(last) {
            error = error.in_component(name);
        }
        Err(ReconcilerError::Uncaught(error))
    }

    fn component_name(&self, node: NodeId) -> Option<&'static str> {
        match &self.store.current(node)?.ty {
            ElementType::Function(ty) | ElementType::Class(ty) => Some(ty.name()),
            _ => None,
        }
    }

    /// Whether recorded updates outrank the pass in progress.
    pub(crate) fn inbox_preempts(&self, pass_lanes: Lanes) -> bool {
        match (self.inbox.most_urgent(), pass_lanes.highest_priority()) {
            (Some(incoming), Some(rendering)) => incoming.is_more_urgent_than(rendering),
            _ => false,
        }
    }

    fn ensure_healthy(&self) -> Result<(), ReconcilerError> {
        if self.poisoned {
            Err(ReconcilerError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Tear down after a fatal error and pass it on.
    fn fail(&mut self, err: ReconcilerError) -> ReconcilerError {
        self.nested_updates = 0;
        let lanes = self.pass.as_ref().map_or(Lanes::empty(), |p| p.lanes);
        match &err {
            ReconcilerError::Uncaught(error) => {
                tracing::error!(
                    target: "fiber.boundary",
                    error = %error,
                    lanes = %lanes,
                    "uncaught render error; pass dropped"
                );
                self.abandon_pass(Abandon::Failed);
                self.schedule.drop_lanes(lanes);
                self.store.drop_lanes(lanes);
                self.host.report_uncaught_error(error);
            }
            ReconcilerError::Host(error) => {
                tracing::error!(target: "fiber.commit", error = %error, "host failure; reconciler poisoned");
                self.poisoned = true;
                self.pass = None;
                self.store.end_pass();
            }
            ReconcilerError::Poisoned => {}
        }
        err
    }

    // ---- inbox ----

    /// Fold recorded updates into the store and mark their lanes.
    fn drain_inbox(&mut self) {
        let now = self.clock.now();
        for scheduled in self.inbox.drain() {
            match scheduled {
                Scheduled::Update { node, update } => {
                    if !self.store.contains(node) || !self.store.is_committed(node) {
                        tracing::trace!(target: "fiber.scheduler", node = %node, "update for unmounted node dropped");
                        continue;
                    }
                    let Some(lane) = update.lane.highest_priority() else {
                        continue;
                    };
                    let info = self.updater_info(node);
                    self.store.push_pending(node, update);
                    self.mark_update_lane(node, lane, now);
                    self.schedule.add_updater(lane, info);
                }
                Scheduled::Retry { boundary, attempt } => self.retry_boundary(boundary, attempt, now),
            }
        }
    }

    fn retry_boundary(&mut self, boundary: NodeId, attempt: u64, now: Duration) {
        self.retry_listeners.retain(|(b, _, a)| *b != boundary || *a != attempt);
        let Some(current) = self.store.current(boundary) else {
            return;
        };
        if !current.suspense.showing_fallback || current.suspense.attempt != attempt {
            tracing::trace!(target: "fiber.boundary", boundary = %boundary, attempt, "stale retry ignored");
            return;
        }
        let count = self.retry_counts.entry(boundary).or_insert(0);
        *count += 1;
        if *count > self.policy.render.max_immediate_retries {
            tracing::warn!(
                target: "fiber.boundary",
                boundary = %boundary,
                retries = *count,
                "boundary keeps suspending on settled data; retry skipped"
            );
            return;
        }
        tracing::debug!(target: "fiber.boundary", boundary = %boundary, attempt, "retry scheduled");
        self.mark_update_lane(boundary, Lane::RETRY, now);
    }

    /// Record work on `node` and on every ancestor's subtree lanes.
    fn mark_update_lane(&mut self, node: NodeId, lane: Lane, now: Duration) {
        self.store.mark_lanes(node, lane.lanes());
        let mut cursor = self.store.parent(node);
        while let Some(parent) = cursor {
            self.store.mark_child_lanes(parent, lane.lanes());
            cursor = self.store.parent(parent);
        }
        self.schedule
            .mark_pending(lane, now, &self.policy.starvation);
    }

    pub(crate) fn updater_info(&self, node: NodeId) -> UpdaterInfo {
        let fiber = self.store.work(node);
        UpdaterInfo {
            node,
            kind: fiber.kind(),
            name: fiber.ty.name().to_owned(),
        }
    }

    // ---- observers ----

    pub fn add_commit_observer(&mut self, observer: impl CommitObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// The record of the most recent commit.
    #[must_use]
    pub fn last_commit(&self) -> Option<&CommitRecord> {
        self.last_commit.as_ref()
    }

    // ---- inspection ----

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn container(&self) -> &H::Instance {
        &self.container
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    #[must_use]
    pub fn policy(&self) -> &ReconcilerPolicy {
        &self.policy
    }

    /// Host instance owned by a committed host node.
    #[must_use]
    pub fn instance(&self, node: NodeId) -> Option<&H::Instance> {
        self.store.current(node)?;
        self.instances.get(&node)
    }

    #[must_use]
    pub fn node_info(&self, node: NodeId) -> Option<NodeInfo> {
        let fiber = self.store.current(node)?;
        Some(NodeInfo {
            id: node,
            kind: fiber.kind(),
            name: fiber.ty.name().to_owned(),
            key: fiber.key.clone(),
        })
    }

    /// Committed children, in order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.store
            .current(node)
            .map(|f| f.children.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.store.current(node)?;
        self.store.parent(node)
    }

    /// Committed nodes whose type is named `name`, in tree order.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let Some(fiber) = self.store.current(node) else {
                continue;
            };
            if fiber.ty.name() == name {
                found.push(node);
            }
            stack.extend(fiber.children.iter().rev());
        }
        found
    }

    /// Committed state slot of a node, if it holds a `T`.
    #[must_use]
    pub fn state_of<T: 'static>(&self, node: NodeId, slot: usize) -> Option<Rc<T>> {
        let value = self.store.current(node)?.state.get(slot)?.clone();
        value.downcast::<T>().ok()
    }

    /// Whether a committed suspense boundary shows its fallback.
    #[must_use]
    pub fn is_showing_fallback(&self, boundary: NodeId) -> bool {
        self.store
            .current(boundary)
            .is_some_and(|f| f.suspense.showing_fallback)
    }

    /// Slots in use, including nodes of an in-progress pass.
    #[must_use]
    pub fn live_nodes(&self) -> usize {
        self.store.live_count()
    }

    /// Lanes with work left, counting updates not folded in yet.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        let recorded = self
            .inbox
            .most_urgent()
            .map_or(Lanes::empty(), Lane::lanes);
        self.schedule.pending() | recorded
    }

    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.pass.is_some()
            || !self.inbox.is_empty()
            || !self.schedule.pending().is_empty()
            || !self.passive.is_empty()
    }

    /// Whether a render pass is in progress.
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.pass.is_some()
    }

    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

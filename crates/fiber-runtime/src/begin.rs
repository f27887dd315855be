#![forbid(unsafe_code)]

//! Beginning work on a node: bail out or render, then reconcile children.
//!
//! A node bails out when its props are the very same allocation it last
//! committed with, it has no update at the render lanes and no boundary
//! capture to show. Bailing out reuses the committed children as they are;
//! if nothing below needs work at these lanes either, the whole subtree is
//! skipped.

use std::rc::Rc;

use fiber_core::{EffectFlags, Lane, Lanes, StateValue, Update, UpdatePayload};

use crate::component::{AnyClass, FunctionComponent};
use crate::element::{Element, ElementNode, WorkKind};
use crate::error::{RenderError, Throw};
use crate::hooks::{Hooks, RawHandle};
use crate::host::HostBinding;
use crate::reconciler::Reconciler;
use crate::store::{NodeId, QueueOutcome};
use crate::work_loop::{Capture, UnitError};

fn attribute(throw: Throw, component: &'static str) -> Throw {
    match throw {
        Throw::Error(err) => Throw::Error(err.in_component(component)),
        suspend @ Throw::Suspend(_) => suspend,
    }
}

impl<H: HostBinding> Reconciler<H> {
    pub(crate) fn begin_work(&mut self, id: NodeId) -> Result<Option<NodeId>, UnitError> {
        let Some(pass) = self.pass.as_ref() else {
            return Ok(None);
        };
        let lanes = pass.render_lanes();
        let effect_start = pass.effects.len();
        let captured = pass.captures.contains_key(&id);
        self.store.work_mut(id).effect_start = effect_start;

        if !captured && self.can_bail_out(id, lanes) {
            tracing::trace!(target: "fiber.work_loop", node = %id, "bailout");
            return Ok(self.bailout(id, lanes));
        }

        let wip = self.store.work_mut(id);
        wip.lanes -= lanes;
        wip.memoized_props = Rc::clone(&wip.pending_props);
        match wip.kind() {
            WorkKind::HostRoot => Ok(self.update_host_root(id, lanes)),
            WorkKind::HostElement => Ok(self.update_host_element(id)),
            WorkKind::HostText => {
                self.hydrate_text(id);
                Ok(None)
            }
            WorkKind::FunctionComponent => self.update_function_component(id, lanes),
            WorkKind::ClassComponent => self.update_class_component(id, lanes),
            WorkKind::Fragment => {
                let props = Rc::clone(&self.store.work(id).pending_props);
                let children = match &*props {
                    ElementNode::Fragment(children) => children.as_slice(),
                    _ => &[],
                };
                Ok(self.reconcile_children(id, children))
            }
            WorkKind::Portal => {
                if let Some(pass) = self.pass.as_mut() {
                    if pass.is_hydrating() {
                        pass.hydration_failed = true;
                    }
                }
                let props = Rc::clone(&self.store.work(id).pending_props);
                let children = match &*props {
                    ElementNode::Portal { children, .. } => children.as_slice(),
                    _ => &[],
                };
                Ok(self.reconcile_children(id, children))
            }
            WorkKind::SuspenseBoundary => Ok(self.update_suspense(id)),
            WorkKind::Offscreen => Ok(self.update_offscreen(id, lanes)),
        }
    }

    fn can_bail_out(&self, id: NodeId, lanes: Lanes) -> bool {
        let Some(current) = self.store.current(id) else {
            return false;
        };
        let wip = self.store.work(id);
        if !Rc::ptr_eq(&current.memoized_props, &wip.pending_props) || lanes.intersects(wip.lanes) {
            return false;
        }
        // A boundary showing its fallback retries its primary content itself.
        !(wip.kind() == WorkKind::SuspenseBoundary
            && current.suspense.showing_fallback
            && lanes.intersects(wip.child_lanes))
    }

    /// Reuse the committed children. Returns the first one if any work is
    /// pending below at `lanes`.
    pub(crate) fn bailout(&mut self, id: NodeId, lanes: Lanes) -> Option<NodeId> {
        let wip = self.store.work(id);
        if !lanes.intersects(wip.child_lanes) {
            return None;
        }
        let hidden_deferred = match &*wip.pending_props {
            ElementNode::Offscreen {
                hidden: true,
                deferred,
                ..
            } => Some(*deferred),
            _ => None,
        };
        let children = wip.children.clone();
        if let Some(deferred) = hidden_deferred {
            if !lanes.includes(Lane::OFFSCREEN) {
                if deferred {
                    self.defer_offscreen(id);
                }
                return None;
            }
        }
        for child in &children {
            self.store.prepare(*child);
        }
        children.first().copied()
    }

    // ---- roots and host nodes ----

    fn update_host_root(&mut self, id: NodeId, lanes: Lanes) -> Option<NodeId> {
        let outcome = self.store.process_updates(id, lanes);
        if !outcome.changed && !outcome.force_render {
            return self.bailout(id, lanes);
        }
        let element = self.root_element(id).unwrap_or_else(Element::empty);
        self.reconcile_children(id, std::slice::from_ref(&element))
    }

    fn root_element(&self, id: NodeId) -> Option<Element> {
        let state = self.store.work(id).state.first()?;
        (**state).downcast_ref::<Element>().cloned()
    }

    fn update_host_element(&mut self, id: NodeId) -> Option<NodeId> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Host(host) = &*props else {
            return None;
        };
        self.store.work_mut(id).node_ref = host.node_ref.clone();
        if !self.store.is_committed(id) {
            self.hydrate_instance(id, &host.tag, &host.props);
        }
        self.reconcile_children(id, &host.children)
    }

    // ---- components ----

    fn update_function_component(
        &mut self,
        id: NodeId,
        lanes: Lanes,
    ) -> Result<Option<NodeId>, UnitError> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Function { component, .. } = &*props else {
            return Ok(None);
        };
        let mounting = !self.store.is_committed(id);
        if !mounting {
            let outcome = self.store.process_updates(id, lanes);
            let same_props = self
                .store
                .current(id)
                .is_some_and(|c| Rc::ptr_eq(&c.memoized_props, &props));
            if same_props && !outcome.changed && !outcome.force_render {
                return Ok(self.bailout(id, lanes));
            }
        }
        let element = self.render_function(id, component.as_ref(), mounting)?;
        Ok(self.reconcile_children(id, std::slice::from_ref(&element)))
    }

    /// Render a function component, restarting while it schedules updates
    /// to itself during render.
    fn render_function(
        &mut self,
        id: NodeId,
        component: &dyn FunctionComponent,
        mounting: bool,
    ) -> Result<Element, UnitError> {
        let name = component.name();
        let limit = self.policy.render.max_render_phase_restarts;
        let inbox = Rc::clone(&self.inbox);
        let mut restarts = 0;
        let mut rerender = false;
        loop {
            inbox.begin_render(id);
            let (output, hooks) = {
                let wip = self.store.work_mut(id);
                let mut hooks = Hooks::new(
                    id,
                    &mut wip.hooks,
                    &mut wip.state,
                    &inbox,
                    mounting && !rerender,
                    rerender,
                );
                let output = component.render(&mut hooks);
                (output, hooks.finish())
            };
            let render_phase = inbox.end_render();
            let element = output.map_err(|t| attribute(t, name))?;
            let flags = hooks.map_err(|e| e.in_component(name))?;

            let wip = self.store.work_mut(id);
            wip.queue.adopt_new_slots(&wip.state);
            if render_phase.is_empty() {
                wip.flags |= flags;
                return Ok(element);
            }
            restarts += 1;
            if restarts > limit {
                return Err(RenderError::too_many_rerenders(name, limit).into());
            }
            tracing::trace!(target: "fiber.work_loop", node = %id, restarts, "render-phase update; rendering again");
            for update in &render_phase {
                update.apply(&mut wip.state);
                wip.queue.record_applied(update, &wip.state);
            }
            rerender = true;
        }
    }

    fn update_class_component(
        &mut self,
        id: NodeId,
        lanes: Lanes,
    ) -> Result<Option<NodeId>, UnitError> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Class { component, .. } = &*props else {
            return Ok(None);
        };
        let component: &dyn AnyClass = component.as_ref();
        let mounting = !self.store.is_committed(id);
        let caught = match self.pass.as_ref().and_then(|p| p.captures.get(&id)) {
            Some(Capture::Error(err)) => Some(err.clone()),
            _ => None,
        };

        let mut outcome = QueueOutcome::default();
        if mounting {
            let wip = self.store.work_mut(id);
            if wip.state.is_empty() {
                wip.state = vec![component.initial_state()];
                wip.queue = fiber_core::UpdateQueue::new(wip.state.clone());
            }
        } else {
            outcome = self.store.process_updates(id, lanes);
        }

        let wip = self.store.work_mut(id);
        if let Some(err) = &caught {
            if let Some(next) = component.derived_state_from_error(&wip.state[0], err) {
                let update = Update::new(Lanes::empty(), 0, UpdatePayload::Replace(next), 0);
                update.apply(&mut wip.state);
                wip.queue.record_applied(&update, &wip.state);
            }
            wip.caught = Some(err.clone());
            wip.flags |= EffectFlags::DID_CAPTURE;
        } else if !mounting {
            let same_props = self
                .store
                .current(id)
                .is_some_and(|c| Rc::ptr_eq(&c.memoized_props, &props));
            if same_props && !outcome.changed && !outcome.force_render {
                return Ok(self.bailout(id, lanes));
            }
        }

        let wip = self.store.work_mut(id);
        wip.flags |= if mounting {
            EffectFlags::CALLBACK
        } else {
            EffectFlags::CALLBACK | EffectFlags::SNAPSHOT
        };
        let element = self.render_class(id, component)?;
        Ok(self.reconcile_children(id, std::slice::from_ref(&element)))
    }

    /// Render a class component, restarting while its render sets its own
    /// state. Shares the restart limit with function components.
    fn render_class(
        &mut self,
        id: NodeId,
        component: &dyn AnyClass,
    ) -> Result<Element, UnitError> {
        let name = component.name();
        let limit = self.policy.render.max_render_phase_restarts;
        let inbox = Rc::clone(&self.inbox);
        let handle = RawHandle::new(id, &inbox);
        let mut restarts = 0;
        loop {
            let state: StateValue = Rc::clone(&self.store.work(id).state[0]);
            inbox.begin_render(id);
            let output = component.render(&state, &handle);
            let render_phase = inbox.end_render();
            let element = output.map_err(|t| attribute(t, name))?;
            if render_phase.is_empty() {
                return Ok(element);
            }
            restarts += 1;
            if restarts > limit {
                return Err(RenderError::too_many_rerenders(name, limit).into());
            }
            tracing::trace!(
                target: "fiber.work_loop",
                node = %id,
                restarts,
                "class set its own state while rendering; rendering again"
            );
            let wip = self.store.work_mut(id);
            for update in &render_phase {
                update.apply(&mut wip.state);
                wip.queue.record_applied(update, &wip.state);
            }
        }
    }

    // ---- suspense and offscreen ----

    fn update_suspense(&mut self, id: NodeId) -> Option<NodeId> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Suspense { children, fallback } = &*props else {
            return None;
        };
        let suspended = match self.pass.as_ref().and_then(|p| p.captures.get(&id)) {
            Some(Capture::Suspended(thenables)) => Some(thenables.clone()),
            _ => None,
        };
        let current = self.store.current(id);
        let previous_attempt = current.map_or(0, |c| c.suspense.attempt);
        let primary_committed = current
            .and_then(|c| c.children.first())
            .and_then(|child| self.store.current(*child))
            .is_some_and(|child| child.kind() == WorkKind::Offscreen);

        let wip = self.store.work_mut(id);
        let elements = match suspended {
            Some(thenables) => {
                wip.suspense.showing_fallback = true;
                wip.suspense.waiting_on = thenables;
                wip.suspense.attempt = previous_attempt + 1;
                wip.flags |= EffectFlags::RETRY | EffectFlags::DID_CAPTURE;
                let primary = if primary_committed {
                    Element::primary(true, children.clone())
                } else {
                    Element::empty()
                };
                [primary, Element::fragment(fallback.iter().cloned())]
            }
            None => {
                wip.suspense.showing_fallback = false;
                wip.suspense.waiting_on.clear();
                [Element::primary(false, children.clone()), Element::empty()]
            }
        };
        self.reconcile_children(id, &elements)
    }

    fn update_offscreen(&mut self, id: NodeId, lanes: Lanes) -> Option<NodeId> {
        let props = Rc::clone(&self.store.work(id).pending_props);
        let ElementNode::Offscreen {
            hidden,
            deferred,
            children,
        } = &*props
        else {
            return None;
        };
        let was_hidden = self.store.current(id).map(|c| c.hidden);
        self.store.work_mut(id).hidden = *hidden;

        let revealing = !*hidden && was_hidden == Some(true);
        if *hidden {
            if !*deferred {
                return None;
            }
            if !lanes.includes(Lane::OFFSCREEN) {
                self.defer_offscreen(id);
                return None;
            }
        }
        if *hidden || revealing {
            // Work skipped while hidden was left at other lanes.
            let widened = lanes | Lanes::UPDATE_LANES | Lanes::RETRY;
            if let Some(pass) = self.pass.as_mut() {
                pass.lane_overrides.push((id, widened));
            }
        }
        self.reconcile_children(id, children)
    }

    /// Leave hidden content for a later pass at the offscreen lane.
    fn defer_offscreen(&mut self, id: NodeId) {
        self.store.work_mut(id).lanes |= Lanes::OFFSCREEN;
        let Some(pass) = self.pass.as_ref() else {
            return;
        };
        let updaters: Vec<_> = pass.updaters.iter().map(|(_, info)| info.clone()).collect();
        for info in updaters {
            self.schedule.add_updater(Lane::OFFSCREEN, info);
        }
        tracing::trace!(target: "fiber.work_loop", node = %id, "hidden content deferred");
    }
}

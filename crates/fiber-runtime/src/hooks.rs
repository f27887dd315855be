#![forbid(unsafe_code)]

//! Hook state for function components.
//!
//! Hooks are identified by call order. The first render of a node appends
//! one [`HookSlot`] per hook call; later renders walk the same list and must
//! make the same calls in the same order. A mismatch is reported as a render
//! error once the component returns.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use fiber_core::{EffectFlags, StateValue, UpdatePayload};

use crate::error::RenderError;
use crate::inbox::UpdateInbox;
use crate::store::NodeId;

/// Teardown returned by an effect.
pub type Cleanup = Box<dyn FnOnce()>;

pub(crate) type EffectFn = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Dependency lists compared across renders.
pub(crate) trait Deps {
    fn same(&self, other: &dyn Deps) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PartialEq + 'static> Deps for T {
    fn same(&self, other: &dyn Deps) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectKind {
    /// Runs after the commit, before the next render pass.
    Passive,
    /// Runs synchronously during the commit's layout phase.
    Layout,
}

impl EffectKind {
    fn flag(self) -> EffectFlags {
        match self {
            Self::Passive => EffectFlags::PASSIVE,
            Self::Layout => EffectFlags::LAYOUT,
        }
    }
}

#[derive(Clone)]
pub(crate) struct EffectHook {
    pub(crate) kind: EffectKind,
    deps: Option<Rc<dyn Deps>>,
    pub(crate) create: Rc<RefCell<Option<EffectFn>>>,
    pub(crate) destroy: Rc<RefCell<Option<Cleanup>>>,
    /// Whether this render asked for the effect to (re)run.
    pub(crate) pending: bool,
}

impl EffectHook {
    /// Run the teardown left by the previous run, if any.
    pub(crate) fn run_destroy(&self) {
        let cleanup = self.destroy.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    pub(crate) fn run_create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let cleanup = create();
            *self.destroy.borrow_mut() = cleanup;
        }
    }
}

#[derive(Clone)]
pub(crate) enum HookSlot {
    State { slot: usize },
    Ref(Rc<dyn Any>),
    Memo { deps: Rc<dyn Deps>, value: Rc<dyn Any> },
    Effect(EffectHook),
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State { slot } => write!(f, "State({slot})"),
            Self::Ref(_) => f.write_str("Ref"),
            Self::Memo { .. } => f.write_str("Memo"),
            Self::Effect(hook) => write!(f, "Effect({:?}, pending={})", hook.kind, hook.pending),
        }
    }
}

/// Untyped address of a node's state.
#[derive(Debug, Clone)]
pub struct RawHandle {
    node: NodeId,
    inbox: Weak<UpdateInbox>,
}

impl RawHandle {
    pub(crate) fn new(node: NodeId, inbox: &Rc<UpdateInbox>) -> Self {
        Self {
            node,
            inbox: Rc::downgrade(inbox),
        }
    }

    /// A handle whose updates go nowhere.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            node: NodeId::new(0, 0),
            inbox: Weak::new(),
        }
    }

    pub(crate) fn typed<T: 'static>(&self, slot: usize) -> StateHandle<T> {
        StateHandle {
            raw: self.clone(),
            slot,
            _marker: PhantomData,
        }
    }
}

/// Schedules updates to one state slot of a node.
///
/// Handles stay valid after the render that produced them; updates to an
/// unmounted node are dropped.
pub struct StateHandle<T> {
    raw: RawHandle,
    slot: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            slot: self.slot,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for StateHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("node", &self.raw.node)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<T: 'static> StateHandle<T> {
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.raw.node
    }

    fn send(&self, payload: UpdatePayload) {
        if let Some(inbox) = self.raw.inbox.upgrade() {
            inbox.enqueue(self.raw.node, self.slot, payload);
        }
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.send(UpdatePayload::Replace(Rc::new(value)));
    }

    /// Compute the next value from whatever the previous one turns out to be.
    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        self.send(UpdatePayload::Reduce(Rc::new(move |prev: &StateValue| {
            match (**prev).downcast_ref::<T>() {
                Some(prev) => Rc::new(f(prev)) as StateValue,
                None => prev.clone(),
            }
        })));
    }

    /// Re-render the node without changing state.
    pub fn force(&self) {
        self.send(UpdatePayload::ForceRender);
    }
}

/// Render context handed to function components.
pub struct Hooks<'a> {
    node: NodeId,
    slots: &'a mut Vec<HookSlot>,
    state: &'a mut Vec<StateValue>,
    inbox: &'a Rc<UpdateInbox>,
    cursor: usize,
    mounting: bool,
    rerender: bool,
    flags: EffectFlags,
    error: Option<RenderError>,
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        node: NodeId,
        slots: &'a mut Vec<HookSlot>,
        state: &'a mut Vec<StateValue>,
        inbox: &'a Rc<UpdateInbox>,
        mounting: bool,
        rerender: bool,
    ) -> Self {
        Self {
            node,
            slots,
            state,
            inbox,
            cursor: 0,
            mounting,
            rerender,
            flags: EffectFlags::empty(),
            error: None,
        }
    }

    /// The node being rendered.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Effect flags requested by this render, or the hook-order violation.
    pub(crate) fn finish(mut self) -> Result<EffectFlags, RenderError> {
        if !self.mounting && self.cursor < self.slots.len() && self.error.is_none() {
            self.error = Some(RenderError::new(
                "rendered fewer hooks than during the previous render",
            ));
        }
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.flags),
        }
    }

    fn mismatch(&mut self, hook: &'static str) {
        if self.error.is_none() {
            self.error = Some(RenderError::new(format!(
                "hook #{} changed between renders (expected {hook})",
                self.cursor
            )));
        }
    }

    /// Advance the cursor. `Some(index)` points at an existing slot;
    /// `None` means the caller must append (mounting) or fail.
    fn next_index(&mut self, hook: &'static str) -> Option<usize> {
        let index = self.cursor;
        self.cursor += 1;
        if index < self.slots.len() {
            return Some(index);
        }
        if !self.mounting {
            self.mismatch(hook);
        }
        None
    }

    /// State that survives re-renders. The setter schedules an update.
    pub fn use_state<T: 'static>(&mut self, init: impl FnOnce() -> T) -> (Rc<T>, StateHandle<T>) {
        let raw = RawHandle::new(self.node, self.inbox);
        match self.next_index("use_state") {
            Some(index) => {
                if let HookSlot::State { slot } = self.slots[index] {
                    if let Ok(value) = self.state[slot].clone().downcast::<T>() {
                        return (value, raw.typed(slot));
                    }
                }
                self.mismatch("use_state");
                (Rc::new(init()), raw.typed(usize::MAX))
            }
            None => {
                let value = Rc::new(init());
                let slot = self.state.len();
                self.state.push(value.clone());
                self.slots.push(HookSlot::State { slot });
                (value, raw.typed(slot))
            }
        }
    }

    /// A mutable box with a stable identity across renders.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        match self.next_index("use_ref") {
            Some(index) => {
                if let HookSlot::Ref(value) = &self.slots[index] {
                    if let Ok(cell) = value.clone().downcast::<RefCell<T>>() {
                        return cell;
                    }
                }
                self.mismatch("use_ref");
                Rc::new(RefCell::new(init()))
            }
            None => {
                let cell = Rc::new(RefCell::new(init()));
                self.slots.push(HookSlot::Ref(cell.clone()));
                cell
            }
        }
    }

    /// A value recomputed only when `deps` change.
    pub fn use_memo<D, T>(&mut self, deps: D, compute: impl FnOnce() -> T) -> Rc<T>
    where
        D: PartialEq + 'static,
        T: 'static,
    {
        match self.next_index("use_memo") {
            Some(index) => {
                if let HookSlot::Memo { deps: prev, value } = &mut self.slots[index] {
                    if prev.same(&deps) {
                        if let Ok(value) = value.clone().downcast::<T>() {
                            return value;
                        }
                    }
                    let fresh = Rc::new(compute());
                    *prev = Rc::new(deps);
                    *value = fresh.clone();
                    return fresh;
                }
                self.mismatch("use_memo");
                Rc::new(compute())
            }
            None => {
                let value = Rc::new(compute());
                self.slots.push(HookSlot::Memo {
                    deps: Rc::new(deps),
                    value: value.clone(),
                });
                value
            }
        }
    }

    /// Run `create` after commit whenever `deps` change. `()` runs once.
    pub fn use_effect<D, F>(&mut self, deps: D, create: F)
    where
        D: PartialEq + 'static,
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.push_effect(EffectKind::Passive, Some(Rc::new(deps)), Box::new(create));
    }

    /// Run `create` after every commit of this node.
    pub fn use_effect_always<F>(&mut self, create: F)
    where
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.push_effect(EffectKind::Passive, None, Box::new(create));
    }

    /// Like [`Hooks::use_effect`] but runs during the commit's layout phase.
    pub fn use_layout_effect<D, F>(&mut self, deps: D, create: F)
    where
        D: PartialEq + 'static,
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.push_effect(EffectKind::Layout, Some(Rc::new(deps)), Box::new(create));
    }

    pub fn use_layout_effect_always<F>(&mut self, create: F)
    where
        F: FnOnce() -> Option<Cleanup> + 'static,
    {
        self.push_effect(EffectKind::Layout, None, Box::new(create));
    }

    fn push_effect(&mut self, kind: EffectKind, deps: Option<Rc<dyn Deps>>, create: EffectFn) {
        let hook_name = match kind {
            EffectKind::Passive => "use_effect",
            EffectKind::Layout => "use_layout_effect",
        };
        match self.next_index(hook_name) {
            Some(index) => {
                let rerender = self.rerender;
                let HookSlot::Effect(hook) = &mut self.slots[index] else {
                    self.mismatch(hook_name);
                    return;
                };
                if hook.kind != kind {
                    self.mismatch(hook_name);
                    return;
                }
                let changed = match (&hook.deps, &deps) {
                    (Some(prev), Some(next)) => !prev.same(next.as_ref()),
                    _ => true,
                };
                hook.pending = changed || (rerender && hook.pending);
                hook.deps = deps;
                hook.create = Rc::new(RefCell::new(Some(create)));
                if hook.pending {
                    self.flags |= kind.flag();
                }
            }
            None => {
                self.slots.push(HookSlot::Effect(EffectHook {
                    kind,
                    deps,
                    create: Rc::new(RefCell::new(Some(create))),
                    destroy: Rc::new(RefCell::new(None)),
                    pending: true,
                }));
                self.flags |= kind.flag();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixture {
        slots: Vec<HookSlot>,
        state: Vec<StateValue>,
        inbox: Rc<UpdateInbox>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                slots: Vec::new(),
                state: Vec::new(),
                inbox: UpdateInbox::new(),
            }
        }

        fn hooks(&mut self, mounting: bool) -> Hooks<'_> {
            Hooks::new(
                NodeId::new(1, 0),
                &mut self.slots,
                &mut self.state,
                &self.inbox,
                mounting,
                false,
            )
        }
    }

    #[test]
    fn state_is_read_back_on_update() {
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        let (value, _set) = hooks.use_state(|| 41);
        assert_eq!(*value, 41);
        assert!(hooks.finish().is_ok());

        fx.state[0] = Rc::new(42);
        let mut hooks = fx.hooks(false);
        let (value, _set) = hooks.use_state(|| 0);
        assert_eq!(*value, 42);
        assert!(hooks.finish().is_ok());
    }

    #[test]
    fn ref_identity_is_stable() {
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        let first = hooks.use_ref(|| 0u32);
        drop(hooks);
        let mut hooks = fx.hooks(false);
        let second = hooks.use_ref(|| 99u32);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(*second.borrow(), 0);
    }

    #[test]
    fn effect_reruns_only_when_deps_change() {
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        hooks.use_effect(1, || None);
        assert_eq!(hooks.finish(), Ok(EffectFlags::PASSIVE));

        let mut hooks = fx.hooks(false);
        hooks.use_effect(1, || None);
        assert_eq!(hooks.finish(), Ok(EffectFlags::empty()));

        let mut hooks = fx.hooks(false);
        hooks.use_effect(2, || None);
        assert_eq!(hooks.finish(), Ok(EffectFlags::PASSIVE));
    }

    #[test]
    fn effect_cleanup_runs_before_next_create() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        let l = Rc::clone(&log);
        hooks.use_layout_effect((), move || {
            l.borrow_mut().push("create");
            let l = Rc::clone(&l);
            Some(Box::new(move || l.borrow_mut().push("destroy")) as Cleanup)
        });
        drop(hooks);
        let HookSlot::Effect(hook) = &fx.slots[0] else {
            panic!("expected effect hook");
        };
        hook.run_destroy();
        hook.run_create();
        hook.run_destroy();
        assert_eq!(*log.borrow(), vec!["create", "destroy"]);
    }

    #[test]
    fn changed_hook_order_is_an_error() {
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        hooks.use_state(|| 1);
        drop(hooks);
        let mut hooks = fx.hooks(false);
        hooks.use_ref(|| 1);
        assert!(hooks.finish().is_err());
    }

    #[test]
    fn extra_hooks_after_mount_are_an_error() {
        let mut fx = Fixture::new();
        let hooks = fx.hooks(true);
        assert!(hooks.finish().is_ok());
        let mut hooks = fx.hooks(false);
        hooks.use_state(|| 1);
        assert!(hooks.finish().is_err());
    }

    #[test]
    fn memo_recomputes_on_dep_change() {
        let calls = Rc::new(Cell::new(0));
        let mut fx = Fixture::new();
        for (mounting, dep) in [(true, 1), (false, 1), (false, 2)] {
            let mut hooks = fx.hooks(mounting);
            let c = Rc::clone(&calls);
            hooks.use_memo(dep, move || c.set(c.get() + 1));
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn setter_records_into_inbox() {
        let mut fx = Fixture::new();
        let mut hooks = fx.hooks(true);
        let (_v, set) = hooks.use_state(|| 0);
        drop(hooks);
        set.set(5);
        set.update(|v| v + 1);
        assert_eq!(fx.inbox.drain().len(), 2);
    }
}

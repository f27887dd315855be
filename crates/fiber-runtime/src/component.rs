#![forbid(unsafe_code)]

//! Component traits.
//!
//! Function components render from hook-managed state ([`Hooks`]); class
//! components own a single typed state value and receive lifecycle
//! callbacks. Both are type-erased behind `Rc<dyn ...>` inside elements.

use std::any::{Any, type_name};
use std::rc::Rc;

use fiber_core::StateValue;

use crate::element::Element;
use crate::error::{RenderError, Throw};
use crate::hooks::{Hooks, RawHandle, StateHandle};
use crate::store::NodeId;

/// Result of rendering a component.
pub type RenderResult = Result<Element, Throw>;

/// Last path segment of a type name, without generics.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A component rendered from props (`self`) and hook state.
pub trait FunctionComponent: 'static {
    fn render(&self, hooks: &mut Hooks<'_>) -> RenderResult;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}

/// A function component backed by a closure.
pub struct FnComponent<F> {
    name: &'static str,
    render: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&mut Hooks<'_>) -> RenderResult + 'static,
{
    pub fn new(name: &'static str, render: F) -> Self {
        Self { name, render }
    }
}

impl<F> FunctionComponent for FnComponent<F>
where
    F: Fn(&mut Hooks<'_>) -> RenderResult + 'static,
{
    fn render(&self, hooks: &mut Hooks<'_>) -> RenderResult {
        (self.render)(hooks)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Handle given to class components for scheduling state changes.
pub struct ClassContext<S: 'static> {
    handle: StateHandle<S>,
}

impl<S: 'static> ClassContext<S> {
    pub fn set_state(&self, state: S) {
        self.handle.set(state);
    }

    pub fn update_state(&self, f: impl Fn(&S) -> S + 'static) {
        self.handle.update(f);
    }

    /// Re-render without changing state.
    pub fn force_update(&self) {
        self.handle.force();
    }

    /// A handle that outlives this callback.
    #[must_use]
    pub fn handle(&self) -> StateHandle<S> {
        self.handle.clone()
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.handle.node()
    }
}

/// A component with typed state and lifecycle callbacks.
///
/// Setting [`ClassComponent::ERROR_BOUNDARY`] makes the component catch
/// render errors thrown below it: it re-renders with the state returned by
/// [`ClassComponent::derived_state_from_error`] and gets
/// [`ClassComponent::did_catch`] during the layout phase.
pub trait ClassComponent: 'static {
    type State: 'static;

    const ERROR_BOUNDARY: bool = false;

    fn initial_state(&self) -> Self::State;

    fn render(&self, state: &Self::State, cx: &ClassContext<Self::State>) -> RenderResult;

    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }

    fn derived_state_from_error(
        &self,
        _state: &Self::State,
        _error: &RenderError,
    ) -> Option<Self::State> {
        None
    }

    fn did_mount(&self, _state: &Self::State, _cx: &ClassContext<Self::State>) {}

    fn did_update(
        &self,
        _prev_props: &Self,
        _prev_state: &Self::State,
        _state: &Self::State,
        _snapshot: Option<&dyn Any>,
        _cx: &ClassContext<Self::State>,
    ) {
    }

    fn will_unmount(&self, _state: &Self::State) {}

    /// Captured before any host mutation of the commit.
    fn snapshot_before_update(
        &self,
        _prev_props: &Self,
        _prev_state: &Self::State,
        _state: &Self::State,
    ) -> Option<Box<dyn Any>> {
        None
    }

    fn did_catch(&self, _error: &RenderError, _state: &Self::State, _cx: &ClassContext<Self::State>) {}
}

/// Type-erased view of a [`ClassComponent`].
#[doc(hidden)]
pub trait AnyClass {
    fn name(&self) -> &'static str;
    fn is_error_boundary(&self) -> bool;
    fn initial_state(&self) -> StateValue;
    fn render(&self, state: &StateValue, raw: &RawHandle) -> RenderResult;
    fn derived_state_from_error(&self, state: &StateValue, error: &RenderError)
    -> Option<StateValue>;
    fn did_mount(&self, state: &StateValue, raw: &RawHandle);
    fn did_update(
        &self,
        prev: &dyn AnyClass,
        prev_state: &StateValue,
        state: &StateValue,
        snapshot: Option<&dyn Any>,
        raw: &RawHandle,
    );
    fn will_unmount(&self, state: &StateValue);
    fn snapshot_before_update(
        &self,
        prev: &dyn AnyClass,
        prev_state: &StateValue,
        state: &StateValue,
    ) -> Option<Box<dyn Any>>;
    fn did_catch(&self, error: &RenderError, state: &StateValue, raw: &RawHandle);
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct ClassWrapper<C>(pub(crate) C);

impl<C: ClassComponent> ClassWrapper<C> {
    fn context(raw: &RawHandle) -> ClassContext<C::State> {
        ClassContext {
            handle: raw.typed(0),
        }
    }
}

fn typed<S: 'static>(state: &StateValue) -> Option<&S> {
    (**state).downcast_ref::<S>()
}

impl<C: ClassComponent> AnyClass for ClassWrapper<C> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn is_error_boundary(&self) -> bool {
        C::ERROR_BOUNDARY
    }

    fn initial_state(&self) -> StateValue {
        Rc::new(self.0.initial_state())
    }

    fn render(&self, state: &StateValue, raw: &RawHandle) -> RenderResult {
        let Some(state) = typed::<C::State>(state) else {
            return Err(RenderError::new("class state has an unexpected type")
                .in_component(self.0.name())
                .into());
        };
        self.0.render(state, &Self::context(raw))
    }

    fn derived_state_from_error(
        &self,
        state: &StateValue,
        error: &RenderError,
    ) -> Option<StateValue> {
        let state = typed::<C::State>(state)?;
        self.0
            .derived_state_from_error(state, error)
            .map(|next| Rc::new(next) as StateValue)
    }

    fn did_mount(&self, state: &StateValue, raw: &RawHandle) {
        if let Some(state) = typed::<C::State>(state) {
            self.0.did_mount(state, &Self::context(raw));
        }
    }

    fn did_update(
        &self,
        prev: &dyn AnyClass,
        prev_state: &StateValue,
        state: &StateValue,
        snapshot: Option<&dyn Any>,
        raw: &RawHandle,
    ) {
        let prev_props = prev.as_any().downcast_ref::<Self>().map(|p| &p.0);
        if let (Some(prev_props), Some(prev_state), Some(state)) = (
            prev_props,
            typed::<C::State>(prev_state),
            typed::<C::State>(state),
        ) {
            self.0
                .did_update(prev_props, prev_state, state, snapshot, &Self::context(raw));
        }
    }

    fn will_unmount(&self, state: &StateValue) {
        if let Some(state) = typed::<C::State>(state) {
            self.0.will_unmount(state);
        }
    }

    fn snapshot_before_update(
        &self,
        prev: &dyn AnyClass,
        prev_state: &StateValue,
        state: &StateValue,
    ) -> Option<Box<dyn Any>> {
        let prev_props = prev.as_any().downcast_ref::<Self>().map(|p| &p.0)?;
        self.0.snapshot_before_update(
            prev_props,
            typed::<C::State>(prev_state)?,
            typed::<C::State>(state)?,
        )
    }

    fn did_catch(&self, error: &RenderError, state: &StateValue, raw: &RawHandle) {
        if let Some(state) = typed::<C::State>(state) {
            self.0.did_catch(error, state, &Self::context(raw));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

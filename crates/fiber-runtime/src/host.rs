#![forbid(unsafe_code)]

//! The boundary between the reconciler and a concrete output tree.
//!
//! The reconciler never touches host objects directly: it creates, links,
//! updates and hides them through [`HostBinding`]. All mutating calls happen
//! during the commit phase, except instance creation and initial-child
//! appends, which run while completing nodes (the instances are detached
//! until a placement inserts them).

use fiber_core::{PropDiff, Props};

use crate::element::PortalTarget;
use crate::error::{HostError, RenderError};

/// A host environment (DOM, terminal, test double, ...).
pub trait HostBinding {
    /// Host node or container handle. Cloning must be cheap and yield a
    /// handle to the same host node.
    type Instance: Clone + std::fmt::Debug;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<Self::Instance, HostError>;

    fn create_text_instance(&mut self, text: &str) -> Result<Self::Instance, HostError>;

    /// Link a child into a parent that is not attached yet.
    fn append_initial_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Called once a new instance has all its children. Returning `true`
    /// requests [`HostBinding::commit_mount`] after it is attached.
    fn finalize_initial_children(
        &mut self,
        _instance: &Self::Instance,
        _tag: &str,
        _props: &Props,
    ) -> bool {
        false
    }

    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance)
    -> Result<(), HostError>;

    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    ) -> Result<(), HostError>;

    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance)
    -> Result<(), HostError>;

    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        tag: &str,
        diff: &PropDiff,
    ) -> Result<(), HostError>;

    fn commit_text_update(
        &mut self,
        instance: &Self::Instance,
        old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError>;

    fn commit_mount(
        &mut self,
        _instance: &Self::Instance,
        _tag: &str,
        _props: &Props,
    ) -> Result<(), HostError> {
        Ok(())
    }

    fn hide_instance(&mut self, instance: &Self::Instance) -> Result<(), HostError>;

    fn unhide_instance(&mut self, instance: &Self::Instance) -> Result<(), HostError>;

    /// Capture host state (selection, focus, ...) before any mutation.
    fn prepare_for_commit(&mut self) -> Result<(), HostError> {
        Ok(())
    }

    /// Restore what [`HostBinding::prepare_for_commit`] captured.
    fn reset_after_commit(&mut self) -> Result<(), HostError> {
        Ok(())
    }

    /// Remove everything from `container`; used before a client render
    /// replaces content that failed to hydrate.
    fn clear_container(&mut self, _container: &Self::Instance) -> Result<(), HostError> {
        Ok(())
    }

    /// Resolve the container a portal renders into.
    fn portal_container(&mut self, target: &PortalTarget) -> Result<Self::Instance, HostError> {
        Err(HostError::new(
            "portal_container",
            format!("portal target `{}` is not supported", target.name()),
        ))
    }

    /// A render error reached the root without a boundary.
    fn report_uncaught_error(&mut self, _error: &RenderError) {}

    fn supports_hydration(&self) -> bool {
        false
    }

    fn first_hydratable_child(&self, _parent: &Self::Instance) -> Option<Self::Instance> {
        None
    }

    fn next_hydratable_sibling(&self, _instance: &Self::Instance) -> Option<Self::Instance> {
        None
    }

    fn can_hydrate_instance(&self, _instance: &Self::Instance, _tag: &str, _props: &Props) -> bool {
        false
    }

    fn can_hydrate_text_instance(&self, _instance: &Self::Instance, _text: &str) -> bool {
        false
    }
}

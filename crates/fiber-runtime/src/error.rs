#![forbid(unsafe_code)]

//! Error types.
//!
//! Three failure families flow through the reconciler:
//!
//! - [`Throw`] is what a component's render returns instead of an element:
//!   either a suspension on a [`Thenable`] or a [`RenderError`]. Throws are
//!   routed to the nearest capable boundary and never escape on their own.
//! - [`HostError`] comes out of a [`HostBinding`](crate::HostBinding)
//!   operation. It is fatal: the reconciler poisons itself.
//! - [`ReconcilerError`] is what embedders see from the public API.

use std::fmt;
use std::rc::Rc;

use fiber_core::Thenable;

/// A failure raised while rendering a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    message: Rc<str>,
    component: Option<&'static str>,
}

impl RenderError {
    #[must_use]
    pub fn new(message: impl AsRef<str>) -> Self {
        Self {
            message: Rc::from(message.as_ref()),
            component: None,
        }
    }

    /// Attribute the error to a component, keeping an existing attribution.
    #[must_use]
    pub fn in_component(mut self, name: &'static str) -> Self {
        self.component.get_or_insert(name);
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn component(&self) -> Option<&'static str> {
        self.component
    }

    pub(crate) fn too_many_rerenders(component: &'static str, limit: u32) -> Self {
        Self::new(format!(
            "too many re-renders: render-phase updates did not settle after {limit} restarts"
        ))
        .in_component(component)
    }

    pub(crate) fn maximum_update_depth(limit: u32) -> Self {
        Self::new(format!(
            "maximum update depth exceeded: {limit} commits in a row scheduled synchronous updates from layout callbacks"
        ))
    }

    pub(crate) fn suspended_without_boundary(label: &str) -> Self {
        Self::new(format!(
            "a component suspended on `{label}` but no suspense boundary was found"
        ))
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RenderError {}

/// Non-element outcome of a render.
#[derive(Debug, Clone)]
pub enum Throw {
    /// The component is waiting on an asynchronous dependency.
    Suspend(Thenable),
    /// The component failed.
    Error(RenderError),
}

impl From<RenderError> for Throw {
    fn from(err: RenderError) -> Self {
        Self::Error(err)
    }
}

impl From<Thenable> for Throw {
    fn from(thenable: Thenable) -> Self {
        Self::Suspend(thenable)
    }
}

/// A failed host operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    operation: &'static str,
    message: String,
}

impl HostError {
    #[must_use]
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    /// The host method that failed, e.g. `insert_before`.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host operation `{}` failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for HostError {}

/// Errors surfaced by the reconciler's public API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerError {
    /// A render error (or a suspension) reached the root without a boundary.
    /// The lanes of the failed pass were dropped.
    Uncaught(RenderError),
    /// A host operation failed; the reconciler is now poisoned.
    Host(HostError),
    /// A previous host failure left the host in an unknown state.
    Poisoned,
}

impl fmt::Display for ReconcilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncaught(e) => write!(f, "uncaught render error: {e}"),
            Self::Host(e) => write!(f, "{e}"),
            Self::Poisoned => f.write_str("reconciler is poisoned by an earlier host failure"),
        }
    }
}

impl std::error::Error for ReconcilerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Uncaught(e) => Some(e),
            Self::Host(e) => Some(e),
            Self::Poisoned => None,
        }
    }
}

impl From<HostError> for ReconcilerError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_keeps_first_attribution() {
        let err = RenderError::new("boom").in_component("Inner").in_component("Outer");
        assert_eq!(err.component(), Some("Inner"));
        assert_eq!(err.to_string(), "Inner: boom");
    }

    #[test]
    fn host_error_names_the_operation() {
        let err = HostError::new("insert_before", "no such parent");
        assert_eq!(
            err.to_string(),
            "host operation `insert_before` failed: no such parent"
        );
        let wrapped = ReconcilerError::from(err.clone());
        assert_eq!(wrapped, ReconcilerError::Host(err));
    }

    #[test]
    fn question_mark_converts_render_errors_into_throws() {
        fn render() -> Result<(), Throw> {
            Err(RenderError::new("nope"))?;
            Ok(())
        }
        assert!(matches!(render(), Err(Throw::Error(e)) if e.message() == "nope"));
    }
}

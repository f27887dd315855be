#![forbid(unsafe_code)]

//! Interruptible fiber reconciler.
//!
//! Components describe UI as [`Element`] trees. A [`Reconciler`] turns those
//! descriptions into calls on a [`HostBinding`], rendering in cooperative,
//! interruptible passes and applying each finished pass in one atomic commit.
//!
//! # Example
//!
//! ```ignore
//! use fiber_runtime::{Element, Reconciler};
//!
//! let mut root = Reconciler::new(host, container);
//! root.update_container(Element::host("div").child("hello").build())?;
//! root.flush_work()?;
//! ```
//!
//! # Modules
//!
//! - [`element`] / [`component`] / [`hooks`]: what components produce and use.
//! - [`reconciler`]: the root, scheduling API and driving entry points.
//! - [`host`]: the trait output targets implement.
//! - [`policy_config`]: starvation thresholds and render limits as data.
//! - [`telemetry`]: commit records, observers and counters.

mod begin;
mod commit;
mod complete;
mod effects;
mod fiber;
mod inbox;
mod reconcile;
mod root;
mod store;
mod work_loop;

pub mod component;
pub mod element;
pub mod error;
pub mod hooks;
pub mod host;
pub mod policy_config;
pub mod reconciler;
pub mod telemetry;
pub mod yield_signal;

pub use component::{ClassComponent, ClassContext, FnComponent, FunctionComponent, RenderResult};
pub use element::{
    ComponentType, Element, ElementNode, ElementRef, ElementType, HostBuilder, HostElement, Key,
    PortalTarget, WorkKind,
};
pub use error::{HostError, ReconcilerError, RenderError, Throw};
pub use hooks::{Cleanup, Hooks, RawHandle, StateHandle};
pub use host::HostBinding;
pub use policy_config::{
    PolicyConfigError, ReconcilerPolicy, RenderLimits, SchedulerPolicy, StarvationPolicy,
};
pub use reconciler::{NodeInfo, Reconciler, RootOptions, WorkStatus};
pub use root::UpdaterInfo;
pub use store::NodeId;
pub use telemetry::{
    CommitObserver, CommitRecord, EffectSummary, commits_total, passes_abandoned_total,
    suspensions_total, units_of_work_total,
};
pub use yield_signal::{DeadlineSignal, NeverYield, UnitBudget, YieldSignal};

pub use fiber_core::{
    Clock, EffectFlags, Lane, Lanes, ManualClock, PropChange, PropDiff, PropValue, Props,
    StateValue, SystemClock, Thenable, ThenableId, ThenableStatus, UpdatePayload,
};

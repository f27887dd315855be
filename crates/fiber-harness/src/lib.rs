#![forbid(unsafe_code)]

//! Test harness for the fiber reconciler.
//!
//! - [`TestHost`]: an in-memory [`HostBinding`](fiber_runtime::HostBinding)
//!   that records every call as a serializable [`HostOp`], renders its tree
//!   as markup and can inject host failures.
//! - [`TextResource`]: keyed data components suspend on until the test
//!   resolves it.
//! - [`YieldLog`] with [`UntilLogged`] / [`UntilEntry`]: a shared render log
//!   and yield signals that stop work at a given point in it.
//! - [`TestRoot`]: a reconciler on a [`TestHost`] with a manual clock and a
//!   [`RecordingObserver`] already attached.

pub mod host;
pub mod log;
pub mod resource;
pub mod root;

pub use host::{HostId, HostOp, TestHost};
pub use log::{UntilEntry, UntilLogged, YieldLog};
pub use resource::TextResource;
pub use root::{RecordingObserver, TestRoot};

#![forbid(unsafe_code)]

//! Core primitives for the fiber reconciler.
//!
//! This crate holds the host-neutral vocabulary the runtime is built from:
//! priority [`Lanes`], commit-time [`EffectFlags`], per-node
//! [`UpdateQueue`]s with skip-and-replay semantics, settle-once
//! [`Thenable`]s, host [`Props`] with minimal [`PropDiff`]s, and the
//! [`Clock`] abstraction used for starvation tracking.

pub mod clock;
pub mod flags;
pub mod lane;
pub mod props;
pub mod thenable;
pub mod update;

pub use clock::{Clock, ManualClock, SystemClock};
pub use flags::EffectFlags;
pub use lane::{LANE_COUNT, Lane, LaneMap, Lanes};
pub use props::{PropChange, PropDiff, PropValue, Props};
pub use thenable::{Thenable, ThenableId, ThenableStatus};
pub use update::{Processed, Reducer, StateValue, Update, UpdatePayload, UpdateQueue, same_value};

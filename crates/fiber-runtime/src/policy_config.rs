#![forbid(unsafe_code)]

//! Policy-as-data configuration for the reconciler's scheduling limits.
//!
//! Captures every tunable threshold (lane starvation timeouts, interruption
//! limits, render-phase restart bound, nested update bound, retry bound, frame
//! budget) in a single
//! [`ReconcilerPolicy`] that can be loaded from TOML or JSON at startup.
//!
//! # Loading
//!
//! ```toml
//! # fiber-policy.toml
//! [starvation]
//! default_timeout_ms = 2000
//! max_interruptions = 4
//!
//! [render]
//! max_render_phase_restarts = 25
//! ```
//!
//! ```rust,ignore
//! let policy = ReconcilerPolicy::from_toml_file("fiber-policy.toml")?;
//! let policy = ReconcilerPolicy::from_json_str(json)?;
//! ```

#[cfg(feature = "policy-config")]
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "policy-config")]
use serde::{Deserialize, Serialize};

use fiber_core::Lane;

// ---------------------------------------------------------------------------
// Top-level policy
// ---------------------------------------------------------------------------

/// Tunable limits of a reconciler root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct ReconcilerPolicy {
    /// When a pending lane stops being interruptible.
    pub starvation: StarvationPolicy,
    /// Bounds on repeated rendering.
    pub render: RenderLimits,
    /// Cooperative yielding.
    pub scheduler: SchedulerPolicy,
}

/// Lane expiration. A lane that has been pending longer than its timeout, or
/// whose passes were interrupted `max_interruptions` times, is rendered in a
/// forced-synchronous pass that cannot be interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct StarvationPolicy {
    pub sync_timeout_ms: u64,
    pub input_timeout_ms: u64,
    pub default_timeout_ms: u64,
    pub transition_timeout_ms: u64,
    /// `0` disables the interruption limit.
    pub max_interruptions: u32,
}

impl Default for StarvationPolicy {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 250,
            input_timeout_ms: 250,
            default_timeout_ms: 5_000,
            transition_timeout_ms: 5_000,
            max_interruptions: 8,
        }
    }
}

impl StarvationPolicy {
    /// Expiration timeout of a lane. Retry, idle and offscreen work never
    /// expires.
    #[must_use]
    pub fn timeout(&self, lane: Lane) -> Option<Duration> {
        let ms = if lane == Lane::SYNC {
            self.sync_timeout_ms
        } else if lane == Lane::INPUT {
            self.input_timeout_ms
        } else if lane == Lane::DEFAULT {
            self.default_timeout_ms
        } else if lane == Lane::TRANSITION {
            self.transition_timeout_ms
        } else {
            return None;
        };
        Some(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct RenderLimits {
    /// How often a component may re-render itself because of updates it
    /// scheduled while rendering, before that becomes a render error.
    pub max_render_phase_restarts: u32,
    /// How many times a boundary may be retried without its primary content
    /// committing, before retries stop until new work arrives.
    pub max_immediate_retries: u32,
    /// How many commits in a row may schedule synchronous work for
    /// themselves from layout callbacks before the cascade is stopped.
    pub max_nested_updates: u32,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_render_phase_restarts: 25,
            max_immediate_retries: 50,
            max_nested_updates: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct SchedulerPolicy {
    /// Time slice granted by [`DeadlineSignal::from_policy`](crate::DeadlineSignal::from_policy).
    pub frame_budget_ms: u64,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self { frame_budget_ms: 5 }
    }
}

impl ReconcilerPolicy {
    /// Load from a TOML string.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyConfigError> {
        let policy: Self = toml::from_str(s).map_err(PolicyConfigError::Toml)?;
        policy.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(s: &str) -> Result<Self, PolicyConfigError> {
        let policy: Self = serde_json::from_str(s).map_err(PolicyConfigError::Json)?;
        policy.validated()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PolicyConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the policy
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let s = &self.starvation;
        if s.sync_timeout_ms > s.default_timeout_ms {
            errors.push(format!(
                "starvation.sync_timeout_ms ({}) must not exceed default_timeout_ms ({})",
                s.sync_timeout_ms, s.default_timeout_ms
            ));
        }
        if s.input_timeout_ms > s.default_timeout_ms {
            errors.push(format!(
                "starvation.input_timeout_ms ({}) must not exceed default_timeout_ms ({})",
                s.input_timeout_ms, s.default_timeout_ms
            ));
        }
        if self.render.max_render_phase_restarts == 0 {
            errors.push("render.max_render_phase_restarts must be > 0".into());
        }
        if self.render.max_immediate_retries == 0 {
            errors.push("render.max_immediate_retries must be > 0".into());
        }
        if self.render.max_nested_updates == 0 {
            errors.push("render.max_nested_updates must be > 0".into());
        }
        if self.scheduler.frame_budget_ms == 0 {
            errors.push("scheduler.frame_budget_ms must be > 0".into());
        }
        errors
    }

    /// `self` if valid, otherwise every validation failure.
    pub fn validated(self) -> Result<Self, PolicyConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(PolicyConfigError::Validation(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading or validating a [`ReconcilerPolicy`].
#[derive(Debug)]
pub enum PolicyConfigError {
    /// The policy file could not be read.
    Io(std::io::Error),
    /// The policy is not valid TOML for [`ReconcilerPolicy`].
    #[cfg(feature = "policy-config")]
    Toml(toml::de::Error),
    /// The policy is not valid JSON for [`ReconcilerPolicy`].
    #[cfg(feature = "policy-config")]
    Json(serde_json::Error),
    /// The policy parsed but some limits are out of range.
    Validation(Vec<String>),
}

impl std::fmt::Display for PolicyConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read reconciler policy: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => write!(f, "reconciler policy is not valid TOML: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => write!(f, "reconciler policy is not valid JSON: {e}"),
            Self::Validation(errors) => {
                write!(f, "reconciler policy rejected: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for PolicyConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

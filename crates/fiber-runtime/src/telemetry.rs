#![forbid(unsafe_code)]

//! Commit telemetry.
//!
//! - **Commit records**: every commit produces a [`CommitRecord`] delivered
//!   to registered [`CommitObserver`]s, naming the lanes committed and the
//!   nodes whose updates caused it.
//! - **Metrics counters**: process-wide monotonic counters for commits,
//!   abandoned passes, suspensions and units of work.
//! - **Tracing**: a `fiber.commit` span per commit; events on the
//!   `fiber.work_loop`, `fiber.commit`, `fiber.boundary` and
//!   `fiber.scheduler` targets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fiber_core::{EffectFlags, Lanes};

use crate::root::UpdaterInfo;
use crate::store::NodeId;

// ---------------------------------------------------------------------------
// Monotonic counters
// ---------------------------------------------------------------------------

static COMMITS_TOTAL: AtomicU64 = AtomicU64::new(0);
static PASSES_ABANDONED_TOTAL: AtomicU64 = AtomicU64::new(0);
static SUSPENSIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static UNITS_OF_WORK_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Total commits across all roots.
#[must_use]
pub fn commits_total() -> u64 {
    COMMITS_TOTAL.load(Ordering::Relaxed)
}

/// Render passes discarded because of interruption.
#[must_use]
pub fn passes_abandoned_total() -> u64 {
    PASSES_ABANDONED_TOTAL.load(Ordering::Relaxed)
}

/// Suspensions captured by boundaries.
#[must_use]
pub fn suspensions_total() -> u64 {
    SUSPENSIONS_TOTAL.load(Ordering::Relaxed)
}

/// Units of work (node begins) performed.
#[must_use]
pub fn units_of_work_total() -> u64 {
    UNITS_OF_WORK_TOTAL.load(Ordering::Relaxed)
}

pub(crate) fn count_commit() {
    COMMITS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn count_abandoned_pass() {
    PASSES_ABANDONED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn count_suspension() {
    SUSPENSIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn count_unit_of_work() {
    UNITS_OF_WORK_TOTAL.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Commit records
// ---------------------------------------------------------------------------

/// One effect applied by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectSummary {
    pub node: NodeId,
    pub flags: EffectFlags,
}

/// Everything an observer learns about a commit.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// 1-based commit counter of this root.
    pub commit_index: u64,
    /// Lanes the committed pass rendered.
    pub lanes: Lanes,
    pub root: NodeId,
    /// Nodes whose scheduled updates this commit includes, in scheduling
    /// order.
    pub updaters: Vec<UpdaterInfo>,
    /// Effects in the order they were applied.
    pub effects: Vec<EffectSummary>,
    /// Boundaries that started or kept showing a fallback.
    pub suspended_boundaries: Vec<NodeId>,
    /// Whether the pass ran without yielding or interruption checks.
    pub forced: bool,
    pub render_duration: Duration,
    pub commit_duration: Duration,
}

impl CommitRecord {
    /// Names of the updaters, for quick assertions.
    #[must_use]
    pub fn updater_names(&self) -> Vec<&str> {
        self.updaters.iter().map(|u| u.name.as_str()).collect()
    }
}

/// Receives a record after each commit.
pub trait CommitObserver {
    fn on_commit(&mut self, record: &CommitRecord);
}

impl<F: FnMut(&CommitRecord)> CommitObserver for F {
    fn on_commit(&mut self, record: &CommitRecord) {
        self(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::WorkKind;

    #[test]
    fn counters_are_monotonic() {
        let before = commits_total();
        count_commit();
        assert!(commits_total() > before);
    }

    #[test]
    fn closures_observe_commits() {
        let mut seen = Vec::new();
        {
            let mut observer = |r: &CommitRecord| seen.push(r.commit_index);
            let record = CommitRecord {
                commit_index: 3,
                lanes: Lanes::DEFAULT,
                root: NodeId::new(0, 0),
                updaters: vec![UpdaterInfo {
                    node: NodeId::new(1, 0),
                    kind: WorkKind::FunctionComponent,
                    name: "Counter".into(),
                }],
                effects: Vec::new(),
                suspended_boundaries: Vec::new(),
                forced: false,
                render_duration: Duration::ZERO,
                commit_duration: Duration::ZERO,
            };
            assert_eq!(record.updater_names(), vec!["Counter"]);
            observer.on_commit(&record);
        }
        assert_eq!(seen, vec![3]);
    }
}

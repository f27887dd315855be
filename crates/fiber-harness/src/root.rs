#![forbid(unsafe_code)]

//! A reconciler wired to a [`TestHost`], a manual clock and a render log.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use fiber_core::ManualClock;
use fiber_runtime::{
    CommitObserver, CommitRecord, Element, Reconciler, ReconcilerError, ReconcilerPolicy,
    RootOptions, UnitBudget, WorkStatus,
};

use crate::host::{HostId, TestHost};
use crate::log::{UntilEntry, UntilLogged, YieldLog};

/// Collects commit records. Clones share the collection.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    records: Rc<RefCell<Vec<CommitRecord>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<CommitRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<CommitRecord> {
        self.records.borrow().last().cloned()
    }
}

impl CommitObserver for RecordingObserver {
    fn on_commit(&mut self, record: &CommitRecord) {
        self.records.borrow_mut().push(record.clone());
    }
}

/// Test fixture around a [`Reconciler<TestHost>`]. Derefs to the reconciler.
#[derive(Debug)]
pub struct TestRoot {
    reconciler: Reconciler<TestHost>,
    clock: ManualClock,
    log: YieldLog,
    commits: RecordingObserver,
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRoot {
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(ReconcilerPolicy::default())
    }

    #[must_use]
    pub fn with_policy(policy: ReconcilerPolicy) -> Self {
        let mut host = TestHost::new();
        let container = host.create_container("root");
        Self::build(host, container, policy, false)
    }

    /// A root that hydrates whatever `seed` puts into the container.
    #[must_use]
    pub fn hydrating(seed: impl FnOnce(&mut TestHost, HostId)) -> Self {
        let mut host = TestHost::hydrating();
        let container = host.create_container("root");
        seed(&mut host, container);
        Self::build(host, container, ReconcilerPolicy::default(), true)
    }

    fn build(host: TestHost, container: HostId, policy: ReconcilerPolicy, hydrate: bool) -> Self {
        let clock = ManualClock::new();
        let options = RootOptions {
            policy,
            clock: Rc::new(clock.clone()),
            hydrate,
        };
        let mut reconciler = Reconciler::with_options(host, container, options);
        let commits = RecordingObserver::new();
        reconciler.add_commit_observer(commits.clone());
        Self {
            reconciler,
            clock,
            log: YieldLog::new(),
            commits,
        }
    }

    /// Schedule `element` as the root content and run all work.
    pub fn render(&mut self, element: Element) -> Result<(), ReconcilerError> {
        self.reconciler.update_container(element)?;
        self.reconciler.flush_work()
    }

    /// Schedule `element` without running any work.
    pub fn schedule(&mut self, element: Element) -> Result<(), ReconcilerError> {
        self.reconciler.update_container(element).map(|_| ())
    }

    /// Run at most `units` units of work.
    pub fn work_units(&mut self, units: u32) -> Result<WorkStatus, ReconcilerError> {
        self.reconciler.perform_work(&mut UnitBudget::new(units))
    }

    /// Run work until the log holds `count` entries in total.
    pub fn work_until_logged(&mut self, count: usize) -> Result<WorkStatus, ReconcilerError> {
        let mut signal = UntilLogged::new(&self.log, count);
        self.reconciler.perform_work(&mut signal)
    }

    /// Run work until `entry` is logged.
    pub fn work_until(&mut self, entry: &str) -> Result<WorkStatus, ReconcilerError> {
        let mut signal = UntilEntry::new(&self.log, entry);
        self.reconciler.perform_work(&mut signal)
    }

    /// Markup of the container.
    #[must_use]
    pub fn markup(&self) -> String {
        let container = *self.reconciler.container();
        self.reconciler.host().render(container)
    }

    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    #[must_use]
    pub fn log(&self) -> &YieldLog {
        &self.log
    }

    #[must_use]
    pub fn commits(&self) -> &RecordingObserver {
        &self.commits
    }
}

impl Deref for TestRoot {
    type Target = Reconciler<TestHost>;

    fn deref(&self) -> &Self::Target {
        &self.reconciler
    }
}

impl DerefMut for TestRoot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.reconciler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_host_markup() {
        let mut root = TestRoot::new();
        root.render(
            Element::host("div")
                .prop("id", "a")
                .child("hello")
                .build(),
        )
        .expect("render");
        assert_eq!(root.markup(), "<div id=\"a\">hello</div>");
        assert_eq!(root.commits().len(), 1);
    }

    #[test]
    fn hydrating_root_adopts_seeded_nodes() {
        let mut root = TestRoot::hydrating(|host, container| {
            let div = host.seed_element(container, "div", fiber_core::Props::new());
            host.seed_text(div, "hi");
        });
        root.render(Element::host("div").child("hi").build())
            .expect("hydrate");
        assert_eq!(root.markup(), "<div>hi</div>");
        assert!(root.host().ops().iter().all(|op| !op.is_mutation()));
    }
}

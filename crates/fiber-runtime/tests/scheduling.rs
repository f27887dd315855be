#![forbid(unsafe_code)]

//! Lanes, yielding, interruption and starvation.
//!
//! Run:
//!   cargo test -p fiber-runtime --test scheduling

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use fiber_harness::{TestRoot, YieldLog};
use fiber_runtime::{
    Element, Lane, Lanes, ReconcilerPolicy, StateHandle, WorkStatus, passes_abandoned_total,
};

type Setter = Rc<RefCell<Option<StateHandle<i64>>>>;

fn counter(name: &'static str, log: &YieldLog, setter: &Setter) -> Element {
    let log = log.clone();
    let slot = Rc::clone(setter);
    Element::render_fn(name, move |hooks| {
        let (count, set) = hooks.use_state(|| 0_i64);
        *slot.borrow_mut() = Some(set);
        log.push(format!("{name} {count}"));
        Ok(Element::host("li").child(format!("{name}:{count}")).build())
    })
}

fn setter(slot: &Setter) -> StateHandle<i64> {
    slot.borrow().clone().expect("component rendered")
}

struct Pair {
    root: TestRoot,
    a: Setter,
    b: Setter,
}

fn pair(policy: ReconcilerPolicy) -> Pair {
    let mut root = TestRoot::with_policy(policy);
    let a = Setter::default();
    let b = Setter::default();
    let log = root.log().clone();
    root.render(
        Element::host("ul")
            .child(counter("A", &log, &a))
            .child(counter("B", &log, &b))
            .build(),
    )
    .expect("mount");
    log.take();
    root.commits().take();
    Pair { root, a, b }
}

fn item(name: &'static str, label: &'static str, log: &YieldLog) -> Element {
    let log = log.clone();
    Element::render_fn("Item", move |_| {
        log.push(format!("{name} {label}"));
        Ok(Element::host("li").child(format!("{name}:{label}")).build())
    })
    .with_key(name)
}

fn items(label: &'static str, log: &YieldLog) -> Element {
    Element::host("ul")
        .children(["A", "B", "C"].map(|name| item(name, label, log)))
        .build()
}

// ============================================================================
// Yielding
// ============================================================================

#[test]
fn yielded_work_resumes_where_it_stopped() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    root.schedule(items("one", &log)).expect("schedule");

    assert_eq!(root.work_until("B one").expect("slice"), WorkStatus::Yielded);
    assert_eq!(log.take(), vec!["A one", "B one"]);
    assert!(root.is_rendering());
    assert_eq!(root.markup(), "");

    assert_eq!(root.work_units(100).expect("rest"), WorkStatus::Idle);
    assert_eq!(log.take(), vec!["C one"]);
    assert_eq!(root.markup(), "<ul><li>A:one</li><li>B:one</li><li>C:one</li></ul>");
}

#[test]
fn unit_budgets_bound_each_slice() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    root.schedule(items("one", &log)).expect("schedule");

    let mut slices = 0;
    while root.work_units(1).expect("slice") == WorkStatus::Yielded {
        slices += 1;
        assert!(slices < 100, "work never finished");
    }
    assert!(slices > 3);
    assert_eq!(root.commit_count(), 1);
}

// ============================================================================
// Lane ordering
// ============================================================================

#[test]
fn urgent_lanes_commit_before_transitions() {
    let Pair { mut root, a, b } = pair(ReconcilerPolicy::default());
    root.with_priority(Lane::TRANSITION, |_| setter(&a).set(1));
    setter(&b).set(1);
    root.flush_work().expect("flush");

    let records = root.commits().take();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lanes, Lanes::DEFAULT);
    assert_eq!(records[0].updater_names(), vec!["B"]);
    assert_eq!(records[1].lanes, Lanes::TRANSITION);
    assert_eq!(records[1].updater_names(), vec!["A"]);
    assert_eq!(root.markup(), "<ul><li>A:1</li><li>B:1</li></ul>");
}

#[test]
fn batched_sync_updates_commit_once() {
    let Pair { mut root, a, b } = pair(ReconcilerPolicy::default());
    root.batched_updates(|r| {
        r.with_priority(Lane::SYNC, |_| {
            setter(&a).set(1);
            setter(&b).set(2);
        });
    })
    .expect("batch");
    assert_eq!(root.markup(), "<ul><li>A:1</li><li>B:2</li></ul>");
    let records = root.commits().take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].updater_names(), vec!["A", "B"]);
}

// ============================================================================
// Interruption
// ============================================================================

#[test]
fn sync_update_interrupts_a_concurrent_pass() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    root.render(items("first", &log)).expect("mount");
    log.take();
    let abandoned = passes_abandoned_total();

    root.schedule(items("second", &log)).expect("schedule");
    assert_eq!(root.work_until("A second").expect("slice"), WorkStatus::Yielded);

    root.flush_sync(|r| r.update_container(items("third", &log)))
        .expect("flush sync")
        .expect("update");
    assert_eq!(
        root.markup(),
        "<ul><li>A:third</li><li>B:third</li><li>C:third</li></ul>"
    );
    assert_eq!(root.last_commit().map(|c| c.lanes), Some(Lanes::SYNC));
    assert!(!log.contains("C second"));
    assert!(passes_abandoned_total() > abandoned);

    // The interrupted update is rebased; the later one still wins.
    root.flush_work().expect("rebase");
    assert_eq!(
        root.markup(),
        "<ul><li>A:third</li><li>B:third</li><li>C:third</li></ul>"
    );
    assert!(!root.has_pending_work());
}

#[test]
fn abandoned_pass_leaves_committed_tree_untouched() {
    let Pair { mut root, a, b } = pair(ReconcilerPolicy::default());
    setter(&a).set(5);
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);
    root.with_priority(Lane::INPUT, |_| setter(&b).set(7));
    assert_eq!(root.markup(), "<ul><li>A:0</li><li>B:0</li></ul>");

    root.flush_work().expect("flush");
    assert_eq!(root.markup(), "<ul><li>A:5</li><li>B:7</li></ul>");
    let records = root.commits().take();
    assert_eq!(records[0].lanes, Lanes::INPUT);
    assert_eq!(records[0].updater_names(), vec!["B"]);
}

// ============================================================================
// Starvation
// ============================================================================

#[test]
fn expired_lane_finishes_without_yielding() {
    let Pair { mut root, a, .. } = pair(ReconcilerPolicy::default());
    setter(&a).set(1);
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);

    root.clock().advance(Duration::from_millis(5_001));
    assert_eq!(root.work_units(1).expect("forced"), WorkStatus::Idle);
    assert_eq!(root.markup(), "<ul><li>A:1</li><li>B:0</li></ul>");
    assert_eq!(root.last_commit().map(|c| c.forced), Some(true));
}

#[test]
fn unexpired_lane_keeps_yielding() {
    let Pair { mut root, a, .. } = pair(ReconcilerPolicy::default());
    setter(&a).set(1);
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);
    root.clock().advance(Duration::from_millis(4_000));
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);
    assert_eq!(root.markup(), "<ul><li>A:0</li><li>B:0</li></ul>");
}

fn drain_in_single_units(root: &mut TestRoot) {
    let mut slices = 0;
    while root.work_units(1).expect("slice") == WorkStatus::Yielded {
        slices += 1;
        assert!(slices < 1_000, "work never finished");
    }
}

#[test]
fn repeatedly_interrupted_lane_is_forced() {
    let mut policy = ReconcilerPolicy::default();
    policy.starvation.max_interruptions = 1;
    let Pair { mut root, a, b } = pair(policy);

    setter(&a).set(1);
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);
    root.with_priority(Lane::INPUT, |_| setter(&b).set(1));
    drain_in_single_units(&mut root);

    let records = root.commits().take();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lanes, Lanes::INPUT);
    assert!(!records[0].forced);
    assert_eq!(records[1].lanes, Lanes::DEFAULT);
    assert!(records[1].forced);
}

#[test]
fn occasional_interruption_does_not_force() {
    let Pair { mut root, a, b } = pair(ReconcilerPolicy::default());

    setter(&a).set(1);
    assert_eq!(root.work_units(1).expect("slice"), WorkStatus::Yielded);
    root.with_priority(Lane::INPUT, |_| setter(&b).set(1));
    drain_in_single_units(&mut root);

    let records = root.commits().take();
    assert_eq!(records.len(), 2);
    assert!(!records[1].forced);
}

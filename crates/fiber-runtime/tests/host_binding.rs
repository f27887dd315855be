#![forbid(unsafe_code)]

//! Hydration and host failures.
//!
//! Run:
//!   cargo test -p fiber-runtime --test host_binding

use fiber_harness::{HostId, HostOp, TestRoot};
use fiber_runtime::{Element, Props, ReconcilerError};

fn seeded_greeting() -> (TestRoot, HostId, HostId) {
    let mut seeded = None;
    let root = TestRoot::hydrating(|host, container| {
        let mut props = Props::new();
        props.insert("id", "greeting");
        let div = host.seed_element(container, "div", props);
        let text = host.seed_text(div, "hi");
        seeded = Some((div, text));
    });
    let (div, text) = seeded.expect("seed ran");
    (root, div, text)
}

// ============================================================================
// Hydration
// ============================================================================

#[test]
fn matching_content_is_adopted_without_mutations() {
    let (mut root, div, _) = seeded_greeting();
    root.render(Element::host("div").prop("id", "greeting").child("hi").build())
        .expect("hydrate");

    assert_eq!(root.markup(), "<div id=\"greeting\">hi</div>");
    assert!(root.host().ops().iter().all(|op| !op.is_mutation()));
    assert!(
        !root
            .host()
            .ops()
            .iter()
            .any(|op| matches!(op, HostOp::CreateInstance { .. } | HostOp::CreateText { .. }))
    );
    let node = root.find_by_name("div")[0];
    assert_eq!(root.instance(node), Some(&div));
}

#[test]
fn hydrated_nodes_take_later_updates() {
    let (mut root, _, text) = seeded_greeting();
    root.render(Element::host("div").prop("id", "greeting").child("hi").build())
        .expect("hydrate");
    root.host_mut().take_ops();

    root.render(Element::host("div").prop("id", "greeting").child("bye").build())
        .expect("update");
    assert_eq!(root.markup(), "<div id=\"greeting\">bye</div>");
    assert_eq!(
        root.host().ops().iter().filter(|op| op.is_mutation()).collect::<Vec<_>>(),
        vec![&HostOp::CommitTextUpdate {
            id: text,
            text: "bye".to_owned(),
        }]
    );
}

#[test]
fn mismatched_content_is_replaced_by_a_client_render() {
    let (mut root, _, _) = seeded_greeting();
    root.render(Element::host("section").child("fresh").build())
        .expect("client render");

    assert_eq!(root.markup(), "<section>fresh</section>");
    assert_eq!(root.host().mutation_names(), vec!["clear_container", "append_child"]);
    assert_eq!(root.commit_count(), 1);
}

#[test]
fn text_mismatch_also_falls_back() {
    let (mut root, _, _) = seeded_greeting();
    root.render(Element::host("div").prop("id", "greeting").child("hello").build())
        .expect("client render");
    assert_eq!(root.markup(), "<div id=\"greeting\">hello</div>");
    assert!(root.host().mutation_names().contains(&"clear_container"));
}

// ============================================================================
// Host failures
// ============================================================================

#[test]
fn commit_failure_poisons_the_reconciler() {
    let mut root = TestRoot::new();
    root.host_mut().fail_on("append_child");
    let result = root.render(Element::host("div").build());
    match result {
        Err(ReconcilerError::Host(error)) => assert_eq!(error.operation(), "append_child"),
        other => panic!("expected a host error, got {other:?}"),
    }
    assert!(root.is_poisoned());

    assert_eq!(
        root.render(Element::host("div").build()),
        Err(ReconcilerError::Poisoned)
    );
    assert_eq!(root.flush_passive_effects(), Err(ReconcilerError::Poisoned));
    assert_eq!(root.flush_work(), Err(ReconcilerError::Poisoned));
}

#[test]
fn render_phase_host_failure_poisons_too() {
    let mut root = TestRoot::new();
    root.host_mut().fail_on("create_instance");
    let result = root.render(Element::host("div").child("x").build());
    assert!(matches!(
        result,
        Err(ReconcilerError::Host(ref e)) if e.operation() == "create_instance"
    ));
    assert!(root.is_poisoned());
    assert_eq!(root.markup(), "");
    assert_eq!(root.commit_count(), 0);
}

#[test]
fn host_error_messages_name_the_operation() {
    let mut root = TestRoot::new();
    root.host_mut().fail_on("prepare_for_commit");
    let err = root
        .render(Element::text("x"))
        .expect_err("prepare_for_commit fails");
    assert!(err.to_string().contains("prepare_for_commit"));
}

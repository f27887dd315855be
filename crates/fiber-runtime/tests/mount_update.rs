#![forbid(unsafe_code)]

//! Mounting, updating and reordering host output.
//!
//! Run:
//!   cargo test -p fiber-runtime --test mount_update

use std::cell::RefCell;
use std::rc::Rc;

use fiber_harness::{HostOp, TestRoot};
use fiber_runtime::{Element, ElementRef, Lanes, PortalTarget, StateHandle};

fn list(keys: &[&str]) -> Element {
    Element::host("ul")
        .children(
            keys.iter()
                .map(|k| Element::host("li").key(*k).child(*k).build()),
        )
        .build()
}

fn list_markup(keys: &[&str]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

// ============================================================================
// Mounting
// ============================================================================

#[test]
fn new_subtree_is_attached_with_one_insertion() {
    let mut root = TestRoot::new();
    root.render(
        Element::host("div")
            .prop("id", "app")
            .child(Element::host("span").child("hi"))
            .child("tail")
            .build(),
    )
    .expect("mount");

    assert_eq!(root.markup(), "<div id=\"app\"><span>hi</span>tail</div>");
    assert_eq!(root.host().mutation_names(), vec!["append_child"]);
    assert_eq!(root.commit_count(), 1);
}

#[test]
fn empty_root_renders_nothing() {
    let mut root = TestRoot::new();
    root.render(Element::empty()).expect("mount");
    assert_eq!(root.markup(), "");
    assert!(!root.has_pending_work());
}

#[test]
fn fragments_flatten_into_the_host_parent() {
    let mut root = TestRoot::new();
    root.render(Element::fragment([
        Element::text("a"),
        Element::fragment([Element::text("b"), Element::text("c")]),
    ]))
    .expect("mount");
    assert_eq!(root.markup(), "abc");
}

// ============================================================================
// Keyed children
// ============================================================================

#[test]
fn keyed_reorder_moves_without_recreating() {
    let mut root = TestRoot::new();
    root.render(list(&["a", "b", "c"])).expect("mount");
    root.host_mut().take_ops();

    root.render(list(&["c", "a", "b"])).expect("reorder");
    assert_eq!(root.markup(), list_markup(&["c", "a", "b"]));
    let ops = root.host_mut().take_ops();
    assert!(
        ops.iter()
            .all(|op| !matches!(op, HostOp::CreateInstance { .. } | HostOp::CreateText { .. }))
    );
    assert_eq!(
        ops.iter().filter(|op| op.is_mutation()).map(HostOp::name).collect::<Vec<_>>(),
        vec!["append_child", "append_child"]
    );
}

#[test]
fn removed_keys_are_deleted() {
    let mut root = TestRoot::new();
    root.render(list(&["a", "b", "c"])).expect("mount");
    root.host_mut().take_ops();

    root.render(list(&["a", "c"])).expect("remove");
    assert_eq!(root.markup(), list_markup(&["a", "c"]));
    assert_eq!(root.host().mutation_names(), vec!["remove_child"]);
}

#[test]
fn inserted_keys_go_before_their_next_sibling() {
    let mut root = TestRoot::new();
    root.render(list(&["a", "c"])).expect("mount");
    root.host_mut().take_ops();

    root.render(list(&["a", "b", "c"])).expect("insert");
    assert_eq!(root.markup(), list_markup(&["a", "b", "c"]));
    assert_eq!(root.host().mutation_names(), vec!["insert_before"]);
}

fn duplicate_keys(texts: &[&str]) -> Element {
    Element::host("ul")
        .children(
            texts
                .iter()
                .map(|t| Element::host("li").key("x").child(*t).build()),
        )
        .build()
}

#[test]
fn duplicate_keys_match_in_order_without_leaking() {
    let mut root = TestRoot::new();
    root.render(duplicate_keys(&["a", "b"])).expect("mount");
    root.host_mut().take_ops();

    for _ in 0..3 {
        root.render(duplicate_keys(&["a", "b"])).expect("re-render");
        assert_eq!(root.markup(), "<ul><li>a</li><li>b</li></ul>");
        assert_eq!(root.live_nodes(), 6, "root, ul and two li with text");
    }
    assert!(root.host().mutation_names().is_empty());
}

#[test]
fn surplus_duplicate_keys_are_deleted() {
    let mut root = TestRoot::new();
    root.render(duplicate_keys(&["a", "b", "c"])).expect("mount");
    root.host_mut().take_ops();

    root.render(duplicate_keys(&["a"])).expect("shrink");
    assert_eq!(root.markup(), "<ul><li>a</li></ul>");
    assert_eq!(root.live_nodes(), 4);
    assert_eq!(root.host().mutation_names(), vec!["remove_child", "remove_child"]);
}

#[test]
fn identical_renders_reuse_every_node() {
    let app = || {
        Element::host("div")
            .child(list(&["a", "b"]))
            .child(Element::render_fn("Label", |_| Ok(Element::text("label"))))
            .build()
    };
    let mut root = TestRoot::new();
    root.render(app()).expect("mount");
    let nodes = root.live_nodes();
    let items = root.find_by_name("li");
    let instances: Vec<_> = items.iter().map(|n| root.instance(*n).copied()).collect();
    root.host_mut().take_ops();

    for _ in 0..5 {
        root.render(app()).expect("re-render");
        assert_eq!(root.live_nodes(), nodes);
    }
    assert_eq!(root.find_by_name("li"), items);
    let after: Vec<_> = items.iter().map(|n| root.instance(*n).copied()).collect();
    assert_eq!(after, instances);
    assert!(
        !root
            .host()
            .ops()
            .iter()
            .any(|op| matches!(op, HostOp::CreateInstance { .. } | HostOp::CreateText { .. }))
    );
}

#[test]
fn type_change_replaces_the_node() {
    let mut root = TestRoot::new();
    root.render(Element::host("div").child("x").build()).expect("mount");
    root.host_mut().take_ops();

    root.render(Element::host("span").child("x").build()).expect("replace");
    assert_eq!(root.markup(), "<span>x</span>");
    assert_eq!(root.host().mutation_names(), vec!["remove_child", "append_child"]);
    assert_eq!(root.live_nodes(), 3, "root, span and text");
}

// ============================================================================
// Updates
// ============================================================================

#[test]
fn prop_and_text_changes_are_applied_in_place() {
    let mut root = TestRoot::new();
    root.render(Element::host("div").prop("id", "a").child("x").build())
        .expect("mount");
    root.host_mut().take_ops();

    root.render(Element::host("div").prop("id", "b").child("y").build())
        .expect("update");
    assert_eq!(root.markup(), "<div id=\"b\">y</div>");
    assert_eq!(
        root.host().mutation_names(),
        vec!["commit_text_update", "commit_update"]
    );
}

#[test]
fn unchanged_props_produce_no_host_calls() {
    let mut root = TestRoot::new();
    root.render(Element::host("div").prop("id", "a").child("x").build())
        .expect("mount");
    root.host_mut().take_ops();

    root.render(Element::host("div").prop("id", "a").child("x").build())
        .expect("same");
    assert!(root.host().mutation_names().is_empty());
}

#[test]
fn state_updates_are_batched_into_one_commit() {
    let setter: Rc<RefCell<Option<StateHandle<i64>>>> = Rc::default();
    let slot = Rc::clone(&setter);
    let mut root = TestRoot::new();
    root.render(Element::render_fn("Counter", move |hooks| {
        let (count, set) = hooks.use_state(|| 0_i64);
        *slot.borrow_mut() = Some(set);
        Ok(Element::text(count.to_string()))
    }))
    .expect("mount");
    assert_eq!(root.markup(), "0");

    let set = setter.borrow().clone().expect("setter");
    set.update(|n| n + 1);
    set.update(|n| n + 1);
    let commits = root.commit_count();
    root.flush_work().expect("flush");
    assert_eq!(root.markup(), "2");
    assert_eq!(root.commit_count(), commits + 1);
}

#[test]
fn only_the_updated_component_renders_again() {
    let setter: Rc<RefCell<Option<StateHandle<i64>>>> = Rc::default();
    let slot = Rc::clone(&setter);
    let mut root = TestRoot::new();
    let log_a = root.log().clone();
    let log_b = root.log().clone();
    let log_parent = root.log().clone();

    let a = Element::render_fn("A", move |hooks| {
        let (count, set) = hooks.use_state(|| 0_i64);
        *slot.borrow_mut() = Some(set);
        log_a.push("A");
        Ok(Element::text(format!("a{count}")))
    });
    let b = Element::render_fn("B", move |_| {
        log_b.push("B");
        Ok(Element::text("b"))
    });
    let app = Element::render_fn("App", move |_| {
        log_parent.push("App");
        Ok(Element::fragment([a.clone(), b.clone()]))
    });
    root.render(app).expect("mount");
    assert_eq!(root.log().take(), vec!["App", "A", "B"]);

    setter.borrow().clone().expect("setter").set(5);
    root.flush_work().expect("update");
    assert_eq!(root.markup(), "a5b");
    assert_eq!(root.log().take(), vec!["A"]);
}

#[test]
fn flush_sync_commits_before_returning() {
    let setter: Rc<RefCell<Option<StateHandle<&'static str>>>> = Rc::default();
    let slot = Rc::clone(&setter);
    let mut root = TestRoot::new();
    root.render(Element::render_fn("Label", move |hooks| {
        let (label, set) = hooks.use_state(|| "before");
        *slot.borrow_mut() = Some(set);
        Ok(Element::text(*label))
    }))
    .expect("mount");

    let set = setter.borrow().clone().expect("setter");
    root.flush_sync(|_| {
        set.set("middle");
        set.set("after");
    })
    .expect("flush sync");
    assert_eq!(root.markup(), "after");
    assert_eq!(root.last_commit().map(|c| c.lanes), Some(Lanes::SYNC));
    assert!(!root.has_pending_work());
}

// ============================================================================
// Refs, mount hooks and portals
// ============================================================================

#[test]
fn refs_attach_on_mount_and_detach_on_delete() {
    let input = ElementRef::new();
    let mut root = TestRoot::new();
    root.render(
        Element::host("form")
            .child(Element::host("input").node_ref(&input))
            .build(),
    )
    .expect("mount");
    let node = input.current().expect("attached");
    assert!(root.instance(node).is_some());
    assert_eq!(root.node_info(node).map(|i| i.name), Some("input".to_owned()));

    root.render(Element::host("form").build()).expect("remove");
    assert_eq!(input.current(), None);
}

#[test]
fn commit_mount_runs_after_insertion() {
    let mut root = TestRoot::new();
    root.render(Element::host("input").prop("autofocus", true).build())
        .expect("mount");
    let names: Vec<_> = root.host().ops().iter().map(HostOp::name).collect();
    let inserted = names.iter().position(|n| *n == "append_child");
    let mounted = names.iter().position(|n| *n == "commit_mount");
    assert!(inserted.is_some() && mounted.is_some());
    assert!(inserted < mounted);
}

#[test]
fn portal_content_lands_in_its_own_container() {
    let mut root = TestRoot::new();
    root.render(
        Element::host("div")
            .child(Element::portal(
                PortalTarget::new("modal"),
                [Element::text("hello")],
            ))
            .build(),
    )
    .expect("mount");
    let modal = root.host().portal("modal").expect("portal container");
    assert_eq!(root.host().container_name(modal), Some("modal"));
    assert_eq!(root.markup(), "<div></div>");
    assert_eq!(root.host().render(modal), "hello");

    root.render(Element::host("div").build()).expect("unmount portal");
    assert_eq!(root.host().render(modal), "");
}

#[test]
fn find_by_name_walks_the_committed_tree() {
    let mut root = TestRoot::new();
    root.render(Element::render_fn("Shell", |_| {
        Ok(Element::host("main").child("x").build())
    }))
    .expect("mount");
    let shells = root.find_by_name("Shell");
    assert_eq!(shells.len(), 1);
    let main = root.children(shells[0]);
    assert_eq!(main.len(), 1);
    assert_eq!(root.parent(main[0]), Some(shells[0]));
}

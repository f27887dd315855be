#![forbid(unsafe_code)]

//! Suspense boundaries and offscreen content.
//!
//! Run:
//!   cargo test -p fiber-runtime --test suspense

use std::cell::RefCell;
use std::rc::Rc;

use fiber_harness::{TestRoot, TextResource, YieldLog};
use fiber_runtime::{Element, Lanes, ReconcilerError, StateHandle, suspensions_total};

fn reader(resource: &TextResource, key: &'static str, log: &YieldLog) -> Element {
    let resource = resource.clone();
    let log = log.clone();
    Element::render_fn("Reader", move |_| {
        let text = resource.read(key)?;
        log.push(format!("read {text}"));
        Ok(Element::text(text))
    })
}

fn boundary_of(root: &TestRoot) -> fiber_runtime::NodeId {
    root.find_by_name("Suspense")
        .first()
        .copied()
        .expect("suspense boundary mounted")
}

// ============================================================================
// Fallbacks and retries
// ============================================================================

#[test]
fn first_mount_shows_fallback_until_data_arrives() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    let resource = TextResource::new();
    let suspended = suspensions_total();

    root.render(
        Element::host("div")
            .child(Element::suspense(
                [reader(&resource, "greeting", &log)],
                [Element::text("Loading...")],
            ))
            .build(),
    )
    .expect("mount");
    assert_eq!(root.markup(), "<div>Loading...</div>");
    let boundary = boundary_of(&root);
    assert!(root.is_showing_fallback(boundary));
    assert!(resource.listener_count("greeting") > 0);
    assert!(suspensions_total() > suspended);
    let record = root.last_commit().expect("committed");
    assert_eq!(record.suspended_boundaries, vec![boundary]);

    resource.resolve("greeting", "hello");
    assert!(root.has_pending_work());
    root.flush_work().expect("retry");
    assert_eq!(root.markup(), "<div>hello</div>");
    assert!(!root.is_showing_fallback(boundary));
    assert_eq!(root.last_commit().map(|c| c.lanes), Some(Lanes::RETRY));
    assert_eq!(log.take(), vec!["read hello"]);
}

#[test]
fn siblings_outside_the_boundary_still_commit() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    let resource = TextResource::new();
    root.render(
        Element::host("main")
            .child(Element::host("h1").child("title"))
            .child(Element::suspense(
                [reader(&resource, "body", &log)],
                [Element::host("i").child("spinner").build()],
            ))
            .build(),
    )
    .expect("mount");
    assert_eq!(
        root.markup(),
        "<main><h1>title</h1><i>spinner</i></main>"
    );

    resource.resolve("body", "text");
    root.flush_work().expect("retry");
    assert_eq!(root.markup(), "<main><h1>title</h1>text</main>");
}

#[test]
fn suspending_again_hides_content_and_keeps_its_state() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    let resource = TextResource::new();
    resource.preload("a", "alpha");

    let setter: Rc<RefCell<Option<StateHandle<i64>>>> = Rc::default();
    let slot = Rc::clone(&setter);
    let effect_log = log.clone();
    let counter = Element::render_fn("Counter", move |hooks| {
        let (count, set) = hooks.use_state(|| 0_i64);
        *slot.borrow_mut() = Some(set);
        let log = effect_log.clone();
        hooks.use_effect((), move || {
            log.push("counter mounted");
            let log = log.clone();
            Some(Box::new(move || log.push("counter unmounted")))
        });
        Ok(Element::host("span").child(count.to_string()).build())
    });
    let app = |key: &'static str| {
        Element::host("div")
            .child(Element::suspense(
                [
                    counter.clone(),
                    Element::host("p").child(reader(&resource, key, &log)).build(),
                ],
                [Element::text("Loading...")],
            ))
            .build()
    };

    root.render(app("a")).expect("mount");
    assert_eq!(root.markup(), "<div><span>0</span><p>alpha</p></div>");
    setter.borrow().clone().expect("setter").set(5);
    root.flush_work().expect("count");
    log.take();

    root.render(app("b")).expect("suspend");
    assert_eq!(
        root.markup(),
        "<div><span hidden>5</span><p hidden>alpha</p>Loading...</div>"
    );
    assert!(root.is_showing_fallback(boundary_of(&root)));
    assert!(!log.contains("counter unmounted"));

    resource.resolve("b", "beta");
    root.flush_work().expect("reveal");
    assert_eq!(root.markup(), "<div><span>5</span><p>beta</p></div>");
    assert!(!log.contains("counter unmounted"));
    assert!(!log.contains("counter mounted"));
}

#[test]
fn stale_resolution_after_a_newer_attempt_is_harmless() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    let resource = TextResource::new();
    let app = |key: &'static str| {
        Element::suspense([reader(&resource, key, &log)], [Element::text("…")])
    };

    root.render(app("first")).expect("mount");
    root.render(app("second")).expect("switch");
    assert_eq!(root.markup(), "…");

    resource.resolve("first", "one");
    root.flush_work().expect("stale retry");
    assert_eq!(root.markup(), "…");

    resource.resolve("second", "two");
    root.flush_work().expect("retry");
    assert_eq!(root.markup(), "two");
}

#[test]
fn suspension_without_a_boundary_is_uncaught() {
    let mut root = TestRoot::new();
    let log = root.log().clone();
    let resource = TextResource::new();
    let result = root.render(reader(&resource, "k", &log));
    assert!(matches!(result, Err(ReconcilerError::Uncaught(_))));
    assert_eq!(root.markup(), "");
    assert_eq!(root.host().uncaught_errors().len(), 1);
}

// ============================================================================
// Offscreen
// ============================================================================

#[test]
fn hidden_offscreen_content_is_prerendered_after_visible_work() {
    let mut root = TestRoot::new();
    let view = |hidden: bool| {
        Element::host("div")
            .child(Element::host("h1").child("visible"))
            .child(Element::offscreen(
                hidden,
                [Element::host("p").child("later").build()],
            ))
            .build()
    };

    root.render(view(true)).expect("mount");
    let records = root.commits().take();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].lanes, Lanes::DEFAULT);
    assert_eq!(records[1].lanes, Lanes::OFFSCREEN);
    assert_eq!(root.markup(), "<div><h1>visible</h1><p hidden>later</p></div>");

    root.render(view(false)).expect("reveal");
    assert_eq!(root.markup(), "<div><h1>visible</h1><p>later</p></div>");
}

//! Benchmarks for the render and commit pipeline.
//!
//! Measures mounting a wide keyed list, reversing it, updating one leaf deep
//! in the tree and driving a pass in small time slices.
//!
//! Run with: cargo bench -p fiber-runtime --bench work_loop_bench

use std::cell::RefCell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use fiber_harness::TestRoot;
use fiber_runtime::{Element, StateHandle, UnitBudget, WorkStatus};

fn keyed_list(len: usize, reversed: bool) -> Element {
    let mut keys: Vec<usize> = (0..len).collect();
    if reversed {
        keys.reverse();
    }
    Element::host("ul")
        .children(keys.into_iter().map(|k| {
            Element::host("li")
                .key(k)
                .prop("index", i64::try_from(k).unwrap_or(i64::MAX))
                .child(format!("row {k}"))
                .build()
        }))
        .build()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_loop/mount");
    for len in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                TestRoot::new,
                |mut root| {
                    root.render(keyed_list(len, false)).expect("mount");
                    black_box(root.commit_count())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_loop/reverse");
    for len in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let mut root = TestRoot::new();
                    root.render(keyed_list(len, false)).expect("mount");
                    root
                },
                |mut root| {
                    root.render(keyed_list(len, true)).expect("reverse");
                    black_box(root.live_nodes())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// A chain of `depth` components with a counter at the bottom.
fn deep_tree(depth: usize, setter: &Rc<RefCell<Option<StateHandle<u64>>>>) -> Element {
    let slot = Rc::clone(setter);
    let mut element = Element::render_fn("Leaf", move |hooks| {
        let (n, set) = hooks.use_state(|| 0_u64);
        *slot.borrow_mut() = Some(set);
        Ok(Element::text(n.to_string()))
    });
    for _ in 0..depth {
        element = Element::host("div").child(element).build();
    }
    element
}

fn bench_deep_update(c: &mut Criterion) {
    let setter: Rc<RefCell<Option<StateHandle<u64>>>> = Rc::default();
    let mut root = TestRoot::new();
    root.render(deep_tree(200, &setter)).expect("mount");
    let handle = setter.borrow().clone().expect("leaf rendered");

    let mut tick = 0_u64;
    c.bench_function("work_loop/deep_leaf_update", |b| {
        b.iter(|| {
            tick += 1;
            handle.set(tick);
            root.flush_work().expect("update");
            black_box(root.commit_count())
        });
    });
}

fn bench_time_slicing(c: &mut Criterion) {
    c.bench_function("work_loop/sliced_mount_1000", |b| {
        b.iter_batched(
            || {
                let mut root = TestRoot::new();
                root.schedule(keyed_list(1000, false)).expect("schedule");
                root
            },
            |mut root| {
                let mut slices = 0_u32;
                while root.perform_work(&mut UnitBudget::new(64)).expect("slice")
                    == WorkStatus::Yielded
                {
                    slices += 1;
                }
                black_box(slices)
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_mount,
    bench_reorder,
    bench_deep_update,
    bench_time_slicing
);
criterion_main!(benches);

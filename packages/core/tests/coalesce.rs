//! Coalescing: redundant recomputes, property writes, and reference
//! resolutions collapse into the already-queued chore.

use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use resin_core::{Chore, LazyRef};

mod common;
use common::harness;

#[tokio::test]
async fn burst_of_writes_runs_the_effect_once() {
    let h = harness();
    let owner = h.scheduler.create_owner(None);
    let cell = h.scheduler.create_cell(owner, Rc::new(0i32));

    let runs = Rc::new(Cell::new(0));
    let observed = Rc::new(Cell::new(-1));
    {
        let runs = runs.clone();
        let observed = observed.clone();
        h.scheduler.create_effect(owner, move |graph| {
            runs.set(runs.get() + 1);
            let value = graph.read(cell);
            observed.set(*value.as_any().downcast_ref::<i32>().unwrap());
        });
    }
    h.scheduler.drain_all().await;
    assert_eq!(runs.get(), 1);
    assert_eq!(observed.get(), 0);

    // Two writes before the drain produce one recompute seeing the latest
    // value, never an intermediate run seeing 1.
    h.scheduler.write_cell(cell, Rc::new(1i32));
    h.scheduler.write_cell(cell, Rc::new(2i32));
    h.scheduler.drain_all().await;

    assert_eq!(runs.get(), 2);
    assert_eq!(observed.get(), 2);
}

#[tokio::test]
async fn property_writes_coalesce_and_the_latest_value_wins() {
    let h = harness();
    let owner = h.scheduler.create_owner(None);
    h.tree.label(owner, "widget");

    h.scheduler.schedule(Chore::set_property(
        owner,
        "title",
        Rc::new("first".to_string()),
    ));
    h.scheduler.schedule(Chore::set_property(
        owner,
        "title",
        Rc::new("second".to_string()),
    ));
    h.scheduler.drain_all().await;

    assert_eq!(
        h.tree.applied(),
        vec![(owner, "title".to_string(), "second".to_string())]
    );
}

#[tokio::test]
async fn rapid_rerenders_write_each_property_once() {
    let h = harness();
    let owner = h.scheduler.create_owner(None);
    h.tree.label(owner, "widget");

    // Two diffs of the same owner each report a write to "title". Both diffs
    // run, but the writes they produce collapse into one chore and only the
    // second diff's value reaches the tree.
    h.tree.plan_writes(owner, &[("title", "x")]);
    h.tree.plan_writes(owner, &[("title", "y")]);
    h.scheduler.schedule(Chore::reconcile(owner, Rc::new(())));
    h.scheduler.schedule(Chore::reconcile(owner, Rc::new(())));
    h.scheduler.drain_all().await;

    assert_eq!(
        h.tree.applied(),
        vec![(owner, "title".to_string(), "y".to_string())]
    );
    let stages = h
        .log
        .borrow()
        .iter()
        .filter(|entry| entry.starts_with("stage-widget-title"))
        .count();
    assert_eq!(stages, 1);
}

#[tokio::test]
async fn distinct_properties_do_not_coalesce() {
    let h = harness();
    let owner = h.scheduler.create_owner(None);
    h.tree.label(owner, "widget");

    h.scheduler
        .schedule(Chore::set_property(owner, "title", Rc::new("a".to_string())));
    h.scheduler
        .schedule(Chore::set_property(owner, "class", Rc::new("b".to_string())));
    h.scheduler.drain_all().await;

    assert_eq!(h.tree.applied().len(), 2);
}

#[tokio::test]
async fn reference_resolution_is_deduplicated_and_idempotent() {
    let h = harness();

    // Queued twice, resolved once.
    h.scheduler.schedule(Chore::resolve(LazyRef::new("chunk-1")));
    h.scheduler.schedule(Chore::resolve(LazyRef::new("chunk-1")));
    h.scheduler.drain_all().await;
    assert_eq!(h.resolver.resolutions(), 1);

    // A later resolution of the same reference hits the resolver's cache.
    h.scheduler.schedule(Chore::resolve(LazyRef::new("chunk-1")));
    h.scheduler.drain_all().await;
    assert_eq!(h.resolver.resolutions(), 1);
    assert!(h
        .log
        .borrow()
        .iter()
        .any(|entry| entry == "resolve-cached-chunk-1"));
}

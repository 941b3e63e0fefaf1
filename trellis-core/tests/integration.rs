//! Integration Tests for the Reactive Graph
//!
//! These tests drive states, selectors and actions together through the
//! public API and check the batching and consistency guarantees.

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;

use trellis_core::graph::Status;
use trellis_core::reactive::Cleanup;
use trellis_core::{bootstrap, Error, GetterContext, ObserveOptions, Result, Selector, State};

type Calls<T> = Rc<RefCell<Vec<(T, Option<T>)>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Observer that records every `(new, old)` pair it receives.
fn recorder<T: Clone + 'static>() -> (Calls<T>, impl Fn(&T, Option<&T>) + 'static) {
    let calls: Calls<T> = Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    (calls, move |new: &T, old: Option<&T>| {
        sink.borrow_mut().push((new.clone(), old.cloned()))
    })
}

fn counted<T, F>(counter: &Rc<Cell<u32>>, f: F) -> impl Fn(&GetterContext<'_>) -> Result<T>
where
    F: Fn(&GetterContext<'_>) -> Result<T> + 'static,
{
    let counter = counter.clone();
    move |cx: &GetterContext<'_>| {
        counter.set(counter.get() + 1);
        f(cx)
    }
}

#[test]
fn read_is_idempotent() {
    let universe = bootstrap();
    let calls = Rc::new(Cell::new(0));
    let state = universe.state(3_i32);
    let source = state.clone();
    let squared = universe.selector(counted(&calls, move |cx| Ok(cx.get(&source)?.pow(2))));

    assert_eq!(squared.get().unwrap(), 9);
    assert_eq!(squared.get().unwrap(), 9);
    assert_eq!(calls.get(), 1);
}

#[test]
fn observer_fires_once_per_transaction() {
    init_tracing();
    let universe = bootstrap();
    let a = universe.state(1);
    let b = universe.state(2);
    let (a_read, b_read) = (a.clone(), b.clone());
    let sum = universe.selector(move |cx| Ok(cx.get(&a_read)? + cx.get(&b_read)?));

    let (calls, observer) = recorder();
    let _sub = sum.observe(observer).unwrap();

    let set_both = universe.action(move |cx, (x, y): (i32, i32)| {
        cx.set(&a, x)?;
        cx.set(&b, y)
    });
    set_both.dispatch((10, 20)).unwrap();

    assert_eq!(*calls.borrow(), vec![(30, Some(3))]);
}

#[test]
fn diamond_recomputes_each_node_once() {
    init_tracing();
    let universe = bootstrap();
    let (b_calls, c_calls, d_calls) = (
        Rc::new(Cell::new(0)),
        Rc::new(Cell::new(0)),
        Rc::new(Cell::new(0)),
    );

    let a = universe.state(1);
    let a_read = a.clone();
    let b = universe.selector(counted(&b_calls, move |cx| Ok(cx.get(&a_read)? + 1)));
    let a_read = a.clone();
    let c = universe.selector(counted(&c_calls, move |cx| Ok(cx.get(&a_read)? * 10)));
    let (b_read, c_read) = (b.clone(), c.clone());
    let d = universe.selector(counted(&d_calls, move |cx| Ok(cx.get(&b_read)? + cx.get(&c_read)?)));

    let (calls, observer) = recorder();
    let _sub = d.observe(observer).unwrap();
    let _b_sub = b.observe(|_, _| {}).unwrap();
    let _c_sub = c.observe(|_, _| {}).unwrap();
    assert_eq!((b_calls.get(), c_calls.get(), d_calls.get()), (1, 1, 1));

    let set = universe.action(move |cx, value: i32| cx.set(&a, value));
    set.dispatch(2).unwrap();

    assert_eq!((b_calls.get(), c_calls.get(), d_calls.get()), (2, 2, 2));
    assert_eq!(*calls.borrow(), vec![(23, Some(12))]);
}

#[test]
fn unchanged_value_does_not_notify() {
    let universe = bootstrap();
    let n = universe.state(4);
    let n_read = n.clone();
    let is_even = universe.selector(move |cx| Ok(cx.get(&n_read)? % 2 == 0));

    let (calls, observer) = recorder();
    let _sub = is_even.observe(observer).unwrap();

    let set = universe.action(move |cx, value: i32| cx.set(&n, value));
    set.dispatch(6).unwrap();
    assert!(calls.borrow().is_empty());

    set.dispatch(7).unwrap();
    assert_eq!(*calls.borrow(), vec![(false, Some(true))]);
}

#[test]
fn self_read_is_a_circular_dependency() {
    let universe = bootstrap();
    let this: Rc<OnceCell<Selector<i32>>> = Rc::new(OnceCell::new());
    let me = this.clone();
    let selector = universe.selector(move |cx| match me.get() {
        Some(me) => Ok(cx.get(me)? + 1),
        None => Ok(0),
    });
    let _ = this.set(selector.clone());

    let err = selector.get().unwrap_err();
    assert!(err.is_circular_dependency());
}

#[test]
fn every_node_in_a_ring_reports_the_cycle() {
    let universe = bootstrap();
    let ring: Vec<Rc<OnceCell<Selector<i32>>>> = (0..3).map(|_| Rc::new(OnceCell::new())).collect();

    let nodes: Vec<Selector<i32>> = (0..3)
        .map(|i| {
            let next = ring[(i + 1) % 3].clone();
            universe.selector(move |cx| match next.get() {
                Some(next) => cx.get(next),
                None => Ok(0),
            })
        })
        .collect();
    for (cell, node) in ring.iter().zip(&nodes) {
        let _ = cell.set(node.clone());
    }

    for node in &nodes {
        let err = node.get().unwrap_err();
        assert_eq!(err, Error::CircularDependency { node: node.id() });
        assert_eq!(universe.status(node), Status::Stale);
    }
}

#[test]
fn failed_computation_keeps_previous_edges() {
    let universe = bootstrap();
    let flag = universe.state(false);
    let value = universe.state(1);
    let (flag_read, value_read) = (flag.clone(), value.clone());
    let guarded = universe.selector(move |cx| {
        if cx.get(&flag_read)? {
            Err(Error::out_of_range("flag raised"))
        } else {
            cx.get(&value_read)
        }
    });
    assert_eq!(guarded.get().unwrap(), 1);

    let raise = universe.action(move |cx, ()| cx.set(&flag, true));
    raise.dispatch(()).unwrap();
    assert!(guarded.get().is_err());

    let snapshot = universe.snapshot();
    let node = snapshot.nodes.iter().find(|n| n.id == guarded.id()).unwrap();
    assert_eq!(node.dependencies.len(), 2);
    assert_eq!(node.status, Status::Stale);
}

#[test]
fn pending_updates_resolve_in_order() {
    let universe = bootstrap();
    let state = universe.state(1);
    let (calls, observer) = recorder();
    let _sub = state.observe(observer).unwrap();

    let seen_inside = Rc::new(Cell::new(0));
    let (target, seen) = (state.clone(), seen_inside.clone());
    let bump_thrice = universe.action(move |cx, ()| {
        for _ in 0..3 {
            cx.update(&target, |v| v + 1)?;
        }
        seen.set(cx.get(&target)?);
        Ok(())
    });
    bump_thrice.dispatch(()).unwrap();

    assert_eq!(seen_inside.get(), 4);
    assert_eq!(state.get().unwrap(), 4);
    assert_eq!(*calls.borrow(), vec![(4, Some(1))]);
}

#[test]
fn end_to_end_example() {
    init_tracing();
    let universe = bootstrap();
    let state = universe.state(1);
    let source = state.clone();
    let sel = universe.selector(move |cx| Ok(cx.get(&source)? * 2));
    let target = state.clone();
    let action = universe.action(move |cx, ()| cx.update(&target, |v| v + 1));

    let (calls, observer) = recorder();
    let _sub = sel.observe(observer).unwrap();
    action.dispatch(()).unwrap();

    assert_eq!(state.get().unwrap(), 2);
    assert_eq!(sel.get().unwrap(), 4);
    assert_eq!(*calls.borrow(), vec![(4, Some(2))]);
}

#[test]
fn write_after_dispatch_returns_is_rejected() {
    let universe = bootstrap();
    let state = universe.state(0);

    // stands in for a timer scheduled by the action
    let timer: Rc<RefCell<Option<Box<dyn Fn() -> Result<()>>>>> = Rc::new(RefCell::new(None));
    let (target, slot) = (state.clone(), timer.clone());
    let schedule = universe.action(move |cx, ()| {
        cx.set(&target, 1)?;
        let late = target.clone();
        *slot.borrow_mut() = Some(Box::new(move || late.set(2)));
        Ok(())
    });
    schedule.dispatch(()).unwrap();

    let fire = timer.borrow_mut().take().unwrap();
    let err = fire().unwrap_err();
    assert_eq!(err, Error::OutOfTransactionWrite { node: state.id() });
    assert_eq!(state.get().unwrap(), 1);
}

#[test]
fn observers_fire_in_subscription_order() {
    let universe = bootstrap();
    let state = universe.state(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let subs: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|name| {
            let order = order.clone();
            state.observe(move |_, _| order.borrow_mut().push(name)).unwrap()
        })
        .collect();

    let set = universe.action(move |cx, value: i32| cx.set(&state, value));
    set.dispatch(1).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);

    subs[1].unsubscribe();
    order.borrow_mut().clear();
    set.dispatch(2).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "third"]);
}

#[test]
fn once_observer_removes_itself() {
    let universe = bootstrap();
    let state = universe.state(0);
    let (calls, observer) = recorder();
    let _keep = state.observe(|_, _| {}).unwrap();
    let _once = state.observe_with(observer, ObserveOptions::new().once()).unwrap();

    let set = universe.action(move |cx, value: i32| cx.set(&state, value));
    set.dispatch(1).unwrap();
    set.dispatch(2).unwrap();
    assert_eq!(*calls.borrow(), vec![(1, Some(0))]);
}

#[test]
fn unobserved_nodes_are_not_recomputed_eagerly() {
    let universe = bootstrap();
    let calls = Rc::new(Cell::new(0));
    let state = universe.state(1);
    let source = state.clone();
    let lazy = universe.selector(counted(&calls, move |cx| Ok(cx.get(&source)? + 1)));
    assert_eq!(lazy.get().unwrap(), 2);

    let set = universe.action(move |cx, value: i32| cx.set(&state, value));
    set.dispatch(5).unwrap();
    set.dispatch(6).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(universe.status(&lazy), Status::Stale);

    assert_eq!(lazy.get().unwrap(), 7);
    assert_eq!(calls.get(), 2);
}

#[test]
fn effects_follow_observation() {
    let universe = bootstrap();
    let state = universe.state(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let _effect = state.effect(move || {
        sink.borrow_mut().push("mount");
        let sink = sink.clone();
        Some(Box::new(move || sink.borrow_mut().push("cleanup")) as Cleanup)
    });

    let sub = state.observe(|_, _| {}).unwrap();
    sub.unsubscribe();
    let sub = state.observe(|_, _| {}).unwrap();
    sub.unsubscribe();

    assert_eq!(*log.borrow(), vec!["mount", "cleanup", "mount", "cleanup"]);
}

#[test]
fn failed_notification_resumes_after_a_successful_read() {
    init_tracing();
    let universe = bootstrap();
    let state = universe.state(1);
    let source = state.clone();
    let checked = universe.selector(move |cx| {
        let value = cx.get(&source)?;
        if value > 5 {
            return Err(Error::out_of_range(format!("{value} exceeds 5")));
        }
        Ok(value)
    });
    let (calls, observer) = recorder();
    let _sub = checked.observe(observer).unwrap();

    let set = universe.action(move |cx, value: i32| cx.set(&state, value));
    set.dispatch(10).unwrap();
    assert!(calls.borrow().is_empty());
    assert_eq!(universe.status(&checked), Status::Stale);

    // still Stale, so the next write does not reach it
    set.dispatch(3).unwrap();
    assert!(calls.borrow().is_empty());
    assert_eq!(checked.get().unwrap(), 3);

    set.dispatch(4).unwrap();
    assert_eq!(*calls.borrow(), vec![(4, Some(1))]);
}

#[test]
fn disposing_a_dependency_invalidates_readers() {
    let universe = bootstrap();
    let state = universe.state(1);
    let source = state.clone();
    let reader = universe.selector(move |cx| cx.get(&source));
    assert_eq!(reader.get().unwrap(), 1);
    let nodes_before = universe.node_count();

    state.dispose();

    assert_eq!(universe.status(&reader), Status::Stale);
    assert_eq!(reader.get().unwrap_err(), Error::Disposed { node: state.id() });
    assert!(universe.node_count() < nodes_before);
}

#[test]
fn universes_do_not_mix() {
    let first = bootstrap();
    let second = bootstrap();
    let foreign: State<i32> = second.state(1);
    let reader = first.selector(move |cx| cx.get(&foreign));

    assert!(matches!(reader.get(), Err(Error::ForeignNode { .. })));
}

#[test]
fn snapshot_serializes_graph() {
    let universe = bootstrap();
    let state = universe.state(1);
    let source = state.clone();
    let doubled = universe.selector(move |cx| Ok(cx.get(&source)? * 2));
    doubled.get().unwrap();

    let json = serde_json::to_value(universe.snapshot()).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);

    let entry = nodes
        .iter()
        .find(|n| n["id"] == serde_json::json!(doubled.id().raw()))
        .unwrap();
    assert_eq!(entry["status"], "Fresh");
    assert_eq!(entry["dependencies"], serde_json::json!([state.id().raw()]));
}

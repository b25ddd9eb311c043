//! Integration Tests for Reactive System
//!
//! These tests verify that views, effects, computed cells, watchers and refs
//! work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::reactive::{
    computed, drain, proxy_refs, reactive, readonly, to_refs, watch, Access, Effect,
    EffectOptions, Flush, Key, OnInvalidate, Reactive, Ref, Runtime, Target, Value, WatchOptions,
};
use ripple_core::ReactiveError;
use serde_json::json;

fn state(json: serde_json::Value) -> Reactive {
    reactive(Target::try_from(json).expect("fixture is structured"))
}

fn number(view: &Reactive, key: &str) -> f64 {
    view.read(key).as_f64().unwrap_or(f64::NAN)
}

/// Counts how often `body` runs inside an effect.
fn counted(body: impl Fn() + 'static) -> (Effect, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    let runs_clone = runs.clone();
    let effect = Effect::new(move || {
        runs_clone.set(runs_clone.get() + 1);
        body();
    });
    (effect, runs)
}

/// The canonical example: an effect sees writes, a computed cell derives.
#[test]
fn effect_and_computed_follow_writes() {
    let o = state(json!({ "a": 1 }));

    let seen = Rc::new(Cell::new(0.0));
    let (o_clone, seen_clone) = (o.clone(), seen.clone());
    let _effect = Effect::new(move || seen_clone.set(number(&o_clone, "a")));

    o.write("a", 2);
    assert_eq!(seen.get(), 2.0);

    let o_clone = o.clone();
    let c = computed(move || number(&o_clone, "a") * 2.0);
    o.write("a", 3);
    assert_eq!(c.get(), 6.0);
    assert_eq!(c.get(), 6.0);
    assert_eq!(c.compute_count(), 1);
}

/// Reading `a` only makes an effect deaf to `b`.
#[test]
fn tracking_precision() {
    let o = state(json!({ "a": 1, "b": 1 }));
    let o_clone = o.clone();
    let (_effect, runs) = counted(move || {
        o_clone.read("a");
    });

    o.write("b", 2);
    assert_eq!(runs.get(), 1);
    o.write("a", 2);
    assert_eq!(runs.get(), 2);
}

/// A branch no longer taken leaves no subscription behind.
#[test]
fn cleanup_drops_stale_branch() {
    let o = state(json!({ "flag": true, "a": 1, "b": 1 }));
    let o_clone = o.clone();
    let (_effect, runs) = counted(move || {
        if o_clone.read("flag") == Value::Bool(true) {
            o_clone.read("a");
        } else {
            o_clone.read("b");
        }
    });

    o.write("flag", false);
    assert_eq!(runs.get(), 2);

    o.write("a", 2);
    assert_eq!(runs.get(), 2);
    assert_eq!(Runtime::subscriber_count(o.id(), &Key::field("a")), 0);

    o.write("b", 2);
    assert_eq!(runs.get(), 3);
}

/// An effect incrementing what it reads runs once.
#[test]
fn self_increment_does_not_recurse() {
    let o = state(json!({ "count": 0 }));
    let o_clone = o.clone();
    let (_effect, runs) = counted(move || {
        let next = number(&o_clone, "count") + 1.0;
        o_clone.write("count", next);
    });

    assert_eq!(runs.get(), 1);
    assert_eq!(number(&o, "count"), 1.0);

    // Outside writes still re-run it.
    o.write("count", 10);
    assert_eq!(runs.get(), 2);
    assert_eq!(number(&o, "count"), 11.0);
}

/// Writing `NaN` over `NaN` is not a change.
#[test]
fn nan_write_is_suppressed() {
    let o = state(json!({}));
    o.write("a", f64::NAN);

    let o_clone = o.clone();
    let (_effect, runs) = counted(move || {
        o_clone.read("a");
    });

    o.write("a", f64::NAN);
    assert_eq!(runs.get(), 1);
}

/// Adding a key reaches enumeration; deleting a missing key reaches nothing.
#[test]
fn structural_enumeration() {
    let o = state(json!({ "a": 1 }));
    let o_clone = o.clone();
    let (_effect, runs) = counted(move || {
        for key in o_clone.keys() {
            o_clone.read(key);
        }
    });

    o.write("b", 2);
    assert_eq!(runs.get(), 2);

    assert!(o.delete("missing"));
    assert_eq!(runs.get(), 2);

    o.delete("a");
    assert_eq!(runs.get(), 3);
}

/// Truncating a sequence re-runs readers of dropped indices only.
#[test]
fn sequence_length_truncation() {
    let list = state(json!([1, 2, 3]));

    let tail = list.clone();
    let (_on_tail, tail_runs) = counted(move || {
        tail.read(2);
    });
    let head = list.clone();
    let (_on_head, head_runs) = counted(move || {
        head.read(0);
    });

    list.write(Key::Length, 1);
    assert_eq!(tail_runs.get(), 2);
    assert_eq!(head_runs.get(), 1);
}

/// Nested effects restore the outer effect as the tracking target.
#[test]
fn nested_effects_track_their_own_reads() {
    let o = state(json!({ "outer": 0, "inner": 0 }));
    let inner_runs = Rc::new(Cell::new(0));
    let inner_effects = Rc::new(RefCell::new(Vec::new()));

    let (o_clone, inner_runs_clone, inner_effects_clone) =
        (o.clone(), inner_runs.clone(), inner_effects.clone());
    let (_outer, outer_runs) = counted(move || {
        let o_inner = o_clone.clone();
        let runs = inner_runs_clone.clone();
        let inner = Effect::new(move || {
            runs.set(runs.get() + 1);
            o_inner.read("inner");
        });
        inner_effects_clone.borrow_mut().push(inner);
        o_clone.read("outer");
    });

    o.write("inner", 1);
    assert_eq!(outer_runs.get(), 1);
    assert_eq!(inner_runs.get(), 2);

    o.write("outer", 1);
    assert_eq!(outer_runs.get(), 2);
}

/// Computed cells do no work until read and none for repeated reads.
#[test]
fn computed_laziness() {
    let a = Ref::new(1);
    let b = Ref::new(2);
    let calls = Rc::new(Cell::new(0));

    let (a_clone, b_clone, calls_clone) = (a.clone(), b.clone(), calls.clone());
    let sum = computed(move || {
        calls_clone.set(calls_clone.get() + 1);
        a_clone.get().as_f64().unwrap_or_default() + b_clone.get().as_f64().unwrap_or_default()
    });
    assert_eq!(calls.get(), 0);

    assert_eq!(sum.get(), 3.0);
    assert_eq!(sum.get(), 3.0);
    assert_eq!(calls.get(), 1);

    a.set(10);
    assert_eq!(calls.get(), 1);
    assert_eq!(sum.get(), 12.0);
    assert_eq!(calls.get(), 2);
}

/// A post-flush watcher runs at the microtask checkpoint, not before.
#[test]
fn watch_post_flush() {
    let o = state(json!({ "a": 1 }));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let seen_clone = seen.clone();
    let _handle = watch(
        o.clone(),
        move |_: &Value, _: Option<&Value>, _: &OnInvalidate| seen_clone.borrow_mut().push(()),
        WatchOptions::default().flush(Flush::Post),
    );

    o.write("a", 2);
    assert!(seen.borrow().is_empty());

    drain().expect("flush succeeds");
    assert_eq!(seen.borrow().len(), 1);
}

/// Two quick changes invalidate the first callback before the second runs.
#[test]
fn watch_invalidation() {
    let o = state(json!({ "query": "a" }));
    let log = Rc::new(RefCell::new(Vec::new()));

    let (o_clone, log_clone) = (o.clone(), log.clone());
    let _handle = watch(
        ripple_core::reactive::WatchSource::getter(move || o_clone.read("query")),
        move |new: &Value, _: Option<&Value>, on_invalidate: &OnInvalidate| {
            let query = new.as_str().unwrap_or_default().to_string();
            log_clone.borrow_mut().push(format!("start {query}"));
            let log = log_clone.clone();
            on_invalidate.register(move || log.borrow_mut().push(format!("expire {query}")));
        },
        WatchOptions::default().flush(Flush::Post),
    );

    o.write("query", "b");
    drain().expect("flush succeeds");
    o.write("query", "c");
    drain().expect("flush succeeds");

    assert_eq!(*log.borrow(), vec!["start b", "expire b", "start c"]);
}

/// A callback's deferred result is dropped once a newer change invalidated it.
#[test]
fn watch_invalidation_discards_stale_results() {
    let o = state(json!({ "query": "a" }));
    let pending: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
    let applied = Rc::new(RefCell::new(Vec::new()));

    let (o_clone, pending_clone, applied_clone) = (o.clone(), pending.clone(), applied.clone());
    let _handle = watch(
        ripple_core::reactive::WatchSource::getter(move || o_clone.read("query")),
        move |new: &Value, _: Option<&Value>, on_invalidate: &OnInvalidate| {
            let expired = Rc::new(Cell::new(false));
            let expired_clone = expired.clone();
            on_invalidate.register(move || expired_clone.set(true));

            // Stands in for work that finishes after later changes.
            let result = new.as_str().unwrap_or_default().to_string();
            let applied = applied_clone.clone();
            pending_clone.borrow_mut().push(Box::new(move || {
                if !expired.get() {
                    applied.borrow_mut().push(result);
                }
            }));
        },
        WatchOptions::default().flush(Flush::Post),
    );

    o.write("query", "b");
    drain().expect("flush succeeds");
    o.write("query", "c");
    drain().expect("flush succeeds");

    let resolved: Vec<_> = pending.borrow_mut().drain(..).collect();
    assert_eq!(resolved.len(), 2);
    for resolve in resolved {
        resolve();
    }
    assert_eq!(*applied.borrow(), vec!["c".to_string()]);
}

/// Two effects pushing onto one list each run once.
#[test]
fn push_from_two_effects() {
    let target = Target::sequence();
    let list = reactive(&target);

    let first = list.clone();
    let (_a, a_runs) = counted(move || {
        first.push(1);
    });
    let second = list.clone();
    let (_b, b_runs) = counted(move || {
        second.push(2);
    });

    assert_eq!(a_runs.get(), 1);
    assert_eq!(b_runs.get(), 1);
    assert_eq!(target.len(), 2);
}

/// `includes` finds a raw element through the wrapping view.
#[test]
fn includes_falls_back_to_raw() {
    let element = Target::from_fields([("id", 1)]);
    let list = reactive(Target::from_items([element.clone()]));
    assert!(list.includes(element));
}

/// Readonly views ignore writes and never subscribe.
#[test]
fn readonly_view() {
    let target = Target::try_from(json!({ "a": 1, "nested": { "b": 2 } })).expect("structured");
    let ro = readonly(&target);

    assert!(ro.write("a", 5));
    assert_eq!(target.read("a"), Value::from(1));

    let nested = ro.read("nested");
    let nested = nested.as_reactive().expect("nested values are wrapped");
    assert!(nested.is_readonly());
    nested.write("b", 3);
    assert_eq!(number(nested, "b"), 2.0);
}

/// Template-style access through `proxy_refs`.
#[test]
fn proxy_refs_bindings() {
    let count = Ref::new(0);
    let bindings = reactive(Target::from_fields([("count", Value::from(count.clone()))]));
    let view = proxy_refs(bindings.clone()).expect("structured");

    let (view_clone, seen) = (view.clone(), Rc::new(Cell::new(-1.0)));
    let seen_clone = seen.clone();
    let _effect = Effect::new(move || {
        seen_clone.set(view_clone.read("count").as_f64().unwrap_or_default())
    });

    view.write("count", 4);
    assert_eq!(count.get(), Value::from(4));
    assert_eq!(seen.get(), 4.0);
}

/// Destructured refs stay connected to their source.
#[test]
fn to_refs_stay_connected() {
    let o = state(json!({ "x": 1, "y": 2 }));
    let refs = to_refs(&o);

    let y = refs[&Key::field("y")].clone();
    let seen = Rc::new(Cell::new(0.0));
    let seen_clone = seen.clone();
    let _effect = Effect::new(move || seen_clone.set(y.get().as_f64().unwrap_or_default()));

    o.write("y", 9);
    assert_eq!(seen.get(), 9.0);
}

/// A batched effect runs once per flush however often it is triggered.
#[test]
fn batched_effects_are_deduplicated() {
    let o = state(json!({ "a": 0, "b": 0 }));
    let o_clone = o.clone();

    let runs = Rc::new(Cell::new(0));
    let runs_clone = runs.clone();
    let _effect = Effect::with_options(
        move || {
            runs_clone.set(runs_clone.get() + 1);
            o_clone.read("a");
            o_clone.read("b");
        },
        EffectOptions::batched(),
    );

    o.write("a", 1);
    o.write("b", 1);
    o.write("a", 2);
    assert_eq!(runs.get(), 1);

    assert_eq!(drain(), Ok(1));
    assert_eq!(runs.get(), 2);
}

/// Batched effects feeding each other are stopped by the flush limit.
#[test]
fn batched_ping_pong_hits_flush_limit() {
    let o = state(json!({ "ping": 0, "pong": 0 }));

    let o_clone = o.clone();
    let _ping = Effect::with_options(
        move || {
            let next = number(&o_clone, "ping") + 1.0;
            o_clone.write("pong", next);
        },
        EffectOptions::batched(),
    );
    let o_clone = o.clone();
    let _pong = Effect::with_options(
        move || {
            let next = number(&o_clone, "pong") + 1.0;
            o_clone.write("ping", next);
        },
        EffectOptions::batched(),
    );

    assert!(matches!(
        drain(),
        Err(ReactiveError::FlushLimitExceeded { .. })
    ));
}

/// Watch options load from configuration.
#[test]
fn watch_options_from_json() {
    let options: WatchOptions =
        serde_json::from_value(json!({ "immediate": true, "flush": "post" })).expect("valid");
    assert!(options.immediate);
    assert_eq!(options.flush, Flush::Post);
}

/// A snapshot of reactive state serializes like the input.
#[test]
fn snapshot_serializes() {
    let o = state(json!({ "list": [1, 2], "name": "x" }));
    o.read("list").as_reactive().expect("wrapped").push(3);
    assert_eq!(
        serde_json::to_value(Value::from(o)).expect("serializable"),
        json!({ "list": [1, 2, 3], "name": "x" })
    );
}

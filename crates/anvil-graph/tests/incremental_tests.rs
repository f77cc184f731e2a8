// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{evaluator, Formula, MathSpec};

fn chain_spec() -> Arc<MathSpec> {
    let spec = Arc::new(MathSpec::new());
    spec.set_input("a", 1);
    spec.set_input("b", 2);
    spec.define("a", Formula::Leaf);
    spec.define("b", Formula::Leaf);
    spec.define("mid", Formula::Sum(vec!["a".into(), "b".into()]));
    spec.define("top", Formula::Sum(vec!["mid".into()]));
    spec
}

#[test]
fn change_propagates_to_the_root() {
    let spec = chain_spec();
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert_eq!(eval.request(&"top".to_owned()).expect("first"), 3);
    spec.set_input("a", 10);
    eval.invalidate(&["a".to_owned()]);
    assert_eq!(eval.request(&"top".to_owned()).expect("second"), 12);
    assert_eq!(spec.executions_of("mid"), 2);
    assert_eq!(spec.executions_of("top"), 2);
    // `b` was only verified, never re-executed.
    assert_eq!(spec.executions_of("b"), 1);
}

#[test]
fn early_cutoff_stops_unchanged_values() {
    let spec = chain_spec();
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert_eq!(eval.request(&"top".to_owned()).expect("first"), 3);

    // Shift weight between the leaves; `mid` recomputes to the same sum, so
    // `top` must not re-execute.
    spec.set_input("a", 2);
    spec.set_input("b", 1);
    eval.invalidate(&["a".to_owned(), "b".to_owned()]);
    assert_eq!(eval.request(&"top".to_owned()).expect("second"), 3);

    assert_eq!(spec.executions_of("a"), 2);
    assert_eq!(spec.executions_of("b"), 2);
    assert_eq!(spec.executions_of("mid"), 2);
    assert_eq!(spec.executions_of("top"), 1, "early cutoff");
}

#[test]
fn unchanged_leaf_reexecution_cuts_off_immediately() {
    let spec = chain_spec();
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert_eq!(eval.request(&"top".to_owned()).expect("first"), 3);

    // Invalidate `a` without changing its value: `a` re-executes (it was
    // reported changed), everything above is verified clean.
    eval.invalidate(&["a".to_owned()]);
    assert_eq!(eval.request(&"top".to_owned()).expect("second"), 3);

    assert_eq!(spec.executions_of("a"), 2);
    assert_eq!(spec.executions_of("mid"), 1);
    assert_eq!(spec.executions_of("top"), 1);
}

#[test]
fn empty_invalidation_is_a_no_op() {
    let spec = chain_spec();
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert_eq!(eval.request(&"top".to_owned()).expect("first"), 3);
    eval.invalidate(&[]);
    assert_eq!(eval.request(&"top".to_owned()).expect("second"), 3);
    for key in ["a", "b", "mid", "top"] {
        assert_eq!(spec.executions_of(key), 1, "{key} untouched");
    }
}

#[test]
fn invalidating_an_unknown_key_touches_nothing() {
    let spec = chain_spec();
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert_eq!(eval.request(&"top".to_owned()).expect("first"), 3);
    eval.invalidate(&["never-computed".to_owned()]);
    assert_eq!(eval.request(&"top".to_owned()).expect("second"), 3);
    for key in ["a", "b", "mid", "top"] {
        assert_eq!(spec.executions_of(key), 1, "{key} untouched");
    }
}

#[test]
fn dirty_error_nodes_recover_after_input_appears() {
    let spec = Arc::new(MathSpec::new());
    spec.define("a", Formula::Leaf); // no input yet: fails
    spec.define("top", Formula::Sum(vec!["a".into()]));
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    assert!(eval.request(&"top".to_owned()).is_err());

    spec.set_input("a", 7);
    eval.invalidate(&["a".to_owned()]);
    assert_eq!(eval.request(&"top".to_owned()).expect("recovers"), 7);
}

#[test]
fn retain_reachable_drops_abandoned_subgraphs() {
    let spec = chain_spec();
    spec.set_input("orphan", 9);
    spec.define("orphan", Formula::Leaf);
    let (mut eval, _sink) = evaluator(Arc::clone(&spec), 2);

    eval.request(&"top".to_owned()).expect("top");
    eval.request(&"orphan".to_owned()).expect("orphan");
    assert_eq!(eval.node_count(), 5);

    eval.retain_reachable(&["top".to_owned()]);
    assert_eq!(eval.node_count(), 4);
    assert!(eval.lookup(&"orphan".to_owned()).is_none());
    assert_eq!(eval.request(&"top".to_owned()).expect("still valid"), 3);
}

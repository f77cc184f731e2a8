// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use common::{evaluator, Formula, MathSpec};

/// Builds a layered DAG: `layers x width` nodes, each inner node summing a
/// pseudo-random subset of the previous layer.
fn layered_spec(layers: usize, width: usize, seed: u64, inputs: &[i64]) -> (Arc<MathSpec>, String) {
    let spec = Arc::new(MathSpec::new());
    let mut state = seed.max(1);
    let mut next = move || {
        // xorshift64*, same generator the engine test suites use elsewhere.
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        state.wrapping_mul(0x2545_F491_4F6C_DD1D)
    };

    for (i, value) in inputs.iter().enumerate().take(width) {
        let name = format!("n0_{i}");
        spec.set_input(&name, *value);
        spec.define(&name, Formula::Leaf);
    }
    for layer in 1..layers {
        for i in 0..width {
            let mut deps = Vec::new();
            for j in 0..width {
                if next() % 3 == 0 || j == i {
                    deps.push(format!("n{}_{j}", layer - 1));
                }
            }
            spec.define(&format!("n{layer}_{i}"), Formula::Sum(deps));
        }
    }
    let top_deps: Vec<String> = (0..width).map(|i| format!("n{}_{i}", layers - 1)).collect();
    spec.define("top", Formula::Sum(top_deps));
    (spec, "top".to_owned())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn value_is_independent_of_worker_count(
        seed in 1u64..u64::MAX,
        inputs in proptest::collection::vec(-100i64..100, 4),
    ) {
        let mut values = Vec::new();
        for workers in [1usize, 4, 8] {
            let (spec, root) = layered_spec(4, 4, seed, &inputs);
            let (mut eval, _sink) = evaluator(Arc::clone(&spec), workers);
            values.push(eval.request(&root).expect("evaluates"));
            // Restarts never re-execute completed work.
            for entry in spec.executions.lock().iter() {
                prop_assert_eq!(*entry.1, 1usize, "{} executed once", entry.0);
            }
        }
        prop_assert_eq!(values[0], values[1]);
        prop_assert_eq!(values[1], values[2]);
    }

    #[test]
    fn incremental_matches_from_scratch(
        seed in 1u64..u64::MAX,
        inputs in proptest::collection::vec(-100i64..100, 4),
        delta in -50i64..50,
    ) {
        // Evaluate, mutate one leaf, re-evaluate incrementally; compare with
        // a fresh evaluator over the mutated inputs.
        let (spec, root) = layered_spec(4, 4, seed, &inputs);
        let (mut eval, _sink) = evaluator(Arc::clone(&spec), 4);
        let _ = eval.request(&root).expect("first evaluation");

        spec.set_input("n0_0", inputs[0] + delta);
        eval.invalidate(&["n0_0".to_owned()]);
        let incremental = eval.request(&root).expect("incremental");

        let mut fresh_inputs = inputs.clone();
        fresh_inputs[0] += delta;
        let (fresh_spec, fresh_root) = layered_spec(4, 4, seed, &fresh_inputs);
        let (mut fresh_eval, _fresh_sink) = evaluator(Arc::clone(&fresh_spec), 4);
        let from_scratch = fresh_eval.request(&fresh_root).expect("from scratch");

        prop_assert_eq!(incremental, from_scratch);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

//! Programmable arithmetic spec used by the evaluator integration tests.
//!
//! Keys are formula names; leaves read from a mutable input table so tests
//! can change inputs and exercise invalidation. Every activation and every
//! completed execution is counted per key, which is how the tests assert
//! early cutoff and restart behavior.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use anvil_graph::{
    CollectingSink, ComputeEnv, DetailedExitCode, EngineFault, EvalOptions, EvalSpec, Evaluator,
    Event, NestedSet, NodeError, Step, StoredEvents,
};

/// Exit codes used by the demo domain.
pub const EXIT_MATH: DetailedExitCode = DetailedExitCode::new(2, 10);
pub const EXIT_CYCLE: DetailedExitCode = DetailedExitCode::new(8, 30);
pub const EXIT_ENGINE: DetailedExitCode = DetailedExitCode::new(9, 40);

/// One formula in the demo graph.
#[derive(Clone, Debug)]
pub enum Formula {
    /// Reads the input table.
    Leaf,
    /// Requests every dep in one batch, then sums.
    Sum(Vec<String>),
    /// Requests deps one at a time, memoizing progress (and the events that
    /// belong to it) in scratch state.
    ChainSum(Vec<String>),
    /// Fails with the given message.
    Fail(String),
    /// Reads `dep`; substitutes `fallback` if the dep failed.
    Recover { dep: String, fallback: i64 },
    /// Sums deps, continuing past failures and aggregating every cause.
    Aggregate(Vec<String>),
    /// Sleeps, then reads the input table (interrupt tests).
    SlowLeaf(std::time::Duration),
}

/// Scratch for [`Formula::ChainSum`].
#[derive(Default)]
struct ChainScratch {
    next: usize,
    acc: i64,
    events: StoredEvents,
}

/// Programmable spec over string keys and integer values.
#[derive(Default)]
pub struct MathSpec {
    pub inputs: Mutex<FxHashMap<String, i64>>,
    pub formulas: Mutex<FxHashMap<String, Formula>>,
    /// Completed executions per key (restarted activations not counted).
    pub executions: Mutex<FxHashMap<String, usize>>,
    /// Total activations per key, restarts included.
    pub activations: Mutex<FxHashMap<String, usize>>,
    /// Treat every key as CPU-heavy (semaphore-gated).
    pub heavy: std::sync::atomic::AtomicBool,
}

impl MathSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&self, key: &str, value: i64) {
        self.inputs.lock().insert(key.to_owned(), value);
    }

    pub fn define(&self, key: &str, formula: Formula) {
        self.formulas.lock().insert(key.to_owned(), formula);
    }

    pub fn executions_of(&self, key: &str) -> usize {
        self.executions.lock().get(key).copied().unwrap_or(0)
    }

    pub fn activations_of(&self, key: &str) -> usize {
        self.activations.lock().get(key).copied().unwrap_or(0)
    }

    fn bump(map: &Mutex<FxHashMap<String, usize>>, key: &str) {
        *map.lock().entry(key.to_owned()).or_insert(0) += 1;
    }

    fn fail(&self, key: &str, message: String) -> Step<Self> {
        Self::bump(&self.executions, key);
        Step::Failed(NodeError::new(
            message,
            NestedSet::singleton(key.to_owned()),
            EXIT_MATH,
        ))
    }
}

impl EvalSpec for MathSpec {
    type Key = String;
    type Value = i64;
    type Cause = String;

    fn compute(&self, key: &Self::Key, env: &mut ComputeEnv<'_, Self>) -> Step<Self> {
        Self::bump(&self.activations, key);
        let formula = match self.formulas.lock().get(key) {
            Some(f) => f.clone(),
            None => return self.fail(key, format!("no formula for {key}")),
        };
        match formula {
            Formula::Leaf => match self.inputs.lock().get(key) {
                Some(v) => {
                    Self::bump(&self.executions, key);
                    Step::Done(*v)
                }
                None => self.fail(key, format!("no input for {key}")),
            },
            Formula::SlowLeaf(delay) => {
                std::thread::sleep(delay);
                match self.inputs.lock().get(key) {
                    Some(v) => {
                        Self::bump(&self.executions, key);
                        Step::Done(*v)
                    }
                    None => self.fail(key, format!("no input for {key}")),
                }
            }
            Formula::Sum(deps) => {
                let values = env.get_values(&deps);
                if env.values_missing() {
                    return Step::Restart;
                }
                let mut sum = 0;
                for value in values.into_iter().flatten() {
                    match value {
                        Ok(v) => sum += v,
                        // Fail-fast: propagate the first failing dep.
                        Err(e) => {
                            Self::bump(&self.executions, key);
                            return Step::Failed(NodeError::aggregate(
                                format!("{key}: dep failed"),
                                vec![e],
                            ));
                        }
                    }
                }
                Self::bump(&self.executions, key);
                Step::Done(sum)
            }
            Formula::ChainSum(deps) => {
                loop {
                    let state = env.state(ChainScratch::default);
                    let index = state.next;
                    let Some(dep) = deps.get(index).cloned() else {
                        // Replay the per-step events buffered across
                        // restarts, then finish.
                        let state = env.state(ChainScratch::default);
                        let buffered = state.events.clone();
                        let total = state.acc;
                        buffered.replay_into(env.listener());
                        env.listener().post(Event::info(format!("{key} = {total}")));
                        Self::bump(&self.executions, key);
                        return Step::Done(total);
                    };
                    match env.get_value(&dep) {
                        None => return Step::Restart,
                        Some(Err(e)) => {
                            Self::bump(&self.executions, key);
                            return Step::Failed(NodeError::aggregate(
                                format!("{key}: dep {dep} failed"),
                                vec![e],
                            ));
                        }
                        Some(Ok(v)) => {
                            let state = env.state(ChainScratch::default);
                            state.acc += v;
                            state.next = index + 1;
                            state
                                .events
                                .post(Event::progress(format!("{key} step {index}")));
                        }
                    }
                }
            }
            Formula::Fail(message) => self.fail(key, message),
            Formula::Recover { dep, fallback } => match env.get_value(&dep) {
                None => Step::Restart,
                Some(Err(_)) => {
                    Self::bump(&self.executions, key);
                    Step::Done(fallback)
                }
                Some(Ok(v)) => {
                    Self::bump(&self.executions, key);
                    Step::Done(v)
                }
            },
            Formula::Aggregate(deps) => {
                let values = env.get_values(&deps);
                if env.values_missing() {
                    return Step::Restart;
                }
                let mut sum = 0;
                let mut errors = Vec::new();
                for value in values.into_iter().flatten() {
                    match value {
                        Ok(v) => sum += v,
                        Err(e) => errors.push(e),
                    }
                }
                Self::bump(&self.executions, key);
                if errors.is_empty() {
                    Step::Done(sum)
                } else {
                    Step::Failed(NodeError::aggregate(
                        format!("{key}: {} dep(s) failed", errors.len()),
                        errors,
                    ))
                }
            }
        }
    }

    fn is_cpu_heavy(&self, _key: &String) -> bool {
        self.heavy.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn fault_error(&self, fault: EngineFault<'_, String>) -> NodeError<String> {
        match fault {
            EngineFault::Cycle(participants) => NodeError::new(
                format!("cycle detected: {}", participants.join(" -> ")),
                NestedSet::from_vec(participants.to_vec()),
                EXIT_CYCLE,
            ),
            EngineFault::RestartWithoutMissingDeps(key) => NodeError::new(
                format!("{key}: restarted without missing deps"),
                NestedSet::singleton(key.clone()),
                EXIT_ENGINE,
            ),
            EngineFault::Stalled(key) => NodeError::new(
                format!("{key}: evaluation stalled"),
                NestedSet::singleton(key.clone()),
                EXIT_ENGINE,
            ),
        }
    }
}

/// Evaluator over a [`MathSpec`] with a collecting sink, using `workers`.
pub fn evaluator(
    spec: Arc<MathSpec>,
    workers: usize,
) -> (Evaluator<MathSpec>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let options = EvalOptions {
        workers,
        ..EvalOptions::default()
    };
    (Evaluator::new(spec, options, Arc::clone(&sink) as _), sink)
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! anvil-graph: keyed, incremental, concurrent evaluation graph.
//!
//! Keys map to computations producing values; computations declare
//! dependencies on other keys mid-flight and cooperatively restart when a
//! dependency is not available yet. Between builds, only the transitive
//! reverse closure of what actually changed is re-examined, and re-examined
//! nodes whose inputs kept their values are never re-executed.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod env;
mod error;
mod events;
mod evaluator;
mod intern;
mod nested_set;
mod node;
mod semaphore;
mod spec;
mod version;

/// Per-activation dependency reads, event buffering, and scratch state.
pub use env::{ComputeEnv, DepValue};
/// Failure values: exit codes, node errors, request outcomes.
pub use error::{DetailedExitCode, NodeError, RequestError};
/// Diagnostic events and sinks.
pub use events::{CollectingSink, Event, EventKind, EventSink, NullSink, StoredEvents, TracingSink};
/// The evaluator and its tunables.
pub use evaluator::{EvalOptions, Evaluator};
/// Lock-striped content interning.
pub use intern::Interner;
/// Persistent structure-sharing sets for causes and transitive aggregates.
pub use nested_set::NestedSet;
/// CPU-bound concurrency gate.
pub use semaphore::{CpuBoundSemaphore, CpuPermit};
/// Domain contract: keys, values, compute functions, engine faults.
pub use spec::{EngineFault, EvalSpec, Step};
/// Graph version counter.
pub use version::Version;

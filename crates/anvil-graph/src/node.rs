// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-node storage: value, dependency edges, lifecycle phase, in-flight run
//! state.

use std::any::Any;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashSet, FxHasher};

use crate::error::NodeError;
use crate::spec::EvalSpec;
use crate::version::Version;

/// Concurrent node table. Reads are lock-free on the shard fast path; writes
/// to one node serialize on the node's own mutex, held only within a single
/// activation, never across suspensions.
pub(crate) type NodeMap<S> = DashMap<
    <S as EvalSpec>::Key,
    Arc<Mutex<Node<S>>>,
    BuildHasherDefault<FxHasher>,
>;

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Never computed and not scheduled.
    New,
    /// Sitting in the work queue.
    Queued,
    /// A worker is verifying or executing it right now.
    Running,
    /// Waiting on missing dependencies (`run.pending` > 0).
    Suspended,
    /// Value or error present; valid unless `dirt` is set.
    Finished,
}

/// Why a finished node cannot be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dirt {
    /// A transitive dependency changed; recorded deps must be re-checked,
    /// and the node re-executes only if one of them actually changed value.
    Verify,
    /// The node itself was reported changed; it re-executes unconditionally.
    Execute,
}

/// Whether an in-flight run is executing the function or only re-checking
/// recorded dependencies of a dirty node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    Execute,
    Verify,
}

/// State of one evaluation run of a node, dropped on completion, reset on
/// interrupt.
pub(crate) struct RunState<S: EvalSpec> {
    pub mode: RunMode,
    /// Dependencies requested so far, in first-request order. The stamp is
    /// the dep's `changed_at` at the moment its value was observed; entries
    /// that were requested but never observed carry `None` and are not
    /// recorded as dependencies.
    pub deps: Vec<(S::Key, Option<Version>)>,
    pub dep_index: FxHashSet<S::Key>,
    /// Scratch slot handed to the function across restarts.
    pub scratch: Option<Box<dyn Any + Send>>,
    /// Missing deps currently waited on; the cycle walk follows these edges.
    pub waiting_on: Vec<S::Key>,
    /// Count of `waiting_on` entries not yet resolved.
    pub pending: usize,
}

impl<S: EvalSpec> RunState<S> {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            deps: Vec::new(),
            dep_index: FxHashSet::default(),
            scratch: None,
            waiting_on: Vec::new(),
            pending: 0,
        }
    }

    /// Merges one activation's requests into the accumulated run record.
    pub fn record_requests(&mut self, requests: Vec<(S::Key, Option<Version>)>) {
        for (key, stamp) in requests {
            if self.dep_index.insert(key.clone()) {
                self.deps.push((key, stamp));
            } else if stamp.is_some() {
                // A key first seen missing may be observed on a later
                // activation; keep the first-request position, fill the stamp.
                if let Some(slot) = self.deps.iter_mut().find(|(k, _)| *k == key) {
                    if slot.1.is_none() {
                        slot.1 = stamp;
                    }
                }
            }
        }
    }
}

impl<S: EvalSpec> core::fmt::Debug for RunState<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunState")
            .field("mode", &self.mode)
            .field("deps", &self.deps.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// A graph node.
pub(crate) struct Node<S: EvalSpec> {
    pub phase: Phase,
    pub dirt: Option<Dirt>,
    /// Last computed outcome, if any.
    pub value: Option<Result<S::Value, NodeError<S::Cause>>>,
    /// Version at which `value` last changed content.
    pub changed_at: Version,
    /// Dependencies recorded by the last completed run, with the stamps the
    /// run observed.
    pub deps: Vec<(S::Key, Version)>,
    /// Reverse edges, maintained for invalidation.
    pub rdeps: FxHashSet<S::Key>,
    /// Parents suspended on this node in the current evaluation.
    pub waiters: Vec<S::Key>,
    /// In-flight run, present between the first activation and completion.
    pub run: Option<RunState<S>>,
}

impl<S: EvalSpec> Node<S> {
    pub fn new() -> Self {
        Self {
            phase: Phase::New,
            dirt: None,
            value: None,
            changed_at: Version::NONE,
            deps: Vec::new(),
            rdeps: FxHashSet::default(),
            waiters: Vec::new(),
            run: None,
        }
    }

    /// True when the stored outcome may be served without recomputation.
    pub fn is_usable(&self) -> bool {
        self.phase == Phase::Finished && self.dirt.is_none() && self.value.is_some()
    }

    /// Resets any in-flight bookkeeping, keeping stored outcomes.
    ///
    /// Scratch state is dropped here: it is tied to the evaluation that
    /// created it.
    pub fn reset_in_flight(&mut self) {
        self.run = None;
        self.waiters.clear();
        self.phase = if self.value.is_some() {
            Phase::Finished
        } else {
            Phase::New
        };
    }
}

impl<S: EvalSpec> core::fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("phase", &self.phase)
            .field("dirt", &self.dirt)
            .field("has_value", &self.value.is_some())
            .field("changed_at", &self.changed_at)
            .field("deps", &self.deps.len())
            .field("rdeps", &self.rdeps.len())
            .finish_non_exhaustive()
    }
}

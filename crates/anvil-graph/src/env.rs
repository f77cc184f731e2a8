// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The per-activation compute environment.
//!
//! This is the only capability a compute function gets: dependency reads,
//! a buffered event listener, and a scratch slot. Reads never block — a key
//! that is not finished yet is reported as missing, the function returns
//! [`crate::Step::Restart`], and the evaluator re-invokes it when the keys it
//! asked about are resolved.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::NodeError;
use crate::events::StoredEvents;
use crate::node::{Node, NodeMap};
use crate::semaphore::CpuBoundSemaphore;
use crate::spec::EvalSpec;
use crate::version::Version;

/// Outcome of a single dependency read.
pub type DepValue<S> =
    Result<<S as EvalSpec>::Value, NodeError<<S as EvalSpec>::Cause>>;

/// Capability object passed to each activation of a compute function.
///
/// # Observable semantics
/// - Within one activation, two reads of the same key return the same
///   outcome: the first read is cached, including a miss.
/// - Across activations of one node, scratch state is preserved; dependency
///   values may change only between evaluation versions.
pub struct ComputeEnv<'a, S: EvalSpec> {
    nodes: &'a NodeMap<S>,
    /// Keys in first-request order with the stamp observed (None = missing).
    requested: Vec<S::Key>,
    cache: FxHashMap<S::Key, Option<(DepValue<S>, Version)>>,
    missing: Vec<S::Key>,
    events: StoredEvents,
    scratch: Option<Box<dyn Any + Send>>,
    /// Present when the owner holds a CPU permit and opted into releasing it
    /// around dependency fetches.
    unblock: Option<&'a CpuBoundSemaphore>,
}

impl<'a, S: EvalSpec> ComputeEnv<'a, S> {
    pub(crate) fn new(
        nodes: &'a NodeMap<S>,
        scratch: Option<Box<dyn Any + Send>>,
        unblock: Option<&'a CpuBoundSemaphore>,
    ) -> Self {
        Self {
            nodes,
            requested: Vec::new(),
            cache: FxHashMap::default(),
            missing: Vec::new(),
            events: StoredEvents::new(),
            scratch,
            unblock,
        }
    }

    /// Reads one dependency; `None` means the value is not available yet and
    /// the function should eventually return [`crate::Step::Restart`].
    ///
    /// A failed dependency is returned as `Some(Err(..))`: observing an error
    /// is a choice point, the caller may propagate it, substitute a value, or
    /// aggregate it with others.
    pub fn get_value(&mut self, key: &S::Key) -> Option<DepValue<S>> {
        if let Some(prior) = self.cache.get(key) {
            return prior.as_ref().map(|(v, _)| v.clone());
        }
        let fetched = match self.unblock {
            Some(sem) => sem.unblocked(|| Self::fetch(self.nodes, key)),
            None => Self::fetch(self.nodes, key),
        };
        self.requested.push(key.clone());
        if fetched.is_none() {
            self.missing.push(key.clone());
        }
        let out = fetched.as_ref().map(|(v, _)| v.clone());
        self.cache.insert(key.clone(), fetched);
        out
    }

    /// Reads a batch of dependencies in order.
    pub fn get_values(&mut self, keys: &[S::Key]) -> Vec<Option<DepValue<S>>> {
        keys.iter().map(|k| self.get_value(k)).collect()
    }

    /// True iff any read in this activation came back missing.
    #[must_use]
    pub fn values_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Buffered event listener for this activation.
    ///
    /// Events reach the user's sink only if the activation completes; on a
    /// restart they are dropped, and the function is responsible for
    /// replaying whatever it stashed in scratch.
    pub fn listener(&mut self) -> &mut StoredEvents {
        &mut self.events
    }

    /// Returns the scratch object for this node, initializing it on first
    /// use (or after a type change) with `init`.
    ///
    /// Scratch is tied to `(evaluation, key)`: it survives restarts within
    /// one evaluation and is dropped on completion, on interrupt, and when a
    /// dirty node re-executes.
    pub fn state<T: Send + 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        let initialized = self
            .scratch
            .as_ref()
            .is_some_and(|b| b.downcast_ref::<T>().is_some());
        if !initialized {
            self.scratch = Some(Box::new(init()));
        }
        match self.scratch.as_mut().and_then(|b| b.downcast_mut::<T>()) {
            Some(state) => state,
            // The slot was just filled with a `T` above.
            None => unreachable!(),
        }
    }

    fn fetch(nodes: &NodeMap<S>, key: &S::Key) -> Option<(DepValue<S>, Version)> {
        let cell: Arc<Mutex<Node<S>>> = Arc::clone(nodes.get(key)?.value());
        let node = cell.lock();
        if node.is_usable() {
            node.value.clone().map(|v| (v, node.changed_at))
        } else {
            None
        }
    }

    pub(crate) fn into_outcome(mut self) -> ActivationRecord<S> {
        let requested = self
            .requested
            .iter()
            .map(|k| {
                let stamp = self
                    .cache
                    .get(k)
                    .and_then(|entry| entry.as_ref().map(|(_, stamp)| *stamp));
                (k.clone(), stamp)
            })
            .collect();
        ActivationRecord {
            requested,
            missing: std::mem::take(&mut self.missing),
            events: std::mem::take(&mut self.events),
            scratch: self.scratch.take(),
        }
    }
}

impl<S: EvalSpec> core::fmt::Debug for ComputeEnv<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ComputeEnv")
            .field("requested", &self.requested.len())
            .field("missing", &self.missing.len())
            .finish_non_exhaustive()
    }
}

/// What one activation left behind, folded back into the node's run state.
pub(crate) struct ActivationRecord<S: EvalSpec> {
    pub requested: Vec<(S::Key, Option<Version>)>,
    pub missing: Vec<S::Key>,
    pub events: StoredEvents,
    pub scratch: Option<Box<dyn Any + Send>>,
}

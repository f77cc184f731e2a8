// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The evaluation spec: how a domain plugs its keys and functions into the
//! graph.

use std::fmt::Debug;
use std::hash::Hash;

use crate::env::ComputeEnv;
use crate::error::NodeError;

/// Domain contract for an [`crate::Evaluator`].
///
/// One spec instance owns every compute function plus whatever collaborators
/// and intern tables those functions need. Nothing is ambient: the spec is
/// handed to the evaluator at construction, which is what keeps tests
/// hermetic.
pub trait EvalSpec: Send + Sync + 'static {
    /// Node key. Keys are cheap to clone and totally ordered so diagnostics
    /// can render deterministically.
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    /// Node value. `PartialEq` powers early cutoff: a re-execution that
    /// produces an equal value keeps the old change stamp.
    type Value: Clone + PartialEq + Send + Sync + 'static;
    /// Leaf root cause carried in failures.
    type Cause: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Runs (or resumes) the computation for `key`.
    ///
    /// A computation must not block on sibling nodes: it reads dependencies
    /// through `env`, and if any were missing it returns [`Step::Restart`].
    /// The evaluator re-invokes it once every requested key is resolved;
    /// scratch state obtained via [`ComputeEnv::state`] survives across
    /// those restarts.
    fn compute(&self, key: &Self::Key, env: &mut ComputeEnv<'_, Self>) -> Step<Self>
    where
        Self: Sized;

    /// Renders an engine-detected fault as a domain failure.
    fn fault_error(&self, fault: EngineFault<'_, Self::Key>) -> NodeError<Self::Cause>;

    /// Whether `key`'s computation must hold a CPU-bound permit.
    fn is_cpu_heavy(&self, _key: &Self::Key) -> bool {
        false
    }
}

/// Result of one activation of a compute function.
#[derive(Debug)]
pub enum Step<S: EvalSpec + ?Sized> {
    /// The computation finished with a value.
    Done(S::Value),
    /// The computation finished with a failure.
    Failed(NodeError<S::Cause>),
    /// Dependencies were missing; re-invoke once they are available.
    ///
    /// Events posted during this activation are dropped; the function must
    /// replay anything it wants the user to see on the activation that
    /// completes.
    Restart,
}

/// Faults the engine itself detects and reports through the domain.
#[derive(Debug)]
pub enum EngineFault<'a, K> {
    /// A dependency cycle; all participating keys, in discovery order.
    Cycle(&'a [K]),
    /// A function returned [`Step::Restart`] without any missing reads.
    RestartWithoutMissingDeps(&'a K),
    /// The work queue drained with the root unresolved; indicates a
    /// scheduling invariant violation, reported rather than hung.
    Stalled(&'a K),
}

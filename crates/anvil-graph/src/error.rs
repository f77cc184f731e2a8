// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Failure values stored on graph nodes and surfaced to callers.

use thiserror::Error;

use crate::nested_set::NestedSet;

/// Exit disposition carried by every failure, ordered by severity.
///
/// When failures from several children merge, the combined code is the most
/// severe one; on a severity tie the first-seen code wins. The numeric code
/// is what the containing invocation ultimately exits with, the severity
/// rank only drives merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetailedExitCode {
    code: u16,
    severity: u8,
}

impl DetailedExitCode {
    /// Builds an exit code with an explicit severity rank.
    #[must_use]
    pub const fn new(code: u16, severity: u8) -> Self {
        Self { code, severity }
    }

    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.code
    }

    /// Severity rank used by [`DetailedExitCode::merge`].
    #[must_use]
    pub const fn severity(self) -> u8 {
        self.severity
    }

    /// Maximum-severity merge, tie-broken by first-seen.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.severity > self.severity {
            other
        } else {
            self
        }
    }

    /// Merges a sequence of codes, returning `None` for an empty sequence.
    pub fn merge_all(codes: impl IntoIterator<Item = Self>) -> Option<Self> {
        codes.into_iter().reduce(Self::merge)
    }
}

/// A failure stored on a node.
///
/// `causes` is the set of *leaf* root causes: nodes whose own computation
/// failed, not intermediaries that merely observed a failing dependency.
/// `reported` distinguishes failures already printed to the user's listener
/// (callers must not re-print) from ones the caller still owns. Failures
/// constructed with an empty message are classified as already reported.
#[derive(Debug, Clone)]
pub struct NodeError<C> {
    message: String,
    causes: NestedSet<C>,
    exit: DetailedExitCode,
    reported: bool,
}

impl<C: Eq + std::hash::Hash> PartialEq for NodeError<C> {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && self.exit == other.exit
            && self.reported == other.reported
            && self.causes == other.causes
    }
}

impl<C: Eq + std::hash::Hash> Eq for NodeError<C> {}

impl<C: Clone + Eq + std::hash::Hash> NodeError<C> {
    /// Builds a failure from a message, its leaf causes, and an exit code.
    #[must_use]
    pub fn new(message: impl Into<String>, causes: NestedSet<C>, exit: DetailedExitCode) -> Self {
        let message = message.into();
        let reported = message.is_empty();
        Self {
            message,
            causes,
            exit,
            reported,
        }
    }

    /// Aggregates failures from several children into one.
    ///
    /// Cause sets concatenate (order preserved, duplicates collapse); exit
    /// codes take the most severe, first-seen on ties; the result counts as
    /// reported only when every input was.
    #[must_use]
    pub fn aggregate(message: impl Into<String>, errors: Vec<Self>) -> Self {
        let reported = !errors.is_empty() && errors.iter().all(|e| e.reported);
        let exit = DetailedExitCode::merge_all(errors.iter().map(|e| e.exit))
            .unwrap_or(DetailedExitCode::new(0, 0));
        let causes = NestedSet::concat(errors.into_iter().map(|e| e.causes));
        let mut merged = Self::new(message, causes, exit);
        merged.reported = merged.reported || reported;
        merged
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Leaf root causes.
    #[must_use]
    pub fn causes(&self) -> &NestedSet<C> {
        &self.causes
    }

    /// Exit disposition.
    #[must_use]
    pub fn exit_code(&self) -> DetailedExitCode {
        self.exit
    }

    /// Whether this failure has already reached the user's listener.
    #[must_use]
    pub fn is_reported(&self) -> bool {
        self.reported
    }

    /// Marks the failure as already printed.
    #[must_use]
    pub fn into_reported(mut self) -> Self {
        self.reported = true;
        self
    }
}

/// Outcome of a top-level [`crate::Evaluator::request`] that produced no
/// value.
#[derive(Debug, Clone, Error)]
pub enum RequestError<C: Clone + Eq + std::hash::Hash + core::fmt::Debug> {
    /// The requested node (or a dependency it did not recover from) failed.
    #[error("evaluation failed: {}", .0.message())]
    Failed(NodeError<C>),
    /// Cancellation was requested while the evaluation was in flight.
    #[error("evaluation interrupted")]
    Interrupted,
}

impl<C: Clone + Eq + std::hash::Hash + core::fmt::Debug> PartialEq for RequestError<C> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => a == b,
            (Self::Interrupted, Self::Interrupted) => true,
            _ => false,
        }
    }
}

impl<C: Clone + Eq + std::hash::Hash + core::fmt::Debug> Eq for RequestError<C> {}

impl<C: Clone + Eq + std::hash::Hash + core::fmt::Debug> RequestError<C> {
    /// Returns the node failure, if this was not an interrupt.
    #[must_use]
    pub fn into_failure(self) -> Option<NodeError<C>> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Interrupted => None,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The closed failure catalog of the analysis core.

use anvil_graph::DetailedExitCode;

use crate::config::ConfigurationKey;
use crate::label::Label;

/// Exit code for loading failures.
pub const EXIT_LOADING: DetailedExitCode = DetailedExitCode::new(1, 30);
/// Exit code for analysis failures.
pub const EXIT_ANALYSIS: DetailedExitCode = DetailedExitCode::new(2, 20);
/// Exit code for toolchain-resolution failures.
pub const EXIT_TOOLCHAIN: DetailedExitCode = DetailedExitCode::new(2, 25);
/// Exit code for graph cycles.
pub const EXIT_CYCLE: DetailedExitCode = DetailedExitCode::new(8, 40);
/// Exit code for engine-internal faults.
pub const EXIT_INTERNAL: DetailedExitCode = DetailedExitCode::new(37, 50);

/// The closed enumeration of failure kinds a node may carry.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum CauseKind {
    /// Package load failed.
    NoSuchPackage,
    /// Target missing in a loaded package.
    NoSuchTarget,
    /// A `select()` key's configured target is not a valid condition.
    ConfigConditionsFailed,
    /// A child configured target failed.
    DependencyEvaluationFailed {
        /// Whether the child already reported its own error.
        dep_reported_own_error: bool,
    },
    /// The toolchain resolver found no execution platform.
    NoMatchingExecutionPlatform,
    /// The toolchain resolver reported a different error.
    ToolchainResolutionFailed,
    /// Aspect application or merge failed.
    AspectCreationFailed,
    /// The rule implementation produced conflicting actions.
    ActionConflict,
    /// Two providers with the same id were produced.
    DuplicateProvider,
    /// The rule implementation failed analysis (invalid exec group, error
    /// events, explicit analysis-failure propagation).
    AnalysisFailed,
    /// A dependency cycle.
    Cycle,
    /// Cancellation.
    Interrupted,
    /// An engine invariant was violated.
    Internal,
}

impl CauseKind {
    /// Exit disposition of this kind.
    #[must_use]
    pub fn exit_code(&self) -> DetailedExitCode {
        match self {
            Self::NoSuchPackage | Self::NoSuchTarget => EXIT_LOADING,
            Self::ConfigConditionsFailed
            | Self::DependencyEvaluationFailed { .. }
            | Self::AspectCreationFailed
            | Self::ActionConflict
            | Self::DuplicateProvider
            | Self::AnalysisFailed => EXIT_ANALYSIS,
            Self::NoMatchingExecutionPlatform | Self::ToolchainResolutionFailed => EXIT_TOOLCHAIN,
            Self::Cycle | Self::Interrupted => EXIT_CYCLE,
            Self::Internal => EXIT_INTERNAL,
        }
    }
}

/// One leaf root cause: a node whose own computation failed.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Cause {
    /// The failing target.
    pub label: Label,
    /// Its configuration, when it had one.
    pub configuration: Option<ConfigurationKey>,
    /// What failed.
    pub kind: CauseKind,
}

impl Cause {
    /// Builds a cause.
    #[must_use]
    pub fn new(label: Label, configuration: Option<ConfigurationKey>, kind: CauseKind) -> Self {
        Self {
            label,
            configuration,
            kind,
        }
    }
}

impl core::fmt::Display for Cause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.label)
    }
}

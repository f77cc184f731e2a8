// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Configuration transitions: pure functions on options applied along
//! dependency edges.

use std::sync::Arc;

use crate::attr::ConfiguredAttrs;
use crate::options::{BuildOptions, FragmentSet};

/// Result of applying a transition to one edge.
#[derive(Clone, Debug)]
pub enum TransitionOutput {
    /// One child options set.
    Single(BuildOptions),
    /// A split: several child options sets, each tagged with a transition
    /// key that distinguishes the resulting dependencies.
    Split(Vec<(String, BuildOptions)>),
}

/// A pure function over options.
///
/// Implementations must be deterministic in `(options, attrs)`; the resolver
/// interns whatever comes out, so equal outputs collapse to one
/// configuration.
pub trait Transition: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Applies the transition.
    fn apply(&self, options: &BuildOptions, attrs: &ConfiguredAttrs) -> TransitionOutput;

    /// Fragments this transition writes beyond what the child declares;
    /// they survive trimming.
    fn added_fragments(&self) -> FragmentSet {
        FragmentSet::new()
    }
}

impl core::fmt::Debug for dyn Transition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Transition({})", self.name())
    }
}

/// The transition attached to a dependency edge by the rule definition.
#[derive(Clone, Debug, Default)]
pub enum DepTransition {
    /// Keep the parent's options.
    #[default]
    None,
    /// Apply a custom transition function.
    Custom(Arc<dyn Transition>),
}

/// Trimming applied once at the boundary from a target to its toolchain
/// context, so toolchain dependencies do not re-apply trimming per edge.
///
/// The projection keeps the fragments toolchain resolution reads (platform
/// data and whatever the evaluator was configured to preserve) and drops the
/// rest, which is what makes toolchain configurations collapse into a small
/// interned set.
#[derive(Clone, Debug)]
pub struct ToolchainTaggedTrimming {
    kept: FragmentSet,
}

impl ToolchainTaggedTrimming {
    /// Keeps `kept` fragments across the toolchain boundary; the platform
    /// fragment is always retained.
    #[must_use]
    pub fn new(mut kept: FragmentSet) -> Self {
        kept.insert(PLATFORM_FRAGMENT);
        Self { kept }
    }

    /// Applies the trimming to parent options.
    #[must_use]
    pub fn trim(&self, options: &BuildOptions) -> BuildOptions {
        options.project(&self.kept)
    }
}

/// Fragment holding platform data (constraints, execution properties).
pub const PLATFORM_FRAGMENT: &str = "platform";

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Aspects: orthogonal computations attached along dependency edges to
//! contribute extra providers.

use std::sync::Arc;

use thiserror::Error;

use crate::config::ConfigurationKey;
use crate::configured_target::ConfiguredTargetKey;
use crate::label::Label;
use crate::provider::{DuplicateProvider, ProviderId, ProviderSet};

/// Definition of one aspect.
pub struct AspectDefinition {
    /// Aspect name; aspect stacks are keyed by name.
    pub name: String,
    /// Providers the base target must expose for the aspect to apply.
    pub required_providers: Vec<ProviderId>,
    /// The aspect's implementation.
    pub implementation: Arc<dyn AspectImplementation>,
}

impl core::fmt::Debug for AspectDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AspectDefinition")
            .field("name", &self.name)
            .field("required_providers", &self.required_providers)
            .finish_non_exhaustive()
    }
}

/// Inputs handed to an aspect implementation.
#[derive(Debug)]
pub struct AspectContext<'a> {
    /// Label of the target the aspect is applied to.
    pub label: &'a Label,
    /// Configuration of the base target.
    pub configuration: Option<ConfigurationKey>,
    /// The base target's providers.
    pub base_providers: &'a ProviderSet,
}

/// Aspect analysis failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AspectError {
    /// The aspect reported a failure.
    #[error("aspect failed: {0}")]
    Failed(String),
    /// Two aspects (or an aspect and the base) produced the same provider.
    #[error(transparent)]
    DuplicateProvider(#[from] DuplicateProvider),
}

/// The capability through which the core invokes aspect logic.
pub trait AspectImplementation: Send + Sync {
    /// Computes this aspect's providers for one base target.
    fn analyze(&self, ctx: &AspectContext<'_>) -> Result<ProviderSet, AspectError>;
}

/// Graph key for `(target, aspect stack)`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct AspectKey {
    /// The base configured target.
    pub base: ConfiguredTargetKey,
    /// Aspect names, outermost last.
    pub aspects: Vec<String>,
}

/// Value of an aspect node: the providers contributed on top of the base.
#[derive(Clone, PartialEq, Debug)]
pub struct AspectValue {
    /// Contributed providers, aspect order preserved.
    pub providers: ProviderSet,
}

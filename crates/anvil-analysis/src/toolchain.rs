// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The toolchain resolver contract and resolved toolchain contexts.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::ConfigurationKey;
use crate::label::Label;
use crate::options::BuildOptions;

/// Name of the default execution group.
pub const DEFAULT_EXEC_GROUP: &str = "default";

/// Graph key for one toolchain-context request.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ToolchainContextKey {
    /// Execution group this context is for.
    pub exec_group: String,
    /// Target configuration, post toolchain-tagged trimming.
    pub configuration: ConfigurationKey,
    /// Toolchain types to resolve, sorted.
    pub toolchain_types: Vec<Label>,
    /// Constraints the execution platform must satisfy.
    pub exec_constraints: Vec<Label>,
    /// Verbose resolution diagnostics requested.
    pub debug: bool,
    /// Execution platform forced by the caller (set when the target is
    /// itself being evaluated as a toolchain for a parent).
    pub forced_execution_platform: Option<Label>,
}

/// Resolver output before toolchain targets are themselves configured.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnloadedToolchainContext {
    /// Execution group this context belongs to.
    pub exec_group: String,
    /// Chosen execution platform, when resolution succeeded.
    pub execution_platform: Option<Label>,
    /// Resolved toolchain labels by toolchain type.
    pub toolchains: BTreeMap<Label, Label>,
    /// Present when no execution platform satisfied the request; the core
    /// wraps this into a `NoMatchingExecutionPlatform` failure.
    pub error_data: Option<String>,
}

/// A toolchain context bound to a configured target.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ToolchainContext {
    /// Execution group name.
    pub exec_group: String,
    /// Chosen execution platform.
    pub execution_platform: Label,
    /// Resolved toolchain labels by toolchain type.
    pub toolchains: BTreeMap<Label, Label>,
}

impl ToolchainContext {
    /// Resolved toolchain for `toolchain_type`.
    #[must_use]
    pub fn toolchain(&self, toolchain_type: &Label) -> Option<&Label> {
        self.toolchains.get(toolchain_type)
    }
}

/// Toolchain resolution failures other than "no matching platform".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("toolchain resolution failed: {0}")]
pub struct ToolchainError(pub String);

/// Collaborator that matches constraints to execution platforms and
/// toolchains.
pub trait ToolchainResolver: Send + Sync {
    /// Resolves one context request against the trimmed options.
    fn resolve(
        &self,
        key: &ToolchainContextKey,
        options: &BuildOptions,
    ) -> Result<UnloadedToolchainContext, ToolchainError>;
}

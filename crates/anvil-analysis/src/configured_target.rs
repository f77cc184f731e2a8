// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Configured-target keys and values.

use std::collections::BTreeMap;
use std::sync::Arc;

use anvil_graph::NestedSet;

use crate::compat::IncompatibleReason;
use crate::config::ConfigurationKey;
use crate::dependency::{Dependency, DependencyKind};
use crate::label::{Label, PackageId};
use crate::provider::ProviderSet;
use crate::target::Target;

/// Key of one configured target: label, configuration, and (for toolchains
/// being configured for a parent) a forced execution platform.
///
/// A `None` configuration denotes a non-configurable target such as a source
/// file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConfiguredTargetKey {
    /// Target label.
    pub label: Label,
    /// Configuration key; `None` for non-configurable targets.
    pub configuration: Option<ConfigurationKey>,
    /// Execution platform forced by the requesting parent.
    pub execution_platform: Option<Label>,
}

impl ConfiguredTargetKey {
    /// Key without a forced execution platform.
    #[must_use]
    pub fn new(label: Label, configuration: Option<ConfigurationKey>) -> Self {
        Self {
            label,
            configuration,
            execution_platform: None,
        }
    }
}

impl core::fmt::Display for ConfiguredTargetKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.configuration {
            Some(cfg) => write!(f, "{} ({})", self.label, cfg.short()),
            None => write!(f, "{} (null)", self.label),
        }
    }
}

/// A registered action: opaque to the core beyond its outputs, which drive
/// conflict detection.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ActionRecord {
    /// Action mnemonic for diagnostics.
    pub mnemonic: String,
    /// Input paths.
    pub inputs: Vec<String>,
    /// Output paths; globally unique per configured target.
    pub outputs: Vec<String>,
    /// Execution group the action runs under.
    pub exec_group: String,
}

/// A rule target's analysis result.
#[derive(Clone, PartialEq, Debug)]
pub struct RuleConfiguredTarget {
    /// The target's label.
    pub label: Label,
    /// The configuration it was analyzed in.
    pub configuration: ConfigurationKey,
    /// Providers exposed to consumers.
    pub providers: ProviderSet,
    /// Actions registered by the rule implementation.
    pub actions: Vec<ActionRecord>,
    /// Execution platform bound per execution group.
    pub exec_group_bindings: BTreeMap<String, Label>,
    /// Packages transitively read, when the evaluator opted in.
    pub transitive_packages: Option<NestedSet<PackageId>>,
}

/// Value of a configured-target node.
#[derive(Clone, PartialEq, Debug)]
pub enum ConfiguredTargetValue {
    /// A fully analyzed rule target.
    Rule(Arc<RuleConfiguredTarget>),
    /// A source file.
    Source {
        /// The file's label.
        label: Label,
        /// File providers.
        providers: ProviderSet,
        /// Own package, when transitive package tracking is on.
        transitive_packages: Option<NestedSet<PackageId>>,
    },
    /// An alias, forwarding the underlying target's providers.
    Alias {
        /// The alias's own label.
        label: Label,
        /// The final, post-redirect label (aliases may chain).
        underlying: Label,
        /// Key of the directly referenced target.
        actual_key: ConfiguredTargetKey,
        /// Providers forwarded from the underlying target.
        providers: ProviderSet,
        /// Transitive packages including the alias's own.
        transitive_packages: Option<NestedSet<PackageId>>,
    },
    /// The configurability of the target did not match the requested key:
    /// no providers, no actions, cannot fail the build on its own.
    Empty {
        /// The mismatched target's label.
        label: Label,
    },
    /// The target cannot be built for the requested platform.
    Incompatible {
        /// The incompatible target's label.
        label: Label,
        /// Why it is incompatible.
        reason: IncompatibleReason,
        /// Marker providers.
        providers: ProviderSet,
    },
}

impl ConfiguredTargetValue {
    /// The value's label.
    #[must_use]
    pub fn label(&self) -> &Label {
        match self {
            Self::Rule(rule) => &rule.label,
            Self::Source { label, .. }
            | Self::Alias { label, .. }
            | Self::Empty { label }
            | Self::Incompatible { label, .. } => label,
        }
    }

    /// Providers exposed to consumers; empty for `Empty`.
    #[must_use]
    pub fn providers(&self) -> Option<&ProviderSet> {
        match self {
            Self::Rule(rule) => Some(&rule.providers),
            Self::Source { providers, .. }
            | Self::Alias { providers, .. }
            | Self::Incompatible { providers, .. } => Some(providers),
            Self::Empty { .. } => None,
        }
    }

    /// Whether this value marks platform incompatibility.
    #[must_use]
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Self::Incompatible { .. })
    }

    /// The final label after alias redirects.
    #[must_use]
    pub fn underlying_label(&self) -> &Label {
        match self {
            Self::Alias { underlying, .. } => underlying,
            other => other.label(),
        }
    }

    /// Transitive package set, when tracked.
    #[must_use]
    pub fn transitive_packages(&self) -> Option<&NestedSet<PackageId>> {
        match self {
            Self::Rule(rule) => rule.transitive_packages.as_ref(),
            Self::Source {
                transitive_packages,
                ..
            }
            | Self::Alias {
                transitive_packages,
                ..
            } => transitive_packages.as_ref(),
            Self::Empty { .. } | Self::Incompatible { .. } => None,
        }
    }
}

/// One dependency's configured value together with its underlying target.
#[derive(Clone, Debug)]
pub struct ConfiguredTargetAndData {
    /// The edge this value arrived through.
    pub dependency: Dependency,
    /// The child's configured value.
    pub value: Arc<ConfiguredTargetValue>,
    /// The child's underlying (post-alias) target.
    pub target: Arc<Target>,
    /// Providers after aspect merging.
    pub providers: ProviderSet,
}

/// Dependency values grouped by edge, in resolution order.
#[derive(Clone, Default, Debug)]
pub struct DepValueMap {
    entries: Vec<ConfiguredTargetAndData>,
}

impl DepValueMap {
    /// Builds from resolved entries.
    #[must_use]
    pub fn from_entries(entries: Vec<ConfiguredTargetAndData>) -> Self {
        Self { entries }
    }

    /// All entries in resolution order.
    #[must_use]
    pub fn entries(&self) -> &[ConfiguredTargetAndData] {
        &self.entries
    }

    /// Entries for one edge kind.
    pub fn of_kind<'a>(
        &'a self,
        kind: &'a DependencyKind,
    ) -> impl Iterator<Item = &'a ConfiguredTargetAndData> {
        self.entries.iter().filter(move |e| e.dependency.kind == *kind)
    }

    /// Entries for a named attribute edge.
    pub fn attribute<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a ConfiguredTargetAndData> {
        self.entries.iter().filter(move |e| {
            matches!(
                &e.dependency.kind,
                DependencyKind::Attribute(n) | DependencyKind::Implicit(n) if n == name
            )
        })
    }

    /// Number of dependency values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no dependencies were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

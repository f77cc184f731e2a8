// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Dependency edges produced by dependency resolution.

use std::sync::Arc;

use crate::aspect::AspectDefinition;
use crate::config::ConfigurationKey;
use crate::label::Label;

/// What kind of edge a dependency travels along.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum DependencyKind {
    /// A regular attribute edge, named by the attribute.
    Attribute(String),
    /// An implicit (schema-default) attribute edge.
    Implicit(String),
    /// A resolved toolchain edge.
    Toolchain,
    /// A visibility-driven edge.
    Visibility,
    /// An edge owned by a named execution group.
    ExecGroup(String),
}

impl core::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Attribute(name) => write!(f, "attribute {name}"),
            Self::Implicit(name) => write!(f, "implicit attribute {name}"),
            Self::Toolchain => f.write_str("toolchain"),
            Self::Visibility => f.write_str("visibility"),
            Self::ExecGroup(name) => write!(f, "exec group {name}"),
        }
    }
}

/// One resolved outgoing edge.
#[derive(Clone, Debug)]
pub struct Dependency {
    /// Child label.
    pub label: Label,
    /// Child configuration, post-transition and post-trimming; `None` for
    /// non-configurable children.
    pub configuration: Option<ConfigurationKey>,
    /// Edge kind.
    pub kind: DependencyKind,
    /// Tag distinguishing the members of a split transition; `None` for
    /// single-output edges.
    pub transition_key: Option<String>,
    /// Execution platform forced on the child (toolchain edges).
    pub execution_platform: Option<Label>,
    /// Aspects to apply along this edge.
    pub aspects: Vec<Arc<AspectDefinition>>,
}

impl Dependency {
    /// Whether a failure or incompatibility of this dep must propagate.
    ///
    /// Toolchain and visibility edges are required; so are attribute edges.
    /// (Nothing in the schema currently produces optional edges, the hook
    /// exists for parity with dependency kinds that tolerate absence.)
    #[must_use]
    pub fn is_required(&self) -> bool {
        true
    }
}

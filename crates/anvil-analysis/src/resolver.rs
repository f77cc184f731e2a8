// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The configuration resolver: applies per-edge transitions and trims the
//! result to the fragments the child actually reads.

use std::sync::Arc;

use crate::attr::ConfiguredAttrs;
use crate::aspect::AspectDefinition;
use crate::config::ConfigCache;
use crate::dependency::{Dependency, DependencyKind};
use crate::label::Label;
use crate::options::{BuildOptions, FragmentSet};
use crate::transition::{DepTransition, Transition, TransitionOutput};

/// One outgoing edge to resolve.
pub struct EdgeRequest<'a> {
    /// Parent options, pre-transition.
    pub parent_options: &'a BuildOptions,
    /// Parent's resolved attributes (transitions may read them).
    pub attrs: &'a ConfiguredAttrs,
    /// Child label.
    pub label: Label,
    /// Edge kind.
    pub kind: DependencyKind,
    /// Transition attached by the rule definition.
    pub transition: &'a DepTransition,
    /// Fragments the child rule declares; `None` when the child is not
    /// configurable (source files), which propagates the null
    /// configuration unchanged.
    pub child_fragments: Option<&'a FragmentSet>,
    /// Whether to trim at all; aliases keep the full options so the
    /// redirect target decides its own trimming.
    pub trim: bool,
    /// Execution platform forced on the child.
    pub execution_platform: Option<Label>,
    /// Aspects to apply along the edge.
    pub aspects: Vec<Arc<AspectDefinition>>,
}

impl core::fmt::Debug for EdgeRequest<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EdgeRequest")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Applies transitions and trimming, interning every resulting
/// configuration.
#[derive(Debug)]
pub struct ConfigurationResolver {
    configs: Arc<ConfigCache>,
}

impl ConfigurationResolver {
    /// Builds a resolver over the shared configuration cache.
    #[must_use]
    pub fn new(configs: Arc<ConfigCache>) -> Self {
        Self { configs }
    }

    /// The shared configuration cache.
    #[must_use]
    pub fn configs(&self) -> &Arc<ConfigCache> {
        &self.configs
    }

    /// Resolves one edge into its dependencies: one for a plain or function
    /// transition, several (tagged by transition key) for a split.
    #[must_use]
    pub fn resolve_edge(&self, request: EdgeRequest<'_>) -> Vec<Dependency> {
        // Null configurations propagate unchanged, transitions or not.
        let Some(child_fragments) = request.child_fragments else {
            return vec![Dependency {
                label: request.label,
                configuration: None,
                kind: request.kind,
                transition_key: None,
                execution_platform: request.execution_platform,
                aspects: request.aspects,
            }];
        };

        let (outputs, added) = match request.transition {
            DepTransition::None => (
                TransitionOutput::Single(request.parent_options.clone()),
                FragmentSet::new(),
            ),
            DepTransition::Custom(transition) => (
                transition.apply(request.parent_options, request.attrs),
                transition.added_fragments(),
            ),
        };

        // Required fragments: child's declared set restricted to what the
        // parent actually carries, plus whatever the transition writes.
        let mut required = FragmentSet::new();
        for name in child_fragments.iter() {
            if request.parent_options.has_fragment(name) {
                required.insert(name);
            }
        }
        let required = required.union(&added);

        let tagged: Vec<(Option<String>, BuildOptions)> = match outputs {
            TransitionOutput::Single(options) => vec![(None, options)],
            TransitionOutput::Split(parts) => parts
                .into_iter()
                .map(|(tag, options)| (Some(tag), options))
                .collect(),
        };

        tagged
            .into_iter()
            .map(|(transition_key, options)| {
                let trimmed = if request.trim {
                    options.project(&required)
                } else {
                    options
                };
                let configuration = Some(self.configs.intern(trimmed).key());
                Dependency {
                    label: request.label.clone(),
                    configuration,
                    kind: request.kind.clone(),
                    transition_key,
                    execution_platform: request.execution_platform.clone(),
                    aspects: request.aspects.clone(),
                }
            })
            .collect()
    }
}

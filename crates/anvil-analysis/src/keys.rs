// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The analysis domain plugged into the evaluation graph: keys, values, and
//! the dispatching spec.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use anvil_graph::{
    ComputeEnv, EngineFault, EvalSpec, Event, Interner, NestedSet, NodeError, Step,
};

use crate::aspect::{AspectContext, AspectDefinition, AspectError, AspectKey, AspectValue};
use crate::config::{ConfigCache, Configuration, ConfigurationKey};
use crate::configured_target::{ConfiguredTargetKey, ConfiguredTargetValue};
use crate::error::{Cause, CauseKind, EXIT_CYCLE, EXIT_INTERNAL, EXIT_LOADING, EXIT_TOOLCHAIN};
use crate::function;
use crate::label::{Label, LabelData, LabelError, PackageId};
use crate::options::{BuildOptions, FragmentSet};
use crate::package::{Package, PackageLoader};
use crate::resolver::ConfigurationResolver;
use crate::toolchain::{ToolchainContextKey, ToolchainResolver, UnloadedToolchainContext};
use crate::transition::ToolchainTaggedTrimming;

/// A node key in the analysis graph.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum AnalysisKey {
    /// Load one package.
    Package(PackageId),
    /// Recover an interned configuration.
    Configuration(ConfigurationKey),
    /// Analyze one `(label, configuration)` pair.
    ConfiguredTarget(ConfiguredTargetKey),
    /// Resolve toolchains for one execution group.
    ToolchainContext(ToolchainContextKey),
    /// Apply an aspect stack to a configured target.
    Aspect(AspectKey),
}

impl AnalysisKey {
    /// A label representing this key in diagnostics and causes.
    #[must_use]
    pub fn cause_label(&self) -> Label {
        match self {
            Self::Package(id) => Label::new(&id.repo, &id.package, "BUILD"),
            Self::Configuration(key) => Label::new("", "_configuration", &key.short()),
            Self::ConfiguredTarget(key) => key.label.clone(),
            Self::ToolchainContext(key) => key
                .toolchain_types
                .first()
                .cloned()
                .unwrap_or_else(|| Label::new("", "_toolchains", &key.exec_group)),
            Self::Aspect(key) => key.base.label.clone(),
        }
    }

    /// The configuration attached to this key, when any.
    #[must_use]
    pub fn cause_configuration(&self) -> Option<ConfigurationKey> {
        match self {
            Self::Package(_) => None,
            Self::Configuration(key) => Some(*key),
            Self::ConfiguredTarget(key) => key.configuration,
            Self::ToolchainContext(key) => Some(key.configuration),
            Self::Aspect(key) => key.base.configuration,
        }
    }
}

/// A node value in the analysis graph.
#[derive(Clone, PartialEq, Debug)]
pub enum AnalysisValue {
    /// A loaded package.
    Package(Arc<Package>),
    /// An interned configuration.
    Configuration(Arc<Configuration>),
    /// An analyzed configured target.
    ConfiguredTarget(Arc<ConfiguredTargetValue>),
    /// A resolved toolchain context.
    ToolchainContext(Arc<UnloadedToolchainContext>),
    /// Aspect providers for one `(target, aspect stack)`.
    Aspect(Arc<AspectValue>),
}

impl AnalysisValue {
    /// Package accessor.
    #[must_use]
    pub fn as_package(&self) -> Option<&Arc<Package>> {
        match self {
            Self::Package(p) => Some(p),
            _ => None,
        }
    }

    /// Configuration accessor.
    #[must_use]
    pub fn as_configuration(&self) -> Option<&Arc<Configuration>> {
        match self {
            Self::Configuration(c) => Some(c),
            _ => None,
        }
    }

    /// Configured-target accessor.
    #[must_use]
    pub fn as_configured_target(&self) -> Option<&Arc<ConfiguredTargetValue>> {
        match self {
            Self::ConfiguredTarget(v) => Some(v),
            _ => None,
        }
    }

    /// Toolchain-context accessor.
    #[must_use]
    pub fn as_toolchain_context(&self) -> Option<&Arc<UnloadedToolchainContext>> {
        match self {
            Self::ToolchainContext(t) => Some(t),
            _ => None,
        }
    }

    /// Aspect accessor.
    #[must_use]
    pub fn as_aspect(&self) -> Option<&Arc<AspectValue>> {
        match self {
            Self::Aspect(a) => Some(a),
            _ => None,
        }
    }
}

/// Options the analysis core itself recognizes.
#[derive(Clone, Default)]
pub struct AnalysisOptions {
    /// Carry the set of packages each configured target transitively read.
    pub store_transitive_packages: bool,
    /// Extra fragments preserved across the toolchain trimming boundary;
    /// the platform fragment is always preserved.
    pub toolchain_fragments: FragmentSet,
    /// Verbose toolchain-resolution diagnostics for matching labels.
    pub debug_toolchain_resolution: Option<Arc<dyn Fn(&Label) -> bool + Send + Sync>>,
}

impl core::fmt::Debug for AnalysisOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AnalysisOptions")
            .field("store_transitive_packages", &self.store_transitive_packages)
            .field(
                "debug_toolchain_resolution",
                &self.debug_toolchain_resolution.is_some(),
            )
            .finish_non_exhaustive()
    }
}

/// The analysis spec: collaborators, intern tables, and per-kind compute
/// functions, handed to the evaluator at construction.
pub struct AnalysisSpec {
    loader: Arc<dyn PackageLoader>,
    toolchain_resolver: Arc<dyn ToolchainResolver>,
    configs: Arc<ConfigCache>,
    resolver: ConfigurationResolver,
    labels: Interner<LabelData>,
    aspects: FxHashMap<String, Arc<AspectDefinition>>,
    trimming: ToolchainTaggedTrimming,
    options: AnalysisOptions,
}

impl AnalysisSpec {
    /// Builds a spec over the given collaborators.
    #[must_use]
    pub fn new(
        loader: Arc<dyn PackageLoader>,
        toolchain_resolver: Arc<dyn ToolchainResolver>,
        aspects: Vec<Arc<AspectDefinition>>,
        options: AnalysisOptions,
    ) -> Self {
        let configs = Arc::new(ConfigCache::new());
        let resolver = ConfigurationResolver::new(Arc::clone(&configs));
        let trimming = ToolchainTaggedTrimming::new(options.toolchain_fragments.clone());
        let aspects = aspects
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect::<FxHashMap<_, _>>();
        Self {
            loader,
            toolchain_resolver,
            configs,
            resolver,
            labels: Interner::new(),
            aspects,
            trimming,
            options,
        }
    }

    /// The shared configuration cache.
    #[must_use]
    pub fn configs(&self) -> &Arc<ConfigCache> {
        &self.configs
    }

    /// Interns top-level options into a configuration.
    #[must_use]
    pub fn intern_options(&self, options: BuildOptions) -> Arc<Configuration> {
        self.configs.intern(options)
    }

    /// Parses and interns a label.
    pub fn label(&self, text: &str) -> Result<Label, LabelError> {
        let parsed = Label::parse(text)?;
        Ok(self.intern_label(&parsed))
    }

    /// Canonicalizes a label through the intern table.
    #[must_use]
    pub fn intern_label(&self, label: &Label) -> Label {
        let data = label.data();
        let interned = self.labels.intern(LabelData {
            repo: Arc::clone(&data.repo),
            package: Arc::clone(&data.package),
            name: Arc::clone(&data.name),
        });
        Label::from_data(interned)
    }

    pub(crate) fn resolver(&self) -> &ConfigurationResolver {
        &self.resolver
    }

    pub(crate) fn trimming(&self) -> &ToolchainTaggedTrimming {
        &self.trimming
    }

    pub(crate) fn analysis_options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub(crate) fn debug_toolchains_for(&self, label: &Label) -> bool {
        self.options
            .debug_toolchain_resolution
            .as_ref()
            .is_some_and(|pred| pred(label))
    }

    fn compute_package(&self, id: &PackageId) -> Step<Self> {
        match self.loader.load(id) {
            Ok(package) => Step::Done(AnalysisValue::Package(package)),
            Err(error) => Step::Failed(NodeError::new(
                error.to_string(),
                NestedSet::singleton(Cause::new(
                    Label::new(&id.repo, &id.package, "BUILD"),
                    None,
                    CauseKind::NoSuchPackage,
                )),
                EXIT_LOADING,
            )),
        }
    }

    fn compute_configuration(&self, key: &ConfigurationKey) -> Step<Self> {
        match self.configs.get(key) {
            Some(config) => Step::Done(AnalysisValue::Configuration(config)),
            // Keys are interned before they are requested; a miss is
            // engine-state corruption, not a user error.
            None => Step::Failed(NodeError::new(
                format!("internal: configuration {} was never interned", key.short()),
                NestedSet::singleton(Cause::new(
                    Label::new("", "_configuration", &key.short()),
                    Some(*key),
                    CauseKind::Internal,
                )),
                EXIT_INTERNAL,
            )),
        }
    }

    fn compute_toolchain_context(
        &self,
        key: &ToolchainContextKey,
        env: &mut ComputeEnv<'_, Self>,
    ) -> Step<Self> {
        let config = match env.get_value(&AnalysisKey::Configuration(key.configuration)) {
            None => return Step::Restart,
            Some(Err(error)) => return Step::Failed(error),
            Some(Ok(value)) => match value.as_configuration() {
                Some(config) => Arc::clone(config),
                None => return wrong_value_kind("configuration"),
            },
        };
        if key.debug {
            env.listener().post(Event::info(format!(
                "toolchain resolution: group={} types=[{}] forced_platform={:?}",
                key.exec_group,
                key.toolchain_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                key.forced_execution_platform.as_ref().map(ToString::to_string),
            )));
        }
        match self.toolchain_resolver.resolve(key, config.options()) {
            Ok(resolved) => Step::Done(AnalysisValue::ToolchainContext(Arc::new(resolved))),
            Err(error) => Step::Failed(NodeError::new(
                error.to_string(),
                NestedSet::singleton(Cause::new(
                    AnalysisKey::ToolchainContext(key.clone()).cause_label(),
                    Some(key.configuration),
                    CauseKind::ToolchainResolutionFailed,
                )),
                EXIT_TOOLCHAIN,
            )),
        }
    }

    fn compute_aspect(&self, key: &AspectKey, env: &mut ComputeEnv<'_, Self>) -> Step<Self> {
        let base = match env.get_value(&AnalysisKey::ConfiguredTarget(key.base.clone())) {
            None => return Step::Restart,
            Some(Err(error)) => {
                return Step::Failed(NodeError::aggregate(
                    format!("aspects on {} could not apply: base target failed", key.base),
                    vec![error],
                ));
            }
            Some(Ok(value)) => match value.as_configured_target() {
                Some(ct) => Arc::clone(ct),
                None => return wrong_value_kind("configured target"),
            },
        };

        let base_providers = base.providers().cloned().unwrap_or_default();
        let mut contributed = crate::provider::ProviderSet::new();
        for name in &key.aspects {
            let Some(definition) = self.aspects.get(name) else {
                return Step::Failed(aspect_failure(
                    key,
                    format!("unknown aspect {name}"),
                ));
            };
            // Later aspects in the stack see what earlier ones contributed.
            let mut visible = base_providers.clone();
            if visible.merge_from(&contributed).is_err() {
                return Step::Failed(aspect_failure(
                    key,
                    format!("aspect {name}: provider collision with base target"),
                ));
            }
            if !visible.contains_all(&definition.required_providers) {
                continue;
            }
            let ctx = AspectContext {
                label: &key.base.label,
                configuration: key.base.configuration,
                base_providers: &visible,
            };
            match definition.implementation.analyze(&ctx) {
                Ok(providers) => {
                    if let Err(dup) = contributed.merge_from(&providers) {
                        return Step::Failed(aspect_failure(
                            key,
                            format!("aspect {name}: {dup}"),
                        ));
                    }
                }
                Err(AspectError::Failed(message)) => {
                    return Step::Failed(aspect_failure(
                        key,
                        format!("aspect {name}: {message}"),
                    ));
                }
                Err(AspectError::DuplicateProvider(dup)) => {
                    return Step::Failed(aspect_failure(
                        key,
                        format!("aspect {name}: {dup}"),
                    ));
                }
            }
        }
        Step::Done(AnalysisValue::Aspect(Arc::new(AspectValue {
            providers: contributed,
        })))
    }

}

fn aspect_failure(key: &AspectKey, message: String) -> NodeError<Cause> {
    NodeError::new(
        message,
        NestedSet::singleton(Cause::new(
            key.base.label.clone(),
            key.base.configuration,
            CauseKind::AspectCreationFailed,
        )),
        CauseKind::AspectCreationFailed.exit_code(),
    )
}

fn wrong_value_kind(expected: &str) -> Step<AnalysisSpec> {
    Step::Failed(NodeError::new(
        format!("internal: dependency returned a non-{expected} value"),
        NestedSet::singleton(Cause::new(
            Label::new("", "_internal", "value"),
            None,
            CauseKind::Internal,
        )),
        EXIT_INTERNAL,
    ))
}

impl core::fmt::Debug for AnalysisSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AnalysisSpec")
            .field("configs", &self.configs.len())
            .field("aspects", &self.aspects.len())
            .finish_non_exhaustive()
    }
}

impl EvalSpec for AnalysisSpec {
    type Key = AnalysisKey;
    type Value = AnalysisValue;
    type Cause = Cause;

    fn compute(&self, key: &AnalysisKey, env: &mut ComputeEnv<'_, Self>) -> Step<Self> {
        match key {
            AnalysisKey::Package(id) => self.compute_package(id),
            AnalysisKey::Configuration(config_key) => self.compute_configuration(config_key),
            AnalysisKey::ConfiguredTarget(ct_key) => {
                function::compute_configured_target(self, ct_key, env)
            }
            AnalysisKey::ToolchainContext(tc_key) => self.compute_toolchain_context(tc_key, env),
            AnalysisKey::Aspect(aspect_key) => self.compute_aspect(aspect_key, env),
        }
    }

    fn fault_error(&self, fault: EngineFault<'_, AnalysisKey>) -> NodeError<Cause> {
        match fault {
            EngineFault::Cycle(participants) => {
                let names = participants
                    .iter()
                    .map(|k| k.cause_label().to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                NodeError::new(
                    format!("dependency cycle: {names}"),
                    NestedSet::from_vec(
                        participants
                            .iter()
                            .map(|k| {
                                Cause::new(
                                    k.cause_label(),
                                    k.cause_configuration(),
                                    CauseKind::Cycle,
                                )
                            })
                            .collect(),
                    ),
                    EXIT_CYCLE,
                )
            }
            EngineFault::RestartWithoutMissingDeps(key) => NodeError::new(
                format!("internal: {} restarted without missing deps", key.cause_label()),
                NestedSet::singleton(Cause::new(
                    key.cause_label(),
                    key.cause_configuration(),
                    CauseKind::Internal,
                )),
                EXIT_INTERNAL,
            ),
            EngineFault::Stalled(key) => NodeError::new(
                format!("internal: evaluation stalled at {}", key.cause_label()),
                NestedSet::singleton(Cause::new(
                    key.cause_label(),
                    key.cause_configuration(),
                    CauseKind::Internal,
                )),
                EXIT_INTERNAL,
            ),
        }
    }

    fn is_cpu_heavy(&self, key: &AnalysisKey) -> bool {
        matches!(
            key,
            AnalysisKey::ConfiguredTarget(_) | AnalysisKey::Aspect(_)
        )
    }
}

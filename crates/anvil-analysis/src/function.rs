// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The configured-target function: the per-key computation for
//! `(label, configuration)`.
//!
//! A linear pipeline of stages, each of which may suspend on missing graph
//! values. Stage completions are memoized in scratch state, so a restart
//! re-enters at the first unfinished stage instead of redoing work. Events
//! that belong to memoized stages are buffered in scratch and replayed on
//! the activation that completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use anvil_graph::{ComputeEnv, Event, NestedSet, NodeError, Step, StoredEvents};

use crate::attr::{ConfiguredAttrs, SelectError};
use crate::compat::{incompatible_providers, unsatisfied_constraint, IncompatibleReason};
use crate::condition::{read_config_matching, ConfigConditions};
use crate::config::{Configuration, ConfigurationKey};
use crate::configured_target::{
    ConfiguredTargetAndData, ConfiguredTargetKey, ConfiguredTargetValue, DepValueMap,
    RuleConfiguredTarget,
};
use crate::dependency::{Dependency, DependencyKind};
use crate::error::{Cause, CauseKind};
use crate::keys::{AnalysisKey, AnalysisSpec, AnalysisValue};
use crate::label::{Label, PackageId};
use crate::options::FragmentSet;
use crate::package::Package;
use crate::provider::{ProviderField, ProviderId, ProviderSet, ProviderStruct};
use crate::resolver::EdgeRequest;
use crate::rule::{AnalysisEnvironment, RuleContext, RuleError};
use crate::target::{RuleTarget, Target, TargetKind};
use crate::toolchain::{ToolchainContext, ToolchainContextKey, DEFAULT_EXEC_GROUP};

/// Name of the provider carried by source-file targets.
pub const FILE_PROVIDER: &str = "FileInfo";

/// Provider id for source files.
#[must_use]
pub fn file_provider_id() -> ProviderId {
    ProviderId::new(FILE_PROVIDER)
}

fn file_providers(label: &Label) -> ProviderSet {
    let mut providers = ProviderSet::new();
    // A fresh set cannot collide.
    let _ = providers.insert(
        file_provider_id(),
        Arc::new(
            ProviderStruct::new().with(
                "path",
                ProviderField::Str(format!("{}/{}", label.package(), label.name())),
            ),
        ),
    );
    providers
}

#[derive(Clone)]
struct Stage1 {
    package: Arc<Package>,
    target: Arc<Target>,
    configuration: Option<Arc<Configuration>>,
}

/// Scratch state of one configured-target evaluation, kept across restarts.
#[derive(Default)]
struct CtScratch {
    stage1: Option<Stage1>,
    /// Root causes recorded by earlier stages that chose to continue.
    load_causes: Vec<NodeError<Cause>>,
    trimmed_config: Option<ConfigurationKey>,
    toolchains: Option<BTreeMap<String, ToolchainContext>>,
    conditions: Option<ConfigConditions>,
    attrs: Option<ConfiguredAttrs>,
    dependencies: Option<Vec<Dependency>>,
    /// Events buffered alongside memoized stages (toolchain-resolution
    /// diagnostics). The evaluator drops events from restarted activations,
    /// so anything posted by a stage that will be skipped on resume lives
    /// here until the completing activation replays it.
    stage_events: StoredEvents,
    resolved: Option<Vec<ConfiguredTargetAndData>>,
    merged: Option<DepValueMap>,
}

type Ct = Step<AnalysisSpec>;

fn fail(
    env: &mut ComputeEnv<'_, AnalysisSpec>,
    message: String,
    cause: Cause,
) -> Ct {
    env.listener().post(Event::error(message.clone()));
    let exit = cause.kind.exit_code();
    Step::Failed(NodeError::new(message, NestedSet::singleton(cause), exit).into_reported())
}

fn fail_all(
    env: &mut ComputeEnv<'_, AnalysisSpec>,
    message: String,
    causes: Vec<Cause>,
) -> Ct {
    env.listener().post(Event::error(message.clone()));
    let exit = causes
        .iter()
        .map(|c| c.kind.exit_code())
        .reduce(anvil_graph::DetailedExitCode::merge)
        .unwrap_or(crate::error::EXIT_ANALYSIS);
    Step::Failed(NodeError::new(message, NestedSet::from_vec(causes), exit).into_reported())
}

/// Computes one configured target. See the module docs for the stage list.
pub(crate) fn compute_configured_target(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Ct {
    // ── Stage 1: load package and configuration ─────────────────────────
    let stage1 = match env.state(CtScratch::default).stage1.clone() {
        Some(memo) => memo,
        None => match load_target_and_config(spec, key, env) {
            Ok(Some(stage1)) => {
                let scratch = env.state(CtScratch::default);
                scratch.stage1 = Some(stage1.clone());
                if stage1.package.contains_errors {
                    scratch.load_causes.push(NodeError::new(
                        String::new(),
                        NestedSet::singleton(Cause::new(
                            key.label.clone(),
                            key.configuration,
                            CauseKind::NoSuchPackage,
                        )),
                        CauseKind::NoSuchPackage.exit_code(),
                    ));
                }
                stage1
            }
            Ok(None) => return Step::Restart,
            Err(step) => return step,
        },
    };
    let target = Arc::clone(&stage1.target);

    // ── Stage 2: configurability check ──────────────────────────────────
    if target.is_configurable() != key.configuration.is_some() {
        return Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
            ConfiguredTargetValue::Empty {
                label: key.label.clone(),
            },
        )));
    }
    match &target.kind {
        TargetKind::Source => {
            let transitive = spec
                .analysis_options()
                .store_transitive_packages
                .then(|| NestedSet::singleton(stage1.package.id.clone()));
            return Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
                ConfiguredTargetValue::Source {
                    label: key.label.clone(),
                    providers: file_providers(&key.label),
                    transitive_packages: transitive,
                },
            )));
        }
        TargetKind::Alias { actual } => {
            return resolve_alias(spec, key, &stage1, actual.clone(), env);
        }
        TargetKind::Rule(_) => {}
    }
    // Rule targets passed the configurability check, so both exist.
    let (Some(configuration), Some(rule)) = (stage1.configuration.clone(), target.as_rule())
    else {
        return fail(
            env,
            format!("internal: rule target {} without configuration", key.label),
            Cause::new(key.label.clone(), key.configuration, CauseKind::Internal),
        );
    };
    let rule = rule.clone();

    // ── Stage 3: toolchain contexts ─────────────────────────────────────
    let toolchains = match env.state(CtScratch::default).toolchains.clone() {
        Some(memo) => memo,
        None => {
            if rule.rule_class.uses_toolchain_resolution {
                match resolve_toolchains(spec, key, &rule, &configuration, env) {
                    Ok(Some((trimmed, contexts, diagnostics))) => {
                        let scratch = env.state(CtScratch::default);
                        scratch.trimmed_config = Some(trimmed);
                        scratch.toolchains = Some(contexts.clone());
                        scratch.stage_events.extend_from(&diagnostics);
                        contexts
                    }
                    Ok(None) => return Step::Restart,
                    Err(step) => return step,
                }
            } else {
                let contexts = BTreeMap::new();
                env.state(CtScratch::default).toolchains = Some(contexts.clone());
                contexts
            }
        }
    };

    // ── Stage 4: config conditions ──────────────────────────────────────
    let conditions = match env.state(CtScratch::default).conditions.clone() {
        Some(memo) => memo,
        None => match resolve_config_conditions(spec, key, &rule, env) {
            Ok(Some(conditions)) => {
                let scratch = env.state(CtScratch::default);
                if !scratch.load_causes.is_empty() && !conditions.is_empty() {
                    // The attribute map cannot be trusted on top of a
                    // broken package.
                    let causes = collect_causes(&scratch.load_causes);
                    return fail_all(
                        env,
                        format!(
                            "cannot evaluate config conditions for {}: package has errors",
                            key.label
                        ),
                        causes,
                    );
                }
                scratch.conditions = Some(conditions.clone());
                conditions
            }
            Ok(None) => return Step::Restart,
            Err(step) => return step,
        },
    };

    // Attribute resolution rides on the conditions memo.
    let attrs = match env.state(CtScratch::default).attrs.clone() {
        Some(memo) => memo,
        None => match resolve_attrs(&rule, &conditions) {
            Ok(attrs) => {
                env.state(CtScratch::default).attrs = Some(attrs.clone());
                attrs
            }
            Err(step) => return step_from_select(env, key, step),
        },
    };

    // ── Stage 5: direct incompatibility ─────────────────────────────────
    if let Some(constraint) = unsatisfied_constraint(&attrs, configuration.options()) {
        let reason = IncompatibleReason::UnsatisfiedConstraint(constraint);
        let providers = incompatible_providers(&reason);
        return Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
            ConfiguredTargetValue::Incompatible {
                label: key.label.clone(),
                reason,
                providers,
            },
        )));
    }

    // ── Stage 6: dependency resolution ──────────────────────────────────
    let dependencies = match env.state(CtScratch::default).dependencies.clone() {
        Some(memo) => memo,
        None => match resolve_dependencies(
            spec,
            key,
            &stage1,
            &rule,
            &attrs,
            &configuration,
            &toolchains,
            env,
        ) {
            Ok(Some(dependencies)) => {
                env.state(CtScratch::default).dependencies = Some(dependencies.clone());
                dependencies
            }
            Ok(None) => return Step::Restart,
            Err(step) => return step,
        },
    };

    // ── Stage 7: child configured targets (two-pass for aliases) ────────
    let resolved = match env.state(CtScratch::default).resolved.clone() {
        Some(memo) => memo,
        None => match resolve_configured_target_dependencies(spec, key, &dependencies, env) {
            Ok(Some(resolved)) => {
                env.state(CtScratch::default).resolved = Some(resolved.clone());
                resolved
            }
            Ok(None) => return Step::Restart,
            Err(step) => return step,
        },
    };

    // ── Stage 8: aspects ────────────────────────────────────────────────
    let merged = match env.state(CtScratch::default).merged.clone() {
        Some(memo) => memo,
        None => match resolve_aspect_dependencies(key, resolved, env) {
            Ok(Some(merged)) => {
                env.state(CtScratch::default).merged = Some(merged.clone());
                merged
            }
            Ok(None) => return Step::Restart,
            Err(step) => return step,
        },
    };

    // ── Stage 9: indirect incompatibility ───────────────────────────────
    if let Some(incompatible) = merged
        .entries()
        .iter()
        .find(|e| e.dependency.is_required() && e.value.is_incompatible())
    {
        let reason =
            IncompatibleReason::IncompatibleDependency(incompatible.dependency.label.clone());
        let providers = incompatible_providers(&reason);
        return Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
            ConfiguredTargetValue::Incompatible {
                label: key.label.clone(),
                reason,
                providers,
            },
        )));
    }

    // Loading errors recorded along the way surface before rule invocation.
    {
        let scratch = env.state(CtScratch::default);
        if !scratch.load_causes.is_empty() {
            let errors = scratch.load_causes.clone();
            return Step::Failed(NodeError::aggregate(
                format!("package of {} contained errors", key.label),
                errors,
            ));
        }
    }

    // ── Stage 10: rule implementation ───────────────────────────────────
    invoke_rule(spec, key, &stage1, &rule, &configuration, &attrs, &conditions, &toolchains, &merged, env)
}

fn load_target_and_config(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<Stage1>, Ct> {
    let package_value = env.get_value(&AnalysisKey::Package(key.label.package_id()));
    let config_value = key
        .configuration
        .map(|ck| env.get_value(&AnalysisKey::Configuration(ck)));

    let package = match package_value {
        None => return Ok(None),
        Some(Err(_)) => {
            // The loader's failure is wrapped into this target's loading
            // cause; the package node's own message stays with it.
            return Err(fail(
                env,
                format!("error loading package for {}", key.label),
                Cause::new(key.label.clone(), key.configuration, CauseKind::NoSuchPackage),
            ));
        }
        Some(Ok(value)) => match value.as_package() {
            Some(package) => Arc::clone(package),
            None => return Err(internal(env, key, "package")),
        },
    };
    let configuration = match config_value {
        None => None,
        Some(None) => return Ok(None),
        Some(Some(Err(error))) => return Err(Step::Failed(error)),
        Some(Some(Ok(value))) => match value.as_configuration() {
            Some(config) => Some(Arc::clone(config)),
            None => return Err(internal(env, key, "configuration")),
        },
    };
    let Some(target) = package.target(key.label.name()) else {
        return Err(fail(
            env,
            format!(
                "no such target {}: not declared in package {}",
                key.label,
                key.label.package_id()
            ),
            Cause::new(key.label.clone(), key.configuration, CauseKind::NoSuchTarget),
        ));
    };
    Ok(Some(Stage1 {
        package: Arc::clone(&package),
        target: Arc::new(target.clone()),
        configuration,
    }))
}

fn resolve_alias(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    stage1: &Stage1,
    actual: Label,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Ct {
    let actual = spec.intern_label(&actual);
    let actual_key = ConfiguredTargetKey {
        label: actual.clone(),
        configuration: key.configuration,
        execution_platform: key.execution_platform.clone(),
    };
    match env.get_value(&AnalysisKey::ConfiguredTarget(actual_key.clone())) {
        None => Step::Restart,
        Some(Err(error)) => Step::Failed(NodeError::aggregate(
            format!("alias {} could not resolve {}", key.label, actual),
            vec![error],
        )),
        Some(Ok(value)) => {
            let Some(ct) = value.as_configured_target() else {
                return internal(env, key, "configured target");
            };
            let providers = ct.providers().cloned().unwrap_or_default();
            let transitive = spec.analysis_options().store_transitive_packages.then(|| {
                NestedSet::concat(
                    std::iter::once(NestedSet::singleton(stage1.package.id.clone()))
                        .chain(ct.transitive_packages().cloned()),
                )
            });
            Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
                ConfiguredTargetValue::Alias {
                    label: key.label.clone(),
                    underlying: ct.underlying_label().clone(),
                    actual_key,
                    providers,
                    transitive_packages: transitive,
                },
            )))
        }
    }
}

fn resolve_toolchains(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    rule: &RuleTarget,
    configuration: &Arc<Configuration>,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<(ConfigurationKey, BTreeMap<String, ToolchainContext>, StoredEvents)>, Ct> {
    // Trimming happens once at this boundary; toolchain deps reuse the
    // trimmed configuration as-is.
    let trimmed = spec
        .configs()
        .intern(spec.trimming().trim(configuration.options()));
    let debug = spec.debug_toolchains_for(&key.label);
    // Diagnostics go into the caller's scratch, not the activation
    // listener: this stage is memoized, so the activation that posts here
    // is usually not the one that completes.
    let mut diagnostics = StoredEvents::new();

    let mut requests: Vec<(String, AnalysisKey)> = Vec::new();
    let default_key = ToolchainContextKey {
        exec_group: DEFAULT_EXEC_GROUP.to_owned(),
        configuration: trimmed.key(),
        toolchain_types: sorted(rule.rule_class.toolchain_types.clone()),
        exec_constraints: rule.rule_class.exec_compatible_with.clone(),
        debug,
        forced_execution_platform: key.execution_platform.clone(),
    };
    requests.push((
        DEFAULT_EXEC_GROUP.to_owned(),
        AnalysisKey::ToolchainContext(default_key),
    ));
    for (group_name, group) in &rule.rule_class.exec_groups {
        requests.push((
            group_name.clone(),
            AnalysisKey::ToolchainContext(ToolchainContextKey {
                exec_group: group_name.clone(),
                configuration: trimmed.key(),
                toolchain_types: sorted(group.toolchain_types.clone()),
                exec_constraints: group.exec_compatible_with.clone(),
                debug,
                forced_execution_platform: key.execution_platform.clone(),
            }),
        ));
    }

    let keys: Vec<AnalysisKey> = requests.iter().map(|(_, k)| k.clone()).collect();
    let values = env.get_values(&keys);
    if env.values_missing() {
        return Ok(None);
    }

    let mut contexts = BTreeMap::new();
    for ((group_name, _), value) in requests.into_iter().zip(values) {
        let unloaded = match value {
            Some(Ok(v)) => match v.as_toolchain_context() {
                Some(t) => Arc::clone(t),
                None => return Err(internal(env, key, "toolchain context")),
            },
            Some(Err(error)) => {
                return Err(Step::Failed(NodeError::aggregate(
                    format!("toolchain resolution failed for {}", key.label),
                    vec![error],
                )));
            }
            None => return Ok(None),
        };
        if let Some(detail) = &unloaded.error_data {
            // This activation fails, so its events are delivered; hand the
            // buffered resolution trace to the user alongside the error.
            diagnostics.replay_into(env.listener());
            return Err(fail(
                env,
                format!(
                    "no matching execution platform for {} (group {group_name}): {detail}",
                    key.label
                ),
                Cause::new(
                    key.label.clone(),
                    key.configuration,
                    CauseKind::NoMatchingExecutionPlatform,
                ),
            ));
        }
        let Some(platform) = unloaded.execution_platform.clone() else {
            return Err(internal(env, key, "execution platform"));
        };
        if debug {
            tracing::debug!(
                target: "anvil::toolchains",
                label = %key.label,
                group = %group_name,
                platform = %platform,
                "toolchain context resolved"
            );
            diagnostics.post(Event::info(format!(
                "toolchains for {} group {group_name}: platform {platform}",
                key.label
            )));
        }
        contexts.insert(
            group_name,
            ToolchainContext {
                exec_group: unloaded.exec_group.clone(),
                execution_platform: platform,
                toolchains: unloaded.toolchains.clone(),
            },
        );
    }
    Ok(Some((trimmed.key(), contexts, diagnostics)))
}

fn resolve_config_conditions(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    rule: &RuleTarget,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<ConfigConditions>, Ct> {
    let select_keys = rule.raw_select_keys();
    if select_keys.is_empty() {
        return Ok(Some(ConfigConditions::empty()));
    }

    // Conditions are evaluated under this target's own configuration.
    let keys: Vec<AnalysisKey> = select_keys
        .iter()
        .map(|label| {
            AnalysisKey::ConfiguredTarget(ConfiguredTargetKey::new(
                spec.intern_label(label),
                key.configuration,
            ))
        })
        .collect();
    let values = env.get_values(&keys);
    if env.values_missing() {
        return Ok(None);
    }

    let mut matches = BTreeMap::new();
    let mut causes: Vec<Cause> = Vec::new();
    let mut errors: Vec<NodeError<Cause>> = Vec::new();
    for (label, value) in select_keys.iter().zip(values) {
        match value {
            None => return Ok(None),
            Some(Err(error)) => {
                causes.push(Cause::new(
                    label.clone(),
                    key.configuration,
                    CauseKind::ConfigConditionsFailed,
                ));
                errors.push(error);
            }
            Some(Ok(v)) => {
                let verdict = v
                    .as_configured_target()
                    .and_then(|ct| ct.providers())
                    .and_then(read_config_matching);
                match verdict {
                    Some(result) => {
                        matches.insert(label.clone(), result);
                    }
                    None => {
                        causes.push(Cause::new(
                            label.clone(),
                            key.configuration,
                            CauseKind::ConfigConditionsFailed,
                        ));
                    }
                }
            }
        }
    }
    if !causes.is_empty() {
        // Dependency-evaluation errors on config conditions are not
        // recoverable: later stages cannot read the attribute map.
        let mut merged_causes = causes;
        for error in errors {
            merged_causes.extend(error.causes().iter().cloned());
        }
        return Err(fail_all(
            env,
            format!("errors evaluating config conditions for {}", key.label),
            merged_causes,
        ));
    }
    Ok(Some(ConfigConditions::from_map(matches)))
}

fn resolve_attrs(
    rule: &RuleTarget,
    conditions: &ConfigConditions,
) -> Result<ConfiguredAttrs, SelectResolveError> {
    let mut entries = indexmap::IndexMap::new();
    for (name, schema) in &rule.rule_class.attrs {
        let Some(raw) = rule.raw_attr(name) else {
            if schema.mandatory {
                return Err(SelectResolveError::MissingMandatory(name.clone()));
            }
            continue;
        };
        if schema.nonconfigurable {
            let mut select_keys = Vec::new();
            raw.collect_select_keys(&mut select_keys);
            if !select_keys.is_empty() {
                return Err(SelectResolveError::SelectOnNonconfigurable(name.clone()));
            }
        }
        let resolved = raw
            .resolve(conditions)
            .map_err(|e| SelectResolveError::Select(name.clone(), e))?;
        entries.insert(name.clone(), resolved);
    }
    Ok(ConfiguredAttrs::from_entries(entries))
}

enum SelectResolveError {
    MissingMandatory(String),
    SelectOnNonconfigurable(String),
    Select(String, SelectError),
}

fn step_from_select(
    env: &mut ComputeEnv<'_, AnalysisSpec>,
    key: &ConfiguredTargetKey,
    error: SelectResolveError,
) -> Ct {
    let message = match error {
        SelectResolveError::MissingMandatory(attr) => {
            format!("{}: missing mandatory attribute {attr}", key.label)
        }
        SelectResolveError::SelectOnNonconfigurable(attr) => format!(
            "{}: attribute {attr} is nonconfigurable but holds a select()",
            key.label
        ),
        SelectResolveError::Select(attr, err) => {
            format!("{}: attribute {attr}: {err}", key.label)
        }
    };
    fail(
        env,
        message,
        Cause::new(
            key.label.clone(),
            key.configuration,
            CauseKind::ConfigConditionsFailed,
        ),
    )
}

#[allow(clippy::too_many_arguments)]
fn resolve_dependencies(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    stage1: &Stage1,
    rule: &RuleTarget,
    attrs: &ConfiguredAttrs,
    configuration: &Arc<Configuration>,
    toolchains: &BTreeMap<String, ToolchainContext>,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<Vec<Dependency>>, Ct> {
    // Enumerate attribute edges first; their packages are needed to trim
    // child configurations.
    let mut edges: Vec<(DependencyKind, Label, String)> = Vec::new();
    for (name, schema) in &rule.rule_class.attrs {
        if !schema.kind.is_dep() {
            continue;
        }
        let labels = attrs.labels(name);
        let kind = if rule.attrs.contains_key(name) {
            DependencyKind::Attribute(name.clone())
        } else {
            DependencyKind::Implicit(name.clone())
        };
        for label in labels {
            edges.push((kind.clone(), spec.intern_label(&label), name.clone()));
        }
    }

    let mut package_ids: Vec<PackageId> = Vec::new();
    for (_, label, _) in &edges {
        let id = label.package_id();
        if !package_ids.contains(&id) {
            package_ids.push(id);
        }
    }
    let package_keys: Vec<AnalysisKey> =
        package_ids.iter().map(|id| AnalysisKey::Package(id.clone())).collect();
    let package_values = env.get_values(&package_keys);
    if env.values_missing() {
        return Ok(None);
    }

    let mut packages: BTreeMap<PackageId, Arc<Package>> = BTreeMap::new();
    let mut causes: Vec<Cause> = Vec::new();
    for (id, value) in package_ids.iter().zip(package_values) {
        match value {
            None => return Ok(None),
            Some(Err(_)) => {
                // Which dep labels live in the broken package?
                for (_, label, _) in edges.iter().filter(|(_, l, _)| &l.package_id() == id) {
                    causes.push(Cause::new(
                        label.clone(),
                        None,
                        CauseKind::NoSuchPackage,
                    ));
                }
            }
            Some(Ok(v)) => match v.as_package() {
                Some(package) => {
                    packages.insert(id.clone(), Arc::clone(package));
                }
                None => return Err(internal(env, key, "package")),
            },
        }
    }
    if !causes.is_empty() {
        return Err(fail_all(
            env,
            format!("errors loading dependencies of {}", key.label),
            causes,
        ));
    }

    let parent_package = stage1.package.id.clone();
    let mut dependencies: Vec<Dependency> = Vec::new();
    let mut visibility_causes: Vec<Cause> = Vec::new();
    let empty_fragments = FragmentSet::new();
    for (kind, label, attr_name) in edges {
        let Some(package) = packages.get(&label.package_id()) else {
            return Err(internal(env, key, "dependency package"));
        };
        let Some(child) = package.target(label.name()) else {
            visibility_causes.push(Cause::new(label.clone(), None, CauseKind::NoSuchTarget));
            continue;
        };
        if !child
            .visibility
            .allows(&label.package_id(), &parent_package)
        {
            visibility_causes.push(Cause::new(
                label.clone(),
                None,
                CauseKind::DependencyEvaluationFailed {
                    dep_reported_own_error: false,
                },
            ));
            continue;
        }
        let schema = rule.rule_class.attrs.get(&attr_name);
        let (child_fragments, trim) = match &child.kind {
            TargetKind::Rule(child_rule) => (Some(&child_rule.rule_class.fragments), true),
            TargetKind::Source => (None, true),
            // Aliases keep the untrimmed options; the redirect target
            // applies its own trimming.
            TargetKind::Alias { .. } => (Some(&empty_fragments), false),
        };
        let (transition, aspects) = schema.map_or_else(
            || (crate::transition::DepTransition::None, Vec::new()),
            |s| (s.transition.clone(), s.aspects.clone()),
        );
        let resolved = spec.resolver().resolve_edge(EdgeRequest {
            parent_options: configuration.options(),
            attrs,
            label: label.clone(),
            kind: kind.clone(),
            transition: &transition,
            child_fragments,
            trim,
            execution_platform: None,
            aspects,
        });
        dependencies.extend(resolved);
    }
    if !visibility_causes.is_empty() {
        return Err(fail_all(
            env,
            format!("invalid dependencies of {}", key.label),
            visibility_causes,
        ));
    }

    // Toolchain edges reuse the tagged-trimmed configuration directly.
    let trimmed_key = env.state(CtScratch::default).trimmed_config;
    if let Some(trimmed_key) = trimmed_key {
        for context in toolchains.values() {
            for toolchain_label in context.toolchains.values() {
                dependencies.push(Dependency {
                    label: spec.intern_label(toolchain_label),
                    configuration: Some(trimmed_key),
                    kind: DependencyKind::Toolchain,
                    transition_key: None,
                    execution_platform: Some(context.execution_platform.clone()),
                    aspects: Vec::new(),
                });
            }
        }
    }

    Ok(Some(dependencies))
}

fn resolve_configured_target_dependencies(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    dependencies: &[Dependency],
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<Vec<ConfiguredTargetAndData>>, Ct> {
    let ct_keys: Vec<AnalysisKey> = dependencies
        .iter()
        .map(|dep| {
            AnalysisKey::ConfiguredTarget(ConfiguredTargetKey {
                label: dep.label.clone(),
                configuration: dep.configuration,
                execution_platform: dep.execution_platform.clone(),
            })
        })
        .collect();
    let values = env.get_values(&ct_keys);
    if env.values_missing() {
        return Ok(None);
    }

    let mut child_values: Vec<Arc<ConfiguredTargetValue>> = Vec::with_capacity(values.len());
    let mut errors: Vec<NodeError<Cause>> = Vec::new();
    for value in values {
        match value {
            None => return Ok(None),
            Some(Err(error)) => {
                // Keep collecting so every failing child contributes its
                // root causes.
                errors.push(error);
            }
            Some(Ok(v)) => match v.as_configured_target() {
                Some(ct) => child_values.push(Arc::clone(ct)),
                None => return Err(internal(env, key, "configured target")),
            },
        }
    }
    if !errors.is_empty() {
        let count = errors.len();
        return Err(Step::Failed(NodeError::aggregate(
            format!("{count} dependencies of {} failed to analyze", key.label),
            errors,
        )));
    }

    // First pass covered the packages the parent expected (the dep labels
    // themselves). Aliases may point into packages outside that set; fetch
    // those in a second pass.
    let mut extra_packages: Vec<PackageId> = Vec::new();
    for (dep, value) in dependencies.iter().zip(child_values.iter()) {
        let underlying = value.underlying_label();
        let id = underlying.package_id();
        if id != dep.label.package_id() && !extra_packages.contains(&id) {
            extra_packages.push(id);
        }
    }
    // The dep's own package is re-read here rather than re-threaded from
    // stage 6 scratch; the graph serves it from cache.
    let mut wanted: Vec<PackageId> = dependencies
        .iter()
        .map(|d| d.label.package_id())
        .collect();
    for id in extra_packages {
        if !wanted.contains(&id) {
            wanted.push(id);
        }
    }
    let mut unique: Vec<PackageId> = Vec::new();
    for id in wanted {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    let package_keys: Vec<AnalysisKey> =
        unique.iter().map(|id| AnalysisKey::Package(id.clone())).collect();
    let package_values = env.get_values(&package_keys);
    if env.values_missing() {
        // A package going missing mid-evaluation is a transient miss; the
        // restart retries. A package that failed is handled below, so a
        // genuine error cannot be masked by this path.
        return Ok(None);
    }
    let mut packages: BTreeMap<PackageId, Arc<Package>> = BTreeMap::new();
    let mut load_causes: Vec<Cause> = Vec::new();
    for (id, value) in unique.iter().zip(package_values) {
        match value {
            None => return Ok(None),
            Some(Err(_)) => load_causes.push(Cause::new(
                Label::new(&id.repo, &id.package, "BUILD"),
                None,
                CauseKind::NoSuchPackage,
            )),
            Some(Ok(v)) => match v.as_package() {
                Some(package) => {
                    packages.insert(id.clone(), Arc::clone(package));
                }
                None => return Err(internal(env, key, "package")),
            },
        }
    }
    if !load_causes.is_empty() {
        return Err(fail_all(
            env,
            format!("errors loading alias targets for {}", key.label),
            load_causes,
        ));
    }

    let mut resolved: Vec<ConfiguredTargetAndData> = Vec::with_capacity(dependencies.len());
    for (dep, value) in dependencies.iter().zip(child_values) {
        let underlying = value.underlying_label().clone();
        let Some(package) = packages.get(&underlying.package_id()) else {
            return Err(internal(env, key, "underlying package"));
        };
        let Some(target) = package.target(underlying.name()) else {
            return Err(fail(
                env,
                format!(
                    "no such target {underlying}: alias {} points nowhere",
                    dep.label
                ),
                Cause::new(underlying.clone(), None, CauseKind::NoSuchTarget),
            ));
        };
        let providers = value.providers().cloned().unwrap_or_default();
        resolved.push(ConfiguredTargetAndData {
            dependency: dep.clone(),
            value,
            target: Arc::new(target.clone()),
            providers,
        });
    }
    Ok(Some(resolved))
}

fn resolve_aspect_dependencies(
    key: &ConfiguredTargetKey,
    mut resolved: Vec<ConfiguredTargetAndData>,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Result<Option<DepValueMap>, Ct> {
    // An aspect applies along an edge only when the dep's providers satisfy
    // its requirements; edges with nothing applicable skip the graph hop.
    let mut requests: Vec<(usize, AnalysisKey)> = Vec::new();
    for (index, entry) in resolved.iter().enumerate() {
        let applicable: Vec<String> = entry
            .dependency
            .aspects
            .iter()
            .filter(|aspect| entry.providers.contains_all(&aspect.required_providers))
            .map(|aspect| aspect.name.clone())
            .collect();
        if applicable.is_empty() {
            continue;
        }
        requests.push((
            index,
            AnalysisKey::Aspect(crate::aspect::AspectKey {
                base: ConfiguredTargetKey {
                    label: entry.dependency.label.clone(),
                    configuration: entry.dependency.configuration,
                    execution_platform: entry.dependency.execution_platform.clone(),
                },
                aspects: applicable,
            }),
        ));
    }
    if requests.is_empty() {
        return Ok(Some(DepValueMap::from_entries(resolved)));
    }

    let keys: Vec<AnalysisKey> = requests.iter().map(|(_, k)| k.clone()).collect();
    let values = env.get_values(&keys);
    if env.values_missing() {
        return Ok(None);
    }
    for ((index, _), value) in requests.into_iter().zip(values) {
        match value {
            None => return Ok(None),
            Some(Err(error)) => {
                return Err(Step::Failed(NodeError::aggregate(
                    format!("aspect evaluation failed for a dependency of {}", key.label),
                    vec![error],
                )));
            }
            Some(Ok(v)) => {
                let Some(aspect_value) = v.as_aspect().cloned() else {
                    return Err(internal(env, key, "aspect"));
                };
                let entry = &mut resolved[index];
                if let Err(dup) = entry.providers.merge_from(&aspect_value.providers) {
                    return Err(fail(
                        env,
                        format!(
                            "aspects on {} duplicate provider {} from {}",
                            key.label, dup.id, entry.dependency.label
                        ),
                        Cause::new(
                            key.label.clone(),
                            key.configuration,
                            CauseKind::DuplicateProvider,
                        ),
                    ));
                }
            }
        }
    }
    Ok(Some(DepValueMap::from_entries(resolved)))
}

#[allow(clippy::too_many_arguments)]
fn invoke_rule(
    spec: &AnalysisSpec,
    key: &ConfiguredTargetKey,
    stage1: &Stage1,
    rule: &RuleTarget,
    configuration: &Arc<Configuration>,
    attrs: &ConfiguredAttrs,
    conditions: &ConfigConditions,
    toolchains: &BTreeMap<String, ToolchainContext>,
    deps: &DepValueMap,
    env: &mut ComputeEnv<'_, AnalysisSpec>,
) -> Ct {
    let mut analysis_env = AnalysisEnvironment::new();
    let mut valid_exec_groups: Vec<String> = vec![DEFAULT_EXEC_GROUP.to_owned()];
    valid_exec_groups.extend(rule.rule_class.exec_groups.keys().cloned());

    let outcome = {
        let mut ctx = RuleContext {
            label: &key.label,
            configuration,
            attrs,
            deps,
            config_conditions: conditions,
            toolchains,
            env: &mut analysis_env,
            valid_exec_groups: &valid_exec_groups,
        };
        rule.rule_class.implementation.analyze(&mut ctx)
    };

    let (events, actions, providers) = analysis_env.into_parts();
    match outcome {
        Err(RuleError::MissingDep) => Step::Restart,
        Err(RuleError::ActionConflict(output)) => fail(
            env,
            format!("{}: action conflict on output {output}", key.label),
            Cause::new(key.label.clone(), key.configuration, CauseKind::ActionConflict),
        ),
        Err(RuleError::DuplicateProvider(dup)) => fail(
            env,
            format!("{}: {dup}", key.label),
            Cause::new(
                key.label.clone(),
                key.configuration,
                CauseKind::DuplicateProvider,
            ),
        ),
        Err(RuleError::InvalidExecGroup(group)) => fail(
            env,
            format!("{}: invalid execution group {group}", key.label),
            Cause::new(key.label.clone(), key.configuration, CauseKind::AnalysisFailed),
        ),
        Err(RuleError::AnalysisFailure(message)) => fail(
            env,
            format!("{}: {message}", key.label),
            Cause::new(key.label.clone(), key.configuration, CauseKind::AnalysisFailed),
        ),
        Ok(()) => {
            if events.has_errors() {
                // Error events without an exception still fail the target.
                let buffered = {
                    let scratch = env.state(CtScratch::default);
                    scratch.stage_events.clone()
                };
                buffered.replay_into(env.listener());
                events.replay_into(env.listener());
                return Step::Failed(
                    NodeError::new(
                        format!("errors during analysis of {}", key.label),
                        NestedSet::singleton(Cause::new(
                            key.label.clone(),
                            key.configuration,
                            CauseKind::AnalysisFailed,
                        )),
                        CauseKind::AnalysisFailed.exit_code(),
                    )
                    .into_reported(),
                );
            }

            let exec_group_bindings: BTreeMap<String, Label> = toolchains
                .iter()
                .map(|(name, ctx)| (name.clone(), ctx.execution_platform.clone()))
                .collect();
            let transitive_packages =
                spec.analysis_options().store_transitive_packages.then(|| {
                    NestedSet::concat(
                        std::iter::once(NestedSet::singleton(stage1.package.id.clone())).chain(
                            deps.entries()
                                .iter()
                                .filter_map(|e| e.value.transitive_packages().cloned()),
                        ),
                    )
                });

            // Replay the events buffered with memoized stages, then this
            // activation's analysis events, in that order.
            let buffered = {
                let scratch = env.state(CtScratch::default);
                scratch.stage_events.clone()
            };
            buffered.replay_into(env.listener());
            events.replay_into(env.listener());

            Step::Done(AnalysisValue::ConfiguredTarget(Arc::new(
                ConfiguredTargetValue::Rule(Arc::new(RuleConfiguredTarget {
                    label: key.label.clone(),
                    configuration: configuration.key(),
                    providers,
                    actions,
                    exec_group_bindings,
                    transitive_packages,
                })),
            )))
        }
    }
}

fn collect_causes(errors: &[NodeError<Cause>]) -> Vec<Cause> {
    let mut causes = Vec::new();
    for error in errors {
        causes.extend(error.causes().iter().cloned());
    }
    causes
}

fn internal(
    env: &mut ComputeEnv<'_, AnalysisSpec>,
    key: &ConfiguredTargetKey,
    expected: &str,
) -> Ct {
    fail(
        env,
        format!("internal: {} received a non-{expected} dependency value", key.label),
        Cause::new(key.label.clone(), key.configuration, CauseKind::Internal),
    )
}

fn sorted(mut labels: Vec<Label>) -> Vec<Label> {
    labels.sort();
    labels
}

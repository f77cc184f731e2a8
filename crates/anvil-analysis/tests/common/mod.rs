// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

//! Fixture kit for the analysis integration tests: an in-memory package
//! loader, a programmable toolchain resolver, and a small family of demo
//! rule classes whose implementations expose what they saw through
//! providers, so tests can assert on dependency maps without reaching into
//! engine internals.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use anvil_analysis::{
    config_matching_provider, AnalysisKey, AnalysisOptions, AnalysisSpec, AnalysisValue,
    AttrKind, AttrSchema, AttrValue, BuildOptions, ConfigurationKey, ConfiguredTargetKey,
    ConfiguredTargetValue, DependencyKind, FragmentOptions, Label, OptionValue, Package,
    PackageError, PackageId, PackageLoader, ProviderField, ProviderId, ProviderStruct,
    RuleClass, RuleClassBuilder, RuleContext, RuleError, RuleImplementation, SourceLocation,
    Target, TargetKind, ToolchainContextKey, ToolchainError, ToolchainResolver,
    UnloadedToolchainContext, Visibility, ActionRecord, Cause, RuleTarget,
};
use anvil_graph::{CollectingSink, EvalOptions, Evaluator, NodeError, RequestError};

// ============================================================================
// Package loader
// ============================================================================

/// In-memory, mutable package table. Tests mutate it and invalidate the
/// matching `Package` keys to simulate edits between builds.
#[derive(Default)]
pub struct FixtureLoader {
    packages: Mutex<BTreeMap<PackageId, Result<Arc<Package>, PackageError>>>,
    loads: Mutex<BTreeMap<PackageId, usize>>,
}

impl FixtureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, package: Package) {
        self.packages
            .lock()
            .insert(package.id.clone(), Ok(Arc::new(package)));
    }

    pub fn fail(&self, id: PackageId, message: &str) {
        self.packages.lock().insert(
            id.clone(),
            Err(PackageError::NoSuchPackage(id, message.to_owned())),
        );
    }

    pub fn loads_of(&self, id: &PackageId) -> usize {
        self.loads.lock().get(id).copied().unwrap_or(0)
    }
}

impl PackageLoader for FixtureLoader {
    fn load(&self, id: &PackageId) -> Result<Arc<Package>, PackageError> {
        *self.loads.lock().entry(id.clone()).or_insert(0) += 1;
        match self.packages.lock().get(id) {
            Some(entry) => entry.clone(),
            None => Err(PackageError::NoSuchPackage(
                id.clone(),
                "package not defined in fixture".to_owned(),
            )),
        }
    }
}

// ============================================================================
// Toolchain resolver
// ============================================================================

/// Resolver that binds every requested toolchain type through a fixed map
/// and picks a fixed execution platform (or honors a forced one).
#[derive(Default)]
pub struct FixtureToolchainResolver {
    pub platform: Option<Label>,
    pub toolchains: BTreeMap<Label, Label>,
    pub no_match: Option<String>,
}

impl FixtureToolchainResolver {
    pub fn new(platform: Label, toolchains: BTreeMap<Label, Label>) -> Self {
        Self {
            platform: Some(platform),
            toolchains,
            no_match: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            platform: None,
            toolchains: BTreeMap::new(),
            no_match: Some(message.to_owned()),
        }
    }
}

impl ToolchainResolver for FixtureToolchainResolver {
    fn resolve(
        &self,
        key: &ToolchainContextKey,
        _options: &BuildOptions,
    ) -> Result<UnloadedToolchainContext, ToolchainError> {
        if let Some(message) = &self.no_match {
            return Ok(UnloadedToolchainContext {
                exec_group: key.exec_group.clone(),
                execution_platform: None,
                toolchains: BTreeMap::new(),
                error_data: Some(message.clone()),
            });
        }
        let platform = key
            .forced_execution_platform
            .clone()
            .or_else(|| self.platform.clone());
        let mut resolved = BTreeMap::new();
        for ttype in &key.toolchain_types {
            match self.toolchains.get(ttype) {
                Some(toolchain) => {
                    resolved.insert(ttype.clone(), toolchain.clone());
                }
                None => {
                    return Err(ToolchainError(format!(
                        "no registered toolchain for type {ttype}"
                    )));
                }
            }
        }
        Ok(UnloadedToolchainContext {
            exec_group: key.exec_group.clone(),
            execution_platform: platform,
            toolchains: resolved,
            error_data: None,
        })
    }
}

// ============================================================================
// Demo rule implementations
// ============================================================================

/// Library/binary implementation: records the dependency map into its
/// provider and registers one compile action per target.
pub struct RecordingImpl {
    /// Name of the provider this rule exposes (`DemoInfo`, `JavaInfo`, ...).
    pub provider: String,
}

impl RuleImplementation for RecordingImpl {
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let mut deps = Vec::new();
        let mut dep_cfgs = Vec::new();
        let mut toolchains = Vec::new();
        for entry in ctx.deps.entries() {
            match &entry.dependency.kind {
                DependencyKind::Attribute(_) | DependencyKind::Implicit(_) => {
                    let mut name = entry.dependency.label.to_string();
                    if let Some(tag) = &entry.dependency.transition_key {
                        name = format!("{name}#{tag}");
                    }
                    deps.push(name);
                    if let Some(cfg) = entry.dependency.configuration {
                        dep_cfgs.push(cfg.short());
                    }
                }
                DependencyKind::Toolchain => {
                    toolchains.push(entry.dependency.label.to_string());
                }
                _ => {}
            }
        }
        let dep_provider_names: Vec<String> = ctx
            .deps
            .entries()
            .iter()
            .flat_map(|e| e.providers.iter().map(|(id, _)| id.name().to_owned()))
            .collect();

        ctx.add_provider(
            ProviderId::new(&self.provider),
            Arc::new(
                ProviderStruct::new()
                    .with("deps", ProviderField::StrList(deps))
                    .with("dep_cfgs", ProviderField::StrList(dep_cfgs))
                    .with("toolchains", ProviderField::StrList(toolchains))
                    .with(
                        "dep_providers",
                        ProviderField::StrList(dep_provider_names),
                    ),
            ),
        )?;
        let label = ctx.label.clone();
        ctx.register_action(ActionRecord {
            mnemonic: "Compile".to_owned(),
            inputs: Vec::new(),
            outputs: vec![format!("{}/{}.o", label.package(), label.name())],
            exec_group: "default".to_owned(),
        })?;
        Ok(())
    }
}

/// `config_setting`: matches when the `core.mode` option equals the
/// `expected_mode` attribute.
pub struct ConfigSettingImpl;

impl RuleImplementation for ConfigSettingImpl {
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let expected = ctx.attrs.get_str("expected_mode").unwrap_or_default();
        let actual = ctx
            .configuration
            .options()
            .fragment("core")
            .and_then(|f| f.get_str("mode"))
            .unwrap_or_default();
        ctx.add_provider(
            anvil_analysis::config_matching_id(),
            config_matching_provider(expected == actual),
        )?;
        Ok(())
    }
}

/// Toolchain target implementation: exposes a marker provider.
pub struct ToolchainImpl;

impl RuleImplementation for ToolchainImpl {
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        ctx.add_provider(
            ProviderId::new("ToolchainInfo"),
            Arc::new(ProviderStruct::new().with(
                "label",
                ProviderField::Str(ctx.label.to_string()),
            )),
        )?;
        Ok(())
    }
}

/// Implementation that fails in a configurable way.
pub enum FailureMode {
    Analysis(String),
    ActionConflict,
    DuplicateProvider,
    InvalidExecGroup,
    ErrorEvent(String),
}

pub struct FailingImpl(pub FailureMode);

impl RuleImplementation for FailingImpl {
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        match &self.0 {
            FailureMode::Analysis(message) => Err(RuleError::AnalysisFailure(message.clone())),
            FailureMode::ActionConflict => {
                let out = format!("{}/clash.o", ctx.label.package());
                ctx.register_action(ActionRecord {
                    mnemonic: "One".to_owned(),
                    inputs: Vec::new(),
                    outputs: vec![out.clone()],
                    exec_group: "default".to_owned(),
                })?;
                ctx.register_action(ActionRecord {
                    mnemonic: "Two".to_owned(),
                    inputs: Vec::new(),
                    outputs: vec![out],
                    exec_group: "default".to_owned(),
                })?;
                Ok(())
            }
            FailureMode::DuplicateProvider => {
                ctx.add_provider(
                    ProviderId::new("Twice"),
                    Arc::new(ProviderStruct::new()),
                )?;
                ctx.add_provider(
                    ProviderId::new("Twice"),
                    Arc::new(ProviderStruct::new()),
                )?;
                Ok(())
            }
            FailureMode::InvalidExecGroup => {
                ctx.register_action(ActionRecord {
                    mnemonic: "Oops".to_owned(),
                    inputs: Vec::new(),
                    outputs: vec!["oops.o".to_owned()],
                    exec_group: "undeclared".to_owned(),
                })?;
                Ok(())
            }
            FailureMode::ErrorEvent(message) => {
                ctx.post(anvil_graph::Event::error(message.clone()));
                Ok(())
            }
        }
    }
}

/// Implementation that posts informational events; used by the event-replay
/// tests.
pub struct ChattyImpl;

impl RuleImplementation for ChattyImpl {
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
        let label = ctx.label.clone();
        ctx.post(anvil_graph::Event::info(format!("analyzing {label}")));
        ctx.add_provider(
            ProviderId::new("ChattyInfo"),
            Arc::new(ProviderStruct::new()),
        )?;
        Ok(())
    }
}

// ============================================================================
// Rule classes
// ============================================================================

pub fn library_rule(name: &str, provider: &str) -> Arc<RuleClass> {
    RuleClassBuilder::new(
        name,
        Arc::new(RecordingImpl {
            provider: provider.to_owned(),
        }),
    )
    .attr("srcs", AttrSchema::of(AttrKind::LabelList))
    .attr("deps", AttrSchema::of(AttrKind::LabelList))
    .attr(
        "target_compatible_with",
        AttrSchema::of(AttrKind::LabelList),
    )
    .fragments(&["core", "platform"])
    .build()
    .expect("rule class builds")
}

pub fn config_setting_rule() -> Arc<RuleClass> {
    RuleClassBuilder::new("config_setting", Arc::new(ConfigSettingImpl))
        .attr("expected_mode", AttrSchema::of(AttrKind::Str))
        .fragments(&["core"])
        .build()
        .expect("rule class builds")
}

pub fn toolchain_rule() -> Arc<RuleClass> {
    RuleClassBuilder::new("demo_toolchain", Arc::new(ToolchainImpl))
        .fragments(&["core", "platform"])
        .build()
        .expect("rule class builds")
}

// ============================================================================
// Target and package builders
// ============================================================================

pub fn rule_target(
    label: &Label,
    rule_class: &Arc<RuleClass>,
    attrs: Vec<(&str, AttrValue)>,
) -> Target {
    Target {
        label: label.clone(),
        kind: TargetKind::Rule(RuleTarget {
            rule_class: Arc::clone(rule_class),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        }),
        visibility: Visibility::Public,
        location: SourceLocation::synthetic(),
    }
}

pub fn source_target(label: &Label) -> Target {
    Target {
        label: label.clone(),
        kind: TargetKind::Source,
        visibility: Visibility::Public,
        location: SourceLocation::synthetic(),
    }
}

pub fn alias_target(label: &Label, actual: &Label) -> Target {
    Target {
        label: label.clone(),
        kind: TargetKind::Alias {
            actual: actual.clone(),
        },
        visibility: Visibility::Public,
        location: SourceLocation::synthetic(),
    }
}

pub fn package(id: PackageId, targets: Vec<Target>) -> Package {
    Package {
        id,
        targets: targets
            .into_iter()
            .map(|t| (t.label.name().to_owned(), t))
            .collect(),
        build_file: "BUILD".to_owned(),
        contains_errors: false,
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub spec: Arc<AnalysisSpec>,
    pub eval: Evaluator<AnalysisSpec>,
    pub sink: Arc<CollectingSink>,
    pub loader: Arc<FixtureLoader>,
}

pub fn harness_with(
    loader: Arc<FixtureLoader>,
    resolver: Arc<dyn ToolchainResolver>,
    aspects: Vec<Arc<anvil_analysis::AspectDefinition>>,
    options: AnalysisOptions,
) -> Harness {
    let spec = Arc::new(AnalysisSpec::new(
        Arc::clone(&loader) as _,
        resolver,
        aspects,
        options,
    ));
    let sink = Arc::new(CollectingSink::new());
    let eval = Evaluator::new(
        Arc::clone(&spec),
        EvalOptions {
            workers: 4,
            ..EvalOptions::default()
        },
        Arc::clone(&sink) as _,
    );
    Harness {
        spec,
        eval,
        sink,
        loader,
    }
}

pub fn harness(loader: Arc<FixtureLoader>) -> Harness {
    harness_with(
        loader,
        Arc::new(FixtureToolchainResolver::default()),
        Vec::new(),
        AnalysisOptions {
            store_transitive_packages: true,
            ..AnalysisOptions::default()
        },
    )
}

/// Standard options: `core.mode` plus a platform satisfying
/// `//constraints:linux`.
pub fn base_options(mode: &str) -> BuildOptions {
    BuildOptions::new()
        .with_fragment(
            "core",
            FragmentOptions::new().with("mode", OptionValue::Str(mode.to_owned())),
        )
        .with_fragment(
            "platform",
            FragmentOptions::new().with(
                "constraints",
                OptionValue::List(vec!["//constraints:linux".to_owned()]),
            ),
        )
}

pub fn target_config(harness: &Harness, mode: &str) -> ConfigurationKey {
    harness.spec.intern_options(base_options(mode)).key()
}

pub type CtResult = Result<Arc<ConfiguredTargetValue>, RequestError<Cause>>;

pub fn request_ct(
    harness: &mut Harness,
    label: &Label,
    configuration: Option<ConfigurationKey>,
) -> CtResult {
    let key = AnalysisKey::ConfiguredTarget(ConfiguredTargetKey::new(
        label.clone(),
        configuration,
    ));
    match harness.eval.request(&key) {
        Ok(AnalysisValue::ConfiguredTarget(value)) => Ok(value),
        Ok(_) => panic!("configured-target key returned a non-CT value"),
        Err(error) => Err(error),
    }
}

pub fn expect_failure(result: CtResult) -> NodeError<Cause> {
    match result {
        Ok(value) => panic!("expected failure, got {value:?}"),
        Err(RequestError::Failed(error)) => error,
        Err(RequestError::Interrupted) => panic!("unexpected interrupt"),
    }
}

/// Reads a `StrList` field out of a provider.
pub fn provider_strs(
    value: &ConfiguredTargetValue,
    provider: &str,
    field: &str,
) -> Vec<String> {
    let providers = value.providers().expect("value has providers");
    let data = providers
        .get(&ProviderId::new(provider))
        .unwrap_or_else(|| panic!("provider {provider} missing"));
    match data.get(field) {
        Some(ProviderField::StrList(items)) => items.clone(),
        other => panic!("field {field} is not a string list: {other:?}"),
    }
}

pub fn label(text: &str) -> Label {
    Label::parse(text).expect("label parses")
}

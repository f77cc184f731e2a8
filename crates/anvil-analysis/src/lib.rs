// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! anvil-analysis: the configured-target analysis core.
//!
//! Given a declarative dependency graph of build targets, per-target
//! configurations, and rule logic behind an opaque capability, this crate
//! incrementally produces configured targets: nodes that know their
//! configuration, their transitively-resolved dependencies, the
//! config-conditional branches they take, the toolchains they bind, and the
//! actions they would run. Evaluation rides on [`anvil_graph`].
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod aspect;
mod attr;
mod compat;
mod condition;
mod config;
mod configured_target;
mod dependency;
mod error;
mod function;
mod keys;
mod label;
mod options;
mod package;
mod provider;
mod resolver;
mod rule;
mod target;
mod toolchain;
mod transition;

/// Aspect definitions, keys, and the aspect capability.
pub use aspect::{
    AspectContext, AspectDefinition, AspectError, AspectImplementation, AspectKey, AspectValue,
};
/// Attribute values, select expressions, and resolved attribute maps.
pub use attr::{AttrValue, ConfiguredAttrs, SelectBranch, SelectError, SelectValue};
/// Platform-incompatibility checks and markers.
pub use compat::{
    incompatible_provider_id, IncompatibleReason, INCOMPATIBLE_PROVIDER, TARGET_COMPATIBLE_WITH,
};
/// Config-condition resolution and the config-matching provider.
pub use condition::{
    config_matching_id, config_matching_provider, read_config_matching, ConfigConditions,
    CONFIG_MATCHING_PROVIDER,
};
/// Configurations and their interning cache.
pub use config::{ConfigCache, Configuration, ConfigurationKey};
/// Configured-target keys and values.
pub use configured_target::{
    ActionRecord, ConfiguredTargetAndData, ConfiguredTargetKey, ConfiguredTargetValue,
    DepValueMap, RuleConfiguredTarget,
};
/// Dependency edges.
pub use dependency::{Dependency, DependencyKind};
/// The closed failure catalog.
pub use error::{
    Cause, CauseKind, EXIT_ANALYSIS, EXIT_CYCLE, EXIT_INTERNAL, EXIT_LOADING, EXIT_TOOLCHAIN,
};
/// Source-file provider.
pub use function::{file_provider_id, FILE_PROVIDER};
/// The analysis spec and its graph keys/values.
pub use keys::{AnalysisKey, AnalysisOptions, AnalysisSpec, AnalysisValue};
/// Labels and package identifiers.
pub use label::{Label, LabelData, LabelError, PackageId};
/// Build options grouped into fragments.
pub use options::{BuildOptions, Digest, FragmentOptions, FragmentSet, OptionValue};
/// The package-loader collaborator contract.
pub use package::{Package, PackageError, PackageLoader};
/// Providers.
pub use provider::{DuplicateProvider, ProviderField, ProviderId, ProviderSet, ProviderStruct};
/// The configuration resolver.
pub use resolver::{ConfigurationResolver, EdgeRequest};
/// Rule classes, schemas, and the rule-implementation capability.
pub use rule::{
    AnalysisEnvironment, AttrKind, AttrSchema, ExecGroup, RuleClass, RuleClassBuilder,
    RuleClassError, RuleContext, RuleError, RuleImplementation,
};
/// Targets and visibility.
pub use target::{RuleTarget, SourceLocation, Target, TargetKind, Visibility};
/// The toolchain-resolver collaborator contract.
pub use toolchain::{
    ToolchainContext, ToolchainContextKey, ToolchainError, ToolchainResolver,
    UnloadedToolchainContext, DEFAULT_EXEC_GROUP,
};
/// Transitions and trimming.
pub use transition::{
    DepTransition, ToolchainTaggedTrimming, Transition, TransitionOutput, PLATFORM_FRAGMENT,
};

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Rule classes, attribute schemas, and the rule-implementation capability.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use anvil_graph::{Event, StoredEvents};

use crate::attr::{AttrValue, ConfiguredAttrs};
use crate::condition::ConfigConditions;
use crate::config::Configuration;
use crate::configured_target::{ActionRecord, DepValueMap};
use crate::label::Label;
use crate::options::FragmentSet;
use crate::provider::{DuplicateProvider, ProviderId, ProviderSet, ProviderStruct};
use crate::toolchain::{ToolchainContext, DEFAULT_EXEC_GROUP};
use crate::transition::DepTransition;

/// The shape of one attribute.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttrKind {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// String.
    Str,
    /// String list.
    StrList,
    /// A single dependency label.
    Label,
    /// A list of dependency labels.
    LabelList,
}

impl AttrKind {
    /// Whether values of this kind form dependency edges.
    #[must_use]
    pub fn is_dep(self) -> bool {
        matches!(self, Self::Label | Self::LabelList)
    }
}

/// Schema of one attribute in a rule class.
#[derive(Clone, Debug)]
pub struct AttrSchema {
    /// Value shape.
    pub kind: AttrKind,
    /// Transition applied along edges of this attribute.
    pub transition: DepTransition,
    /// Value used when the target omits the attribute; an implicit edge for
    /// dep-forming kinds.
    pub default: Option<AttrValue>,
    /// The attribute must be present on every target.
    pub mandatory: bool,
    /// The attribute may not hold `select()` values.
    pub nonconfigurable: bool,
    /// Aspects propagated along edges of this attribute.
    pub aspects: Vec<Arc<crate::aspect::AspectDefinition>>,
}

impl AttrSchema {
    /// Plain schema of the given kind.
    #[must_use]
    pub fn of(kind: AttrKind) -> Self {
        Self {
            kind,
            transition: DepTransition::None,
            default: None,
            mandatory: false,
            nonconfigurable: false,
            aspects: Vec::new(),
        }
    }

    /// Attaches a transition.
    #[must_use]
    pub fn with_transition(mut self, transition: DepTransition) -> Self {
        self.transition = transition;
        self
    }

    /// Attaches a default value.
    #[must_use]
    pub fn with_default(mut self, default: AttrValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Marks the attribute non-configurable.
    #[must_use]
    pub fn nonconfigurable(mut self) -> Self {
        self.nonconfigurable = true;
        self
    }

    /// Propagates an aspect along this attribute.
    #[must_use]
    pub fn with_aspect(mut self, aspect: Arc<crate::aspect::AspectDefinition>) -> Self {
        self.aspects.push(aspect);
        self
    }
}

/// A named partition of a target's actions with its own toolchain
/// requirements.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExecGroup {
    /// Toolchain types this group resolves.
    pub toolchain_types: Vec<Label>,
    /// Constraints its execution platform must satisfy.
    pub exec_compatible_with: Vec<Label>,
}

/// A rule class: schema plus implementation.
pub struct RuleClass {
    /// Rule class name (`demo_library`, ...).
    pub name: String,
    /// Attribute schemas in declaration order.
    pub attrs: IndexMap<String, AttrSchema>,
    /// Option fragments this rule reads; children are trimmed to these.
    pub fragments: FragmentSet,
    /// Whether targets of this class resolve toolchains.
    pub uses_toolchain_resolution: bool,
    /// Toolchain types of the default execution group.
    pub toolchain_types: Vec<Label>,
    /// Default exec constraints.
    pub exec_compatible_with: Vec<Label>,
    /// Additional named execution groups.
    pub exec_groups: IndexMap<String, ExecGroup>,
    /// The implementation invoked at analysis time.
    pub implementation: Arc<dyn RuleImplementation>,
}

impl core::fmt::Debug for RuleClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RuleClass")
            .field("name", &self.name)
            .field("attrs", &self.attrs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Rule-class construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleClassError {
    /// A nonconfigurable attribute carried a `select()` default.
    #[error("rule {rule}: nonconfigurable attribute {attr} has a select() default")]
    SelectOnNonconfigurable {
        /// Rule class name.
        rule: String,
        /// Offending attribute.
        attr: String,
    },
}

/// Fluent builder for [`RuleClass`].
pub struct RuleClassBuilder {
    name: String,
    attrs: IndexMap<String, AttrSchema>,
    fragments: FragmentSet,
    uses_toolchain_resolution: bool,
    toolchain_types: Vec<Label>,
    exec_compatible_with: Vec<Label>,
    exec_groups: IndexMap<String, ExecGroup>,
    implementation: Arc<dyn RuleImplementation>,
}

impl RuleClassBuilder {
    /// Starts a rule class with the given name and implementation.
    #[must_use]
    pub fn new(name: &str, implementation: Arc<dyn RuleImplementation>) -> Self {
        Self {
            name: name.to_owned(),
            attrs: IndexMap::new(),
            fragments: FragmentSet::new(),
            uses_toolchain_resolution: false,
            toolchain_types: Vec::new(),
            exec_compatible_with: Vec::new(),
            exec_groups: IndexMap::new(),
            implementation,
        }
    }

    /// Declares one attribute.
    #[must_use]
    pub fn attr(mut self, name: &str, schema: AttrSchema) -> Self {
        self.attrs.insert(name.to_owned(), schema);
        self
    }

    /// Declares the option fragments this rule reads.
    #[must_use]
    pub fn fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = FragmentSet::of(fragments);
        self
    }

    /// Enables toolchain resolution for the given types.
    #[must_use]
    pub fn toolchains(mut self, types: Vec<Label>) -> Self {
        self.uses_toolchain_resolution = true;
        self.toolchain_types = types;
        self
    }

    /// Adds default exec constraints.
    #[must_use]
    pub fn exec_compatible_with(mut self, constraints: Vec<Label>) -> Self {
        self.exec_compatible_with = constraints;
        self
    }

    /// Declares a named execution group.
    #[must_use]
    pub fn exec_group(mut self, name: &str, group: ExecGroup) -> Self {
        self.uses_toolchain_resolution = true;
        self.exec_groups.insert(name.to_owned(), group);
        self
    }

    /// Validates and builds the rule class.
    pub fn build(self) -> Result<Arc<RuleClass>, RuleClassError> {
        for (attr_name, schema) in &self.attrs {
            if schema.nonconfigurable {
                let mut keys = Vec::new();
                if let Some(default) = &schema.default {
                    default.collect_select_keys(&mut keys);
                }
                if !keys.is_empty() {
                    return Err(RuleClassError::SelectOnNonconfigurable {
                        rule: self.name,
                        attr: attr_name.clone(),
                    });
                }
            }
        }
        Ok(Arc::new(RuleClass {
            name: self.name,
            attrs: self.attrs,
            fragments: self.fragments,
            uses_toolchain_resolution: self.uses_toolchain_resolution,
            toolchain_types: self.toolchain_types,
            exec_compatible_with: self.exec_compatible_with,
            exec_groups: self.exec_groups,
            implementation: self.implementation,
        }))
    }
}

/// Failures a rule implementation may raise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A value the implementation needs is not available yet; the engine
    /// restarts the configured-target function.
    #[error("missing dependency value")]
    MissingDep,
    /// Two actions claimed the same output.
    #[error("action conflict on output {0}")]
    ActionConflict(String),
    /// An action referenced an undeclared execution group.
    #[error("invalid execution group {0}")]
    InvalidExecGroup(String),
    /// The implementation reported an analysis failure.
    #[error("{0}")]
    AnalysisFailure(String),
    /// Two providers with the same id were added.
    #[error(transparent)]
    DuplicateProvider(#[from] DuplicateProvider),
}

/// Buffered event sink plus action registrar handed to rule
/// implementations.
#[derive(Debug, Default)]
pub struct AnalysisEnvironment {
    events: StoredEvents,
    actions: Vec<ActionRecord>,
    outputs: rustc_hash::FxHashSet<String>,
    providers: ProviderSet,
}

impl AnalysisEnvironment {
    /// Fresh environment for one rule invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffered events.
    #[must_use]
    pub fn events(&self) -> &StoredEvents {
        &self.events
    }

    pub(crate) fn into_parts(self) -> (StoredEvents, Vec<ActionRecord>, ProviderSet) {
        (self.events, self.actions, self.providers)
    }
}

/// Everything a rule implementation sees.
pub struct RuleContext<'a> {
    /// The target's label.
    pub label: &'a Label,
    /// The configuration being analyzed.
    pub configuration: &'a Configuration,
    /// Resolved attributes.
    pub attrs: &'a ConfiguredAttrs,
    /// Dependency values, aspects merged.
    pub deps: &'a DepValueMap,
    /// Resolved config conditions.
    pub config_conditions: &'a ConfigConditions,
    /// Toolchain contexts by execution group.
    pub toolchains: &'a BTreeMap<String, ToolchainContext>,
    pub(crate) env: &'a mut AnalysisEnvironment,
    pub(crate) valid_exec_groups: &'a [String],
}

impl RuleContext<'_> {
    /// Posts a diagnostic event.
    pub fn post(&mut self, event: Event) {
        self.env.events.post(event);
    }

    /// Registers one action; outputs must be unique within the target and
    /// the action's exec group must be declared.
    pub fn register_action(&mut self, action: ActionRecord) -> Result<(), RuleError> {
        if !self.valid_exec_groups.contains(&action.exec_group) {
            return Err(RuleError::InvalidExecGroup(action.exec_group));
        }
        for output in &action.outputs {
            if !self.env.outputs.insert(output.clone()) {
                return Err(RuleError::ActionConflict(output.clone()));
            }
        }
        self.env.actions.push(action);
        Ok(())
    }

    /// Exposes one provider; duplicate ids fail the rule.
    pub fn add_provider(
        &mut self,
        id: ProviderId,
        value: Arc<ProviderStruct>,
    ) -> Result<(), RuleError> {
        self.env.providers.insert(id, value)?;
        Ok(())
    }

    /// Toolchain context of the default execution group.
    #[must_use]
    pub fn default_toolchains(&self) -> Option<&ToolchainContext> {
        self.toolchains.get(DEFAULT_EXEC_GROUP)
    }
}

impl core::fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RuleContext")
            .field("label", &self.label)
            .field("deps", &self.deps.len())
            .finish_non_exhaustive()
    }
}

/// The opaque capability through which the core invokes rule logic.
///
/// Implementations live in the embedded scripting runtime; the core only
/// sees this trait.
pub trait RuleImplementation: Send + Sync {
    /// Analyzes one configured target.
    fn analyze(&self, ctx: &mut RuleContext<'_>) -> Result<(), RuleError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{SelectBranch, SelectValue};

    struct NoopImpl;
    impl RuleImplementation for NoopImpl {
        fn analyze(&self, _ctx: &mut RuleContext<'_>) -> Result<(), RuleError> {
            Ok(())
        }
    }

    #[test]
    fn nonconfigurable_attr_rejects_select_default() {
        let select = AttrValue::Select(SelectValue::new(vec![(
            SelectBranch::Default,
            AttrValue::Bool(true),
        )]));
        let err = RuleClassBuilder::new("bad_rule", Arc::new(NoopImpl))
            .attr(
                "flag",
                AttrSchema::of(AttrKind::Bool)
                    .nonconfigurable()
                    .with_default(select),
            )
            .build()
            .expect_err("must reject");
        assert!(matches!(
            err,
            RuleClassError::SelectOnNonconfigurable { .. }
        ));
    }

    #[test]
    fn plain_rule_class_builds() {
        let rule = RuleClassBuilder::new("demo_library", Arc::new(NoopImpl))
            .attr("deps", AttrSchema::of(AttrKind::LabelList))
            .fragments(&["core"])
            .build()
            .expect("builds");
        assert_eq!(rule.name, "demo_library");
        assert!(rule.attrs.contains_key("deps"));
    }
}

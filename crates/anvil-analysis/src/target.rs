// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Targets: parsed rule instances, source files, and aliases.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::attr::AttrValue;
use crate::label::{Label, PackageId};
use crate::rule::RuleClass;

/// Where a target was declared.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SourceLocation {
    /// Build file path.
    pub file: String,
    /// 1-based line.
    pub line: u32,
}

impl SourceLocation {
    /// A location for generated fixtures.
    #[must_use]
    pub fn synthetic() -> Self {
        Self {
            file: "BUILD".to_owned(),
            line: 1,
        }
    }
}

/// Who may depend on a target.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Visibility {
    /// Everyone.
    Public,
    /// Only the declaring package.
    Private,
    /// The listed packages.
    Packages(Vec<PackageId>),
}

impl Visibility {
    /// Whether a target in `from` may depend on a target with this
    /// visibility declared in `own`.
    #[must_use]
    pub fn allows(&self, own: &PackageId, from: &PackageId) -> bool {
        match self {
            Self::Public => true,
            Self::Private => own == from,
            Self::Packages(packages) => own == from || packages.contains(from),
        }
    }
}

/// A rule instance: rule class plus attribute map.
#[derive(Clone, Debug)]
pub struct RuleTarget {
    /// The rule class driving analysis of this target.
    pub rule_class: Arc<RuleClass>,
    /// Attribute values, concrete or still holding `select()` chains.
    pub attrs: IndexMap<String, AttrValue>,
}

impl PartialEq for RuleTarget {
    fn eq(&self, other: &Self) -> bool {
        // Rule classes are registered once per name; comparing by name keeps
        // target equality content-addressed without hashing closures.
        self.rule_class.name == other.rule_class.name && self.attrs == other.attrs
    }
}

impl Eq for RuleTarget {}

impl RuleTarget {
    /// Attribute value as declared, falling back to the schema default.
    #[must_use]
    pub fn raw_attr(&self, name: &str) -> Option<AttrValue> {
        if let Some(value) = self.attrs.get(name) {
            return Some(value.clone());
        }
        self.rule_class
            .attrs
            .get(name)
            .and_then(|schema| schema.default.clone())
    }

    /// Collects every `select()` condition label across all attributes via
    /// the raw (pre-resolution) walk, de-duplicated in first-seen order.
    #[must_use]
    pub fn raw_select_keys(&self) -> Vec<Label> {
        let mut keys = Vec::new();
        for schema_name in self.rule_class.attrs.keys() {
            if let Some(value) = self.raw_attr(schema_name) {
                value.collect_select_keys(&mut keys);
            }
        }
        let mut seen = Vec::new();
        for key in keys {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }
}

/// The flavor of a target.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TargetKind {
    /// A rule instance; configurable.
    Rule(RuleTarget),
    /// A source file; never configurable.
    Source,
    /// A redirect to another label; configurable, forwards providers.
    Alias {
        /// The label this alias points at.
        actual: Label,
    },
}

/// A parsed target, read-only to the analysis core.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Target {
    /// The target's own label.
    pub label: Label,
    /// Rule, source, or alias.
    pub kind: TargetKind,
    /// Visibility declaration.
    pub visibility: Visibility,
    /// Declaration site.
    pub location: SourceLocation,
}

impl Target {
    /// Whether this target takes a configuration.
    #[must_use]
    pub fn is_configurable(&self) -> bool {
        !matches!(self.kind, TargetKind::Source)
    }

    /// The rule payload, when this is a rule target.
    #[must_use]
    pub fn as_rule(&self) -> Option<&RuleTarget> {
        match &self.kind {
            TargetKind::Rule(rule) => Some(rule),
            _ => None,
        }
    }

    /// Rule class name for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            TargetKind::Rule(rule) => &rule.rule_class.name,
            TargetKind::Source => "source file",
            TargetKind::Alias { .. } => "alias",
        }
    }
}

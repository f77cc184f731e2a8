// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Attribute values, `select()` chains, and their resolution.
//!
//! A target's attribute map holds concrete values plus unresolved select
//! expressions. Select keys are collected through a *raw* walk before config
//! conditions exist; resolution happens later, against the conditions
//! evaluated in the target's own configuration.

use indexmap::IndexMap;
use thiserror::Error;

use crate::condition::ConfigConditions;
use crate::label::Label;

/// An attribute value, possibly still conditional.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AttrValue {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// String.
    Str(String),
    /// Ordered string list.
    StrList(Vec<String>),
    /// A single label.
    Label(Label),
    /// Ordered label list.
    LabelList(Vec<Label>),
    /// An unresolved `select()` expression.
    Select(SelectValue),
    /// Concatenation of segments (lists + selects).
    Concat(Vec<AttrValue>),
}

impl AttrValue {
    /// Collects every `select()` condition label in this value, in syntactic
    /// order. This is the raw walk: it must not require resolved conditions.
    pub fn collect_select_keys(&self, out: &mut Vec<Label>) {
        match self {
            Self::Select(select) => {
                for (branch, value) in &select.branches {
                    if let SelectBranch::Condition(label) = branch {
                        out.push(label.clone());
                    }
                    value.collect_select_keys(out);
                }
            }
            Self::Concat(segments) => {
                for segment in segments {
                    segment.collect_select_keys(out);
                }
            }
            _ => {}
        }
    }

    /// Labels referenced by a fully resolved value.
    pub fn dep_labels(&self, out: &mut Vec<Label>) {
        match self {
            Self::Label(label) => out.push(label.clone()),
            Self::LabelList(labels) => out.extend(labels.iter().cloned()),
            Self::Concat(segments) => {
                for segment in segments {
                    segment.dep_labels(out);
                }
            }
            Self::Select(_) | Self::Bool(_) | Self::Int(_) | Self::Str(_) | Self::StrList(_) => {}
        }
    }

    /// Resolves selects against `conditions`, flattening concatenations.
    pub fn resolve(&self, conditions: &ConfigConditions) -> Result<AttrValue, SelectError> {
        match self {
            Self::Select(select) => select.choose(conditions),
            Self::Concat(segments) => {
                let mut resolved = Vec::with_capacity(segments.len());
                for segment in segments {
                    resolved.push(segment.resolve(conditions)?);
                }
                Ok(concat_resolved(resolved))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Concatenates resolved segments; label lists and string lists append,
/// anything else keeps the last segment.
fn concat_resolved(segments: Vec<AttrValue>) -> AttrValue {
    let mut labels: Vec<Label> = Vec::new();
    let mut strings: Vec<String> = Vec::new();
    let mut saw_labels = false;
    let mut saw_strings = false;
    let mut last = None;
    for segment in segments {
        match segment {
            AttrValue::Label(l) => {
                saw_labels = true;
                labels.push(l);
            }
            AttrValue::LabelList(ls) => {
                saw_labels = true;
                labels.extend(ls);
            }
            AttrValue::StrList(ss) => {
                saw_strings = true;
                strings.extend(ss);
            }
            other => last = Some(other),
        }
    }
    if saw_labels {
        AttrValue::LabelList(labels)
    } else if saw_strings {
        AttrValue::StrList(strings)
    } else {
        last.unwrap_or(AttrValue::StrList(Vec::new()))
    }
}

/// One branch key of a select expression.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SelectBranch {
    /// A config-condition label.
    Condition(Label),
    /// The `//conditions:default` branch.
    Default,
}

/// An unresolved `select()` expression.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SelectValue {
    /// Branches in syntactic order.
    pub branches: Vec<(SelectBranch, Box<AttrValue>)>,
    /// Custom message for the no-match error.
    pub no_match_message: Option<String>,
}

impl SelectValue {
    /// Builds a select from branches.
    #[must_use]
    pub fn new(branches: Vec<(SelectBranch, AttrValue)>) -> Self {
        Self {
            branches: branches
                .into_iter()
                .map(|(b, v)| (b, Box::new(v)))
                .collect(),
            no_match_message: None,
        }
    }

    /// Picks the matching branch.
    ///
    /// Exactly one condition branch may match; several simultaneous matches
    /// are an error, no match falls back to the default branch, and a
    /// missing default is an error.
    pub fn choose(&self, conditions: &ConfigConditions) -> Result<AttrValue, SelectError> {
        let mut matched: Option<(&Label, &AttrValue)> = None;
        let mut default: Option<&AttrValue> = None;
        for (branch, value) in &self.branches {
            match branch {
                SelectBranch::Default => default = Some(value.as_ref()),
                SelectBranch::Condition(label) => {
                    let verdict = conditions
                        .matches(label)
                        .ok_or_else(|| SelectError::UnresolvedCondition(label.clone()))?;
                    if verdict {
                        if let Some((first, _)) = matched {
                            return Err(SelectError::MultipleMatches(
                                first.clone(),
                                label.clone(),
                            ));
                        }
                        matched = Some((label, value.as_ref()));
                    }
                }
            }
        }
        match (matched, default) {
            (Some((_, value)), _) => value.resolve(conditions),
            (None, Some(value)) => value.resolve(conditions),
            (None, None) => Err(SelectError::NoMatch(
                self.no_match_message
                    .clone()
                    .unwrap_or_else(|| "no matching condition and no default".to_owned()),
            )),
        }
    }
}

/// Select resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// A condition label was never evaluated; key collection missed it.
    #[error("condition {0} was not resolved before attribute resolution")]
    UnresolvedCondition(Label),
    /// Two condition branches matched at once.
    #[error("conditions {0} and {1} both match")]
    MultipleMatches(Label, Label),
    /// No branch matched and there is no default.
    #[error("{0}")]
    NoMatch(String),
}

/// Fully resolved attributes of one configured target.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct ConfiguredAttrs {
    entries: IndexMap<String, AttrValue>,
}

impl ConfiguredAttrs {
    /// Builds from resolved entries.
    #[must_use]
    pub fn from_entries(entries: IndexMap<String, AttrValue>) -> Self {
        Self { entries }
    }

    /// Reads one attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    /// Label-list view of an attribute (single labels coerce).
    #[must_use]
    pub fn labels(&self, name: &str) -> Vec<Label> {
        let mut out = Vec::new();
        if let Some(value) = self.entries.get(name) {
            value.dep_labels(&mut out);
        }
        out
    }

    /// String accessor.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Iterates attributes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

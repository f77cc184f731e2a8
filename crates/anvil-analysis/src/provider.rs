// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Providers: the open mapping from provider id to provider struct that a
//! configured target exposes to its consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::label::Label;

/// Identifier of a provider kind.
///
/// Ids are content-addressed by name; equality takes a pointer fast path for
/// handles that came from the same interning site.
#[derive(Clone, Debug)]
pub struct ProviderId(Arc<str>);

impl ProviderId {
    /// Builds a provider id from its name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ProviderId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ProviderId {}

impl std::hash::Hash for ProviderId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for ProviderId {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProviderId {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl core::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field of a provider struct.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ProviderField {
    /// Boolean field.
    Bool(bool),
    /// Integer field.
    Int(i64),
    /// String field.
    Str(String),
    /// String list field.
    StrList(Vec<String>),
    /// Label list field.
    Labels(Vec<Label>),
}

/// A provider instance: a named bag of fields, opaque to the core.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct ProviderStruct {
    fields: BTreeMap<String, ProviderField>,
}

impl ProviderStruct {
    /// Empty struct.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one field.
    #[must_use]
    pub fn with(mut self, name: &str, field: ProviderField) -> Self {
        self.fields.insert(name.to_owned(), field);
        self
    }

    /// Reads one field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderField> {
        self.fields.get(name)
    }

    /// Boolean accessor.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(ProviderField::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// String accessor.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(ProviderField::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProviderField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Two providers with the same id reached one provider set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("duplicate provider {id}")]
pub struct DuplicateProvider {
    /// The colliding provider id.
    pub id: ProviderId,
}

/// Ordered mapping from provider id to provider struct.
#[derive(Clone, Default, Debug)]
pub struct ProviderSet {
    entries: IndexMap<ProviderId, Arc<ProviderStruct>>,
}

impl ProviderSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one provider; duplicate ids are an error.
    pub fn insert(
        &mut self,
        id: ProviderId,
        value: Arc<ProviderStruct>,
    ) -> Result<(), DuplicateProvider> {
        if self.entries.contains_key(&id) {
            return Err(DuplicateProvider { id });
        }
        self.entries.insert(id, value);
        Ok(())
    }

    /// Reads one provider.
    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<&Arc<ProviderStruct>> {
        self.entries.get(id)
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, id: &ProviderId) -> bool {
        self.entries.contains_key(id)
    }

    /// True when every id in `ids` is present.
    #[must_use]
    pub fn contains_all(&self, ids: &[ProviderId]) -> bool {
        ids.iter().all(|id| self.entries.contains_key(id))
    }

    /// Merges `other` into `self`; the first duplicate id aborts the merge.
    pub fn merge_from(&mut self, other: &Self) -> Result<(), DuplicateProvider> {
        for (id, value) in &other.entries {
            self.insert(id.clone(), Arc::clone(value))?;
        }
        Ok(())
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates providers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProviderId, &Arc<ProviderStruct>)> {
        self.entries.iter()
    }
}

impl PartialEq for ProviderSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ida, va), (idb, vb))| ida == idb && va == vb)
    }
}

impl Eq for ProviderSet {}

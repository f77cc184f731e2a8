// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Config conditions: the resolved results of every `select()` key a target
//! references.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::label::Label;
use crate::provider::{ProviderField, ProviderId, ProviderSet, ProviderStruct};

/// Name of the provider a config-condition target must expose.
pub const CONFIG_MATCHING_PROVIDER: &str = "ConfigMatchingProvider";

/// Provider id for config matching.
#[must_use]
pub fn config_matching_id() -> ProviderId {
    ProviderId::new(CONFIG_MATCHING_PROVIDER)
}

/// Builds a `ConfigMatchingProvider` struct.
#[must_use]
pub fn config_matching_provider(matches: bool) -> Arc<ProviderStruct> {
    Arc::new(ProviderStruct::new().with("matches", ProviderField::Bool(matches)))
}

/// Reads a dep's config-matching verdict, `None` when it is not a valid
/// condition target.
#[must_use]
pub fn read_config_matching(providers: &ProviderSet) -> Option<bool> {
    providers
        .get(&config_matching_id())
        .and_then(|p| p.get_bool("matches"))
}

/// Resolved `select()` keys for one target, evaluated under the target's own
/// configuration.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct ConfigConditions {
    matches: BTreeMap<Label, bool>,
}

impl ConfigConditions {
    /// No conditions.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds from resolved entries.
    #[must_use]
    pub fn from_map(matches: BTreeMap<Label, bool>) -> Self {
        Self { matches }
    }

    /// Whether `condition` matched; `None` when the condition was never
    /// requested, which callers must treat as a bug in key collection.
    #[must_use]
    pub fn matches(&self, condition: &Label) -> Option<bool> {
        self.matches.get(condition).copied()
    }

    /// True when no conditions were referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Number of resolved conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Iterates conditions in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&Label, bool)> {
        self.matches.iter().map(|(l, m)| (l, *m))
    }
}

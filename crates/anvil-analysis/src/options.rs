// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Build options, grouped into fragments.
//!
//! Options are keyed twice: by fragment, then by option name, so trimming a
//! configuration to the fragments a rule actually reads is a projection
//! rather than an option-by-option decision. Two `BuildOptions` are equal iff
//! their fragment sets are equal element-wise; the canonical digest is a
//! domain-separated BLAKE3 hash over the deterministically ordered encoding.

use std::collections::{BTreeMap, BTreeSet};

use blake3::Hasher;

/// Canonical 256-bit digest used for configuration identity.
pub type Digest = [u8; 32];

/// A single option value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum OptionValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer option.
    Int(i64),
    /// String option.
    Str(String),
    /// Ordered list of strings.
    List(Vec<String>),
}

impl OptionValue {
    fn encode_into(&self, hasher: &mut Hasher) {
        match self {
            Self::Bool(b) => {
                hasher.update(b"b");
                hasher.update(&[u8::from(*b)]);
            }
            Self::Int(i) => {
                hasher.update(b"i");
                hasher.update(&i.to_le_bytes());
            }
            Self::Str(s) => {
                hasher.update(b"s");
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Self::List(items) => {
                hasher.update(b"l");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    hasher.update(&(item.len() as u64).to_le_bytes());
                    hasher.update(item.as_bytes());
                }
            }
        }
    }
}

/// Options belonging to one fragment.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct FragmentOptions {
    entries: BTreeMap<String, OptionValue>,
}

impl FragmentOptions {
    /// Empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one option, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: &str, value: OptionValue) -> Self {
        self.entries.insert(key.to_owned(), value);
        self
    }

    /// Sets one option in place.
    pub fn set(&mut self, key: &str, value: OptionValue) {
        self.entries.insert(key.to_owned(), value);
    }

    /// Reads one option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    /// String accessor.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(OptionValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// List accessor.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key) {
            Some(OptionValue::List(items)) => Some(items),
            _ => None,
        }
    }

    /// Iterates options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn encode_into(&self, hasher: &mut Hasher) {
        hasher.update(&(self.entries.len() as u64).to_le_bytes());
        for (key, value) in &self.entries {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            value.encode_into(hasher);
        }
    }
}

/// A set of fragment names, as declared by a rule class.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct FragmentSet {
    names: BTreeSet<String>,
}

impl FragmentSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from names.
    #[must_use]
    pub fn of(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
        }
    }

    /// Adds a name.
    pub fn insert(&mut self, name: &str) {
        self.names.insert(name.to_owned());
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Set union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            names: self.names.union(&other.names).cloned().collect(),
        }
    }

    /// True when no fragments are named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Immutable mapping from fragment name to fragment options.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct BuildOptions {
    fragments: BTreeMap<String, FragmentOptions>,
}

impl BuildOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one fragment.
    #[must_use]
    pub fn with_fragment(mut self, name: &str, options: FragmentOptions) -> Self {
        self.fragments.insert(name.to_owned(), options);
        self
    }

    /// Reads one fragment.
    #[must_use]
    pub fn fragment(&self, name: &str) -> Option<&FragmentOptions> {
        self.fragments.get(name)
    }

    /// Mutable access to one fragment, creating it when absent. Used by
    /// transitions, which own a scratch copy.
    pub fn fragment_mut(&mut self, name: &str) -> &mut FragmentOptions {
        self.fragments.entry(name.to_owned()).or_default()
    }

    /// Removes a fragment.
    pub fn remove_fragment(&mut self, name: &str) {
        self.fragments.remove(name);
    }

    /// Names of the fragments present.
    pub fn fragment_names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    /// True when `name` is present.
    #[must_use]
    pub fn has_fragment(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    /// Projection onto `kept`: the trimming primitive.
    #[must_use]
    pub fn project(&self, kept: &FragmentSet) -> Self {
        Self {
            fragments: self
                .fragments
                .iter()
                .filter(|(name, _)| kept.contains(name))
                .map(|(name, options)| (name.clone(), options.clone()))
                .collect(),
        }
    }

    /// Projection onto the complement of `kept`.
    #[must_use]
    pub fn project_out(&self, kept: &FragmentSet) -> Self {
        Self {
            fragments: self
                .fragments
                .iter()
                .filter(|(name, _)| !kept.contains(name))
                .map(|(name, options)| (name.clone(), options.clone()))
                .collect(),
        }
    }

    /// Canonical digest; the configuration key of these options.
    #[must_use]
    pub fn digest(&self) -> Digest {
        let mut hasher = Hasher::new();
        hasher.update(b"options:");
        hasher.update(&(self.fragments.len() as u64).to_le_bytes());
        for (name, options) in &self.fragments {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            options.encode_into(&mut hasher);
        }
        hasher.finalize().into()
    }
}

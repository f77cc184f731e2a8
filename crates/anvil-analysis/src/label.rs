// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Target labels and package identifiers.
//!
//! A label names one target globally: `(repository, package, name)`, written
//! `@repo//pkg:name`. Labels are immutable, cheap to clone (one `Arc`), and
//! totally ordered. Equality takes a pointer-identity fast path so interned
//! labels compare in O(1) on hot paths.

use std::sync::Arc;

use thiserror::Error;

/// Identifier of a package within a repository.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PackageId {
    /// Repository name; empty for the main repository.
    pub repo: Arc<str>,
    /// Package path relative to the repository root.
    pub package: Arc<str>,
}

impl PackageId {
    /// Builds a package id in the main repository.
    #[must_use]
    pub fn new(package: &str) -> Self {
        Self {
            repo: Arc::from(""),
            package: Arc::from(package),
        }
    }

    /// Builds a package id in an external repository.
    #[must_use]
    pub fn external(repo: &str, package: &str) -> Self {
        Self {
            repo: Arc::from(repo),
            package: Arc::from(package),
        }
    }
}

impl core::fmt::Display for PackageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.repo.is_empty() {
            write!(f, "//{}", self.package)
        } else {
            write!(f, "@{}//{}", self.repo, self.package)
        }
    }
}

/// Interned payload of a [`Label`].
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct LabelData {
    /// Repository name; empty for the main repository.
    pub repo: Arc<str>,
    /// Package path.
    pub package: Arc<str>,
    /// Target name within the package.
    pub name: Arc<str>,
}

/// A globally unique target identifier.
#[derive(Clone, Debug)]
pub struct Label(Arc<LabelData>);

impl Label {
    /// Builds a label from its three parts.
    #[must_use]
    pub fn new(repo: &str, package: &str, name: &str) -> Self {
        Self(Arc::new(LabelData {
            repo: Arc::from(repo),
            package: Arc::from(package),
            name: Arc::from(name),
        }))
    }

    /// Wraps already-interned label data.
    #[must_use]
    pub fn from_data(data: Arc<LabelData>) -> Self {
        Self(data)
    }

    /// Parses `//pkg:name`, `@repo//pkg:name`, or `//pkg` (name defaults to
    /// the last package segment).
    pub fn parse(text: &str) -> Result<Self, LabelError> {
        let (repo, rest) = match text.strip_prefix('@') {
            Some(after) => {
                let Some((repo, rest)) = after.split_once("//") else {
                    return Err(LabelError::MissingPackage(text.to_owned()));
                };
                (repo, rest)
            }
            None => match text.strip_prefix("//") {
                Some(rest) => ("", rest),
                None => return Err(LabelError::MissingPackage(text.to_owned())),
            },
        };
        let (package, name) = match rest.split_once(':') {
            Some((pkg, name)) => (pkg, name),
            None => {
                let default = rest.rsplit('/').next().unwrap_or(rest);
                (rest, default)
            }
        };
        if name.is_empty() {
            return Err(LabelError::EmptyName(text.to_owned()));
        }
        Ok(Self::new(repo, package, name))
    }

    /// The interned payload.
    #[must_use]
    pub fn data(&self) -> &Arc<LabelData> {
        &self.0
    }

    /// Repository name; empty for the main repository.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.0.repo
    }

    /// Package path.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.0.package
    }

    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The package this label lives in.
    #[must_use]
    pub fn package_id(&self) -> PackageId {
        PackageId {
            repo: Arc::clone(&self.0.repo),
            package: Arc::clone(&self.0.package),
        }
    }

    /// A sibling label in the same package.
    #[must_use]
    pub fn sibling(&self, name: &str) -> Self {
        Self(Arc::new(LabelData {
            repo: Arc::clone(&self.0.repo),
            package: Arc::clone(&self.0.package),
            name: Arc::from(name),
        }))
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        // Interned labels hit the pointer fast path.
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Label {}

impl std::hash::Hash for Label {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl core::fmt::Display for Label {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0.repo.is_empty() {
            write!(f, "//{}:{}", self.0.package, self.0.name)
        } else {
            write!(f, "@{}//{}:{}", self.0.repo, self.0.package, self.0.name)
        }
    }
}

/// Label parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// The text did not contain a `//`-rooted package path.
    #[error("label {0:?} has no //package part")]
    MissingPackage(String),
    /// The target name after `:` was empty.
    #[error("label {0:?} has an empty target name")]
    EmptyName(String),
}

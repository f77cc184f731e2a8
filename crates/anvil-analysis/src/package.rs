// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The package loader contract.
//!
//! Parsing build files is outside the core; the core requests packages
//! through a graph node backed by this trait and treats the result as
//! immutable.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::label::PackageId;
use crate::target::Target;

/// A parsed package.
#[derive(Clone, Debug)]
pub struct Package {
    /// The package's identity.
    pub id: PackageId,
    /// Targets by name.
    pub targets: BTreeMap<String, Target>,
    /// Path of the build file that produced this package.
    pub build_file: String,
    /// True when parsing recovered from errors; targets may be partial.
    pub contains_errors: bool,
}

impl Package {
    /// Looks up a target by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.build_file == other.build_file
            && self.contains_errors == other.contains_errors
            && self.targets == other.targets
    }
}

impl Eq for Package {}

/// Package load failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageError {
    /// The package does not exist or failed to parse fatally.
    #[error("no such package {0}: {1}")]
    NoSuchPackage(PackageId, String),
}

/// Collaborator that parses build files into packages.
///
/// Implementations must be deterministic between invalidations: the graph
/// memoizes results per version.
pub trait PackageLoader: Send + Sync {
    /// Loads one package.
    fn load(&self, id: &PackageId) -> Result<Arc<Package>, PackageError>;
}

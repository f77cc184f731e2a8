// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Platform incompatibility: direct (`target_compatible_with`) and indirect
//! (a required dependency is incompatible).

use std::sync::Arc;

use crate::attr::ConfiguredAttrs;
use crate::label::Label;
use crate::options::BuildOptions;
use crate::provider::{ProviderField, ProviderId, ProviderSet, ProviderStruct};
use crate::transition::PLATFORM_FRAGMENT;

/// Attribute naming the constraints a target requires from its platform.
pub const TARGET_COMPATIBLE_WITH: &str = "target_compatible_with";

/// Option (inside the platform fragment) listing the constraints the
/// current platform satisfies.
pub const PLATFORM_CONSTRAINTS_OPTION: &str = "constraints";

/// Name of the incompatibility marker provider.
pub const INCOMPATIBLE_PROVIDER: &str = "IncompatiblePlatformProvider";

/// Provider id marking incompatible targets.
#[must_use]
pub fn incompatible_provider_id() -> ProviderId {
    ProviderId::new(INCOMPATIBLE_PROVIDER)
}

/// Why a target is incompatible.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum IncompatibleReason {
    /// The target's own constraints are unsatisfied.
    UnsatisfiedConstraint(Label),
    /// A required dependency is incompatible.
    IncompatibleDependency(Label),
}

impl IncompatibleReason {
    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::UnsatisfiedConstraint(constraint) => {
                format!("platform does not satisfy {constraint}")
            }
            Self::IncompatibleDependency(dep) => {
                format!("dependency {dep} is incompatible")
            }
        }
    }
}

/// Marker provider set for an incompatible target.
#[must_use]
pub fn incompatible_providers(reason: &IncompatibleReason) -> ProviderSet {
    let mut providers = ProviderSet::new();
    // A fresh set cannot already contain the marker.
    let _ = providers.insert(
        incompatible_provider_id(),
        Arc::new(ProviderStruct::new().with("reason", ProviderField::Str(reason.describe()))),
    );
    providers
}

/// Constraints satisfied by the platform of `options`.
fn platform_constraints(options: &BuildOptions) -> Vec<String> {
    options
        .fragment(PLATFORM_FRAGMENT)
        .and_then(|f| f.get_list(PLATFORM_CONSTRAINTS_OPTION))
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}

/// Direct-incompatibility check: the first constraint in
/// `target_compatible_with` the platform does not satisfy, if any.
#[must_use]
pub fn unsatisfied_constraint(
    attrs: &ConfiguredAttrs,
    options: &BuildOptions,
) -> Option<Label> {
    let required = attrs.labels(TARGET_COMPATIBLE_WITH);
    if required.is_empty() {
        return None;
    }
    let satisfied = platform_constraints(options);
    required
        .into_iter()
        .find(|constraint| !satisfied.iter().any(|s| s == &constraint.to_string()))
}

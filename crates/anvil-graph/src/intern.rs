// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Lock-striped content interning.
//!
//! Labels, configurations, and provider ids are interned once and compared by
//! pointer on hot paths. The table is striped so concurrent interning from
//! the worker pool does not serialize on one lock. Interners hold strong
//! references; entries live for the evaluator's lifetime (graph version),
//! which matches the lifecycle of everything interned through them.

use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashSet};

const STRIPES: usize = 16;

/// Content interner returning shared [`Arc`] handles.
pub struct Interner<T> {
    stripes: Box<[RwLock<FxHashSet<Arc<T>>>]>,
    hasher: FxBuildHasher,
}

impl<T: Hash + Eq> Interner<T> {
    /// Creates an empty interner.
    #[must_use]
    pub fn new() -> Self {
        let stripes = (0..STRIPES)
            .map(|_| RwLock::new(FxHashSet::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            stripes,
            hasher: FxBuildHasher,
        }
    }

    fn stripe_of(&self, value: &T) -> usize {
        (self.hasher.hash_one(value) as usize) % STRIPES
    }

    /// Returns the canonical handle for `value`, inserting it if new.
    ///
    /// Two calls with equal values return handles for which
    /// [`Arc::ptr_eq`] holds.
    pub fn intern(&self, value: T) -> Arc<T> {
        let stripe = &self.stripes[self.stripe_of(&value)];
        if let Some(existing) = stripe.read().get(&value) {
            return Arc::clone(existing);
        }
        let mut guard = stripe.write();
        if let Some(existing) = guard.get(&value) {
            return Arc::clone(existing);
        }
        let fresh = Arc::new(value);
        guard.insert(Arc::clone(&fresh));
        fresh
    }

    /// Returns the canonical handle for `value` without inserting.
    #[must_use]
    pub fn get(&self, value: &T) -> Option<Arc<T>> {
        let stripe = &self.stripes[self.stripe_of(value)];
        stripe.read().get(value).map(Arc::clone)
    }

    /// Total number of interned values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.read().len()).sum()
    }

    /// True when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Hash + Eq> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for Interner<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_one_allocation() {
        let interner: Interner<String> = Interner::new();
        let a = interner.intern("//pkg:name".to_owned());
        let b = interner.intern("//pkg:name".to_owned());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_values_do_not_alias() {
        let interner: Interner<u64> = Interner::new();
        let a = interner.intern(1);
        let b = interner.intern(2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(interner.get(&1).map(|v| *v), Some(1));
        assert_eq!(interner.get(&3), None);
    }
}

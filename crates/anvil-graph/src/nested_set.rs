// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Persistent, structure-sharing nested sets.
//!
//! A [`NestedSet`] is an immutable tree whose leaves hold elements and whose
//! branches share substructure by `Arc`. Concatenating two sets is O(1) and
//! does not copy either side, which is what makes transitive aggregates
//! (root-cause sets, transitive package sets) affordable across a deep graph.
//!
//! Iteration visits elements in first-seen pre-order and de-duplicates by
//! value, so a set that shares a subtree along two paths reports each element
//! once.

use std::sync::Arc;

use rustc_hash::FxHashSet;

/// Immutable set with O(1) concatenation and shared substructure.
#[derive(Debug, Clone)]
pub struct NestedSet<T>(Repr<T>);

#[derive(Debug, Clone)]
enum Repr<T> {
    Empty,
    Leaf(Arc<[T]>),
    Branch(Arc<[NestedSet<T>]>),
}

impl<T> NestedSet<T> {
    /// Returns the empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self(Repr::Empty)
    }

    /// Returns a set holding exactly `value`.
    #[must_use]
    pub fn singleton(value: T) -> Self {
        Self(Repr::Leaf(Arc::from(vec![value])))
    }

    /// Builds a leaf set from a vector of direct elements.
    ///
    /// An empty vector yields the canonical empty set, so `is_empty` stays a
    /// structural check.
    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        if values.is_empty() {
            Self(Repr::Empty)
        } else {
            Self(Repr::Leaf(Arc::from(values)))
        }
    }

    /// Concatenates `children` without copying their elements.
    ///
    /// Empty children are skipped; a single surviving child is returned
    /// as-is rather than wrapped.
    #[must_use]
    pub fn concat(children: impl IntoIterator<Item = Self>) -> Self {
        let mut kept: Vec<Self> = children
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect();
        match kept.len() {
            0 => Self(Repr::Empty),
            1 => match kept.pop() {
                Some(only) => only,
                None => Self(Repr::Empty),
            },
            _ => Self(Repr::Branch(Arc::from(kept))),
        }
    }

    /// Returns `true` when the set holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.0, Repr::Empty)
    }
}

impl<T: Eq + std::hash::Hash> NestedSet<T> {
    /// Iterates elements in first-seen pre-order, de-duplicated by value.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![self],
            seen: FxHashSet::default(),
        }
    }

    /// Number of distinct elements.
    #[must_use]
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the set contains `value`.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|v| v == value)
    }
}

impl<T: Eq + std::hash::Hash + Clone> NestedSet<T> {
    /// Flattens into a vector, preserving first-seen order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Eq + std::hash::Hash> PartialEq for NestedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl<T: Eq + std::hash::Hash> Eq for NestedSet<T> {}

impl<T> Default for NestedSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> FromIterator<T> for NestedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// De-duplicating pre-order iterator over a [`NestedSet`].
pub struct Iter<'a, T> {
    stack: Vec<&'a NestedSet<T>>,
    seen: FxHashSet<&'a T>,
}

impl<'a, T: Eq + std::hash::Hash> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            let set = self.stack.pop()?;
            match &set.0 {
                Repr::Empty => {}
                Repr::Leaf(values) => {
                    // Re-push the leaf so multi-element leaves yield one
                    // element per `next` call; `seen` skips what was taken.
                    let mut fresh = None;
                    for v in values.iter() {
                        if self.seen.insert(v) {
                            fresh = Some(v);
                            break;
                        }
                    }
                    if let Some(v) = fresh {
                        self.stack.push(set);
                        return Some(v);
                    }
                }
                Repr::Branch(children) => {
                    for child in children.iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_shares_and_dedups() {
        let shared = NestedSet::from_vec(vec!["a", "b"]);
        let left = NestedSet::concat([shared.clone(), NestedSet::singleton("c")]);
        let right = NestedSet::concat([NestedSet::singleton("d"), shared]);
        let all = NestedSet::concat([left, right]);
        assert_eq!(all.to_vec(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn first_seen_order_is_preserved() {
        let s = NestedSet::concat([
            NestedSet::from_vec(vec![3, 1]),
            NestedSet::from_vec(vec![1, 2, 3]),
        ]);
        assert_eq!(s.to_vec(), vec![3, 1, 2]);
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn empty_collapses_structurally() {
        let e: NestedSet<u8> = NestedSet::concat([NestedSet::empty(), NestedSet::from_vec(vec![])]);
        assert!(e.is_empty());
        let one = NestedSet::concat([NestedSet::empty(), NestedSet::singleton(7)]);
        assert_eq!(one.to_vec(), vec![7]);
    }

    #[test]
    fn equality_is_by_iteration_sequence() {
        let a = NestedSet::concat([NestedSet::singleton(1), NestedSet::singleton(2)]);
        let b = NestedSet::from_vec(vec![1, 2, 1]);
        assert_eq!(a, b);
    }
}

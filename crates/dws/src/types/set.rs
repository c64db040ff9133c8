//! Set payloads.
//!
//! Sets use bitmask storage when the element enum has at most 64 values and a
//! hashed set otherwise. Union, intersection, difference, membership, and
//! ordered iteration behave identically under both representations.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::typereg::TypeId;

/// Maximum enum cardinality representable as a bitmask.
pub(crate) const BITSET_MAX: usize = 64;

/// Backing storage for a set value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum SetStorage {
    /// One bit per ordinal; ordinal `n` is bit `n`.
    Bits(u64),
    /// Arbitrary ordinals.
    Hash(AHashSet<i64>),
}

/// A set value: element type plus storage.
///
/// Sets have value semantics; assignment copies the storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SetObj {
    pub elem: TypeId,
    pub storage: SetStorage,
}

impl SetObj {
    /// Creates an empty set, choosing storage by element cardinality.
    pub fn empty(elem: TypeId, cardinality: usize) -> Self {
        let storage = if cardinality <= BITSET_MAX {
            SetStorage::Bits(0)
        } else {
            SetStorage::Hash(AHashSet::new())
        };
        Self { elem, storage }
    }

    pub fn insert(&mut self, ordinal: i64) {
        match &mut self.storage {
            SetStorage::Bits(bits) => {
                debug_assert!((0..BITSET_MAX as i64).contains(&ordinal));
                *bits |= 1u64 << ordinal;
            }
            SetStorage::Hash(set) => {
                set.insert(ordinal);
            }
        }
    }

    pub fn remove(&mut self, ordinal: i64) {
        match &mut self.storage {
            SetStorage::Bits(bits) => {
                if (0..BITSET_MAX as i64).contains(&ordinal) {
                    *bits &= !(1u64 << ordinal);
                }
            }
            SetStorage::Hash(set) => {
                set.remove(&ordinal);
            }
        }
    }

    pub fn contains(&self, ordinal: i64) -> bool {
        match &self.storage {
            SetStorage::Bits(bits) => (0..BITSET_MAX as i64).contains(&ordinal) && bits & (1u64 << ordinal) != 0,
            SetStorage::Hash(set) => set.contains(&ordinal),
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            SetStorage::Bits(bits) => bits.count_ones() as usize,
            SetStorage::Hash(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordinals in ascending order; identical for both storage kinds.
    pub fn iter_sorted(&self) -> Vec<i64> {
        match &self.storage {
            SetStorage::Bits(bits) => {
                let mut out = Vec::with_capacity(bits.count_ones() as usize);
                for ordinal in 0..BITSET_MAX as i64 {
                    if bits & (1u64 << ordinal) != 0 {
                        out.push(ordinal);
                    }
                }
                out
            }
            SetStorage::Hash(set) => {
                let mut out: Vec<i64> = set.iter().copied().collect();
                out.sort_unstable();
                out
            }
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        match (&self.storage, &other.storage) {
            (SetStorage::Bits(a), SetStorage::Bits(b)) => Self {
                elem: self.elem,
                storage: SetStorage::Bits(a | b),
            },
            _ => self.hash_op(other, |a, b| a.union(b).copied().collect()),
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        match (&self.storage, &other.storage) {
            (SetStorage::Bits(a), SetStorage::Bits(b)) => Self {
                elem: self.elem,
                storage: SetStorage::Bits(a & b),
            },
            _ => self.hash_op(other, |a, b| a.intersection(b).copied().collect()),
        }
    }

    pub fn difference(&self, other: &Self) -> Self {
        match (&self.storage, &other.storage) {
            (SetStorage::Bits(a), SetStorage::Bits(b)) => Self {
                elem: self.elem,
                storage: SetStorage::Bits(a & !b),
            },
            _ => self.hash_op(other, |a, b| a.difference(b).copied().collect()),
        }
    }

    fn hash_op(&self, other: &Self, op: impl FnOnce(&AHashSet<i64>, &AHashSet<i64>) -> AHashSet<i64>) -> Self {
        let a = self.to_hash();
        let b = other.to_hash();
        Self {
            elem: self.elem,
            storage: SetStorage::Hash(op(&a, &b)),
        }
    }

    fn to_hash(&self) -> AHashSet<i64> {
        match &self.storage {
            SetStorage::Bits(_) => self.iter_sorted().into_iter().collect(),
            SetStorage::Hash(set) => set.clone(),
        }
    }

    /// Content equality, independent of storage representation.
    pub fn set_eq(&self, other: &Self) -> bool {
        match (&self.storage, &other.storage) {
            (SetStorage::Bits(a), SetStorage::Bits(b)) => a == b,
            _ => self.to_hash() == other.to_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typereg::TypeId;

    fn bits(ordinals: &[i64]) -> SetObj {
        let mut s = SetObj::empty(TypeId::INTEGER, 64);
        for &o in ordinals {
            s.insert(o);
        }
        s
    }

    fn hashed(ordinals: &[i64]) -> SetObj {
        let mut s = SetObj::empty(TypeId::INTEGER, 200);
        for &o in ordinals {
            s.insert(o);
        }
        s
    }

    #[test]
    fn storage_choice_follows_cardinality() {
        assert!(matches!(SetObj::empty(TypeId::INTEGER, 64).storage, SetStorage::Bits(_)));
        assert!(matches!(SetObj::empty(TypeId::INTEGER, 65).storage, SetStorage::Hash(_)));
    }

    #[test]
    fn representations_agree_on_operations() {
        let ops: Vec<i64> = vec![0, 2, 4, 63];
        let other: Vec<i64> = vec![2, 3, 63];
        let (a1, b1) = (bits(&ops), bits(&other));
        let (a2, b2) = (hashed(&ops), hashed(&other));
        assert_eq!(a1.union(&b1).iter_sorted(), a2.union(&b2).iter_sorted());
        assert_eq!(
            a1.intersection(&b1).iter_sorted(),
            a2.intersection(&b2).iter_sorted()
        );
        assert_eq!(
            a1.difference(&b1).iter_sorted(),
            a2.difference(&b2).iter_sorted()
        );
        assert!(a1.set_eq(&a2));
        assert_eq!(a1.contains(4), a2.contains(4));
        assert_eq!(a1.contains(5), a2.contains(5));
    }

    #[test]
    fn even_odd_partition() {
        let evens: Vec<i64> = (0..64).step_by(2).collect();
        let odds: Vec<i64> = (1..64).step_by(2).collect();
        let a = bits(&evens);
        let b = bits(&odds);
        assert_eq!(a.union(&b).len(), 64);
        assert!(a.intersection(&b).is_empty());
        assert!(a.difference(&b).set_eq(&a));
        assert!(a.contains(4));
        assert!(!a.contains(5));
    }
}

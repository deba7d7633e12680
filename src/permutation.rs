//! Permutation Utilities
//!
//! Reorder notifications describe a move of every element from its old index
//! to a new one. A permutation `perm` satisfies `new[perm[i]] == old[i]`,
//! i.e. the element originally at index `i` moves to index `perm[i]`.
//!
//! ```text
//! old:  [ a  b  c ]          perm = [2, 0, 1]
//! new:  [ b  c  a ]          a: 0 -> 2, b: 1 -> 0, c: 2 -> 1
//! ```
//!
//! An order-preserving result is reported as `None` so callers can skip the
//! notification entirely.

use core::fmt::Debug;
use core::hash::Hash;

use crate::error::ChildrenError;
use crate::HashMap;

/// Computes the permutation that turns `old` into `new`.
///
/// Returns `Ok(None)` when both orderings are identical and an error when
/// they do not hold the same elements.
///
/// # Example
///
/// ```
/// use keyed_children::permutation::compute_permutation;
///
/// let perm = compute_permutation(&["a", "b", "c"], &["b", "c", "a"]).unwrap();
/// assert_eq!(perm, Some(vec![2, 0, 1]));
/// assert_eq!(compute_permutation(&[1, 2], &[1, 2]).unwrap(), None);
/// ```
pub fn compute_permutation<T>(old: &[T], new: &[T]) -> Result<Option<Vec<usize>>, ChildrenError>
where
    T: Hash + Eq + Debug,
{
    if old.len() != new.len() {
        return Err(ChildrenError::permutation_mismatch(old, new));
    }

    let positions: HashMap<&T, usize> = new.iter().enumerate().map(|(i, v)| (v, i)).collect();
    if positions.len() != new.len() {
        // duplicates in `new` would make the mapping ambiguous
        return Err(ChildrenError::permutation_mismatch(old, new));
    }

    let mut perm = Vec::with_capacity(old.len());
    let mut identity = true;
    for (i, item) in old.iter().enumerate() {
        let Some(&target) = positions.get(item) else {
            return Err(ChildrenError::permutation_mismatch(old, new));
        };
        identity &= target == i;
        perm.push(target);
    }

    if identity {
        Ok(None)
    } else {
        Ok(Some(perm))
    }
}

/// Applies `perm` to `items`, moving the element at index `i` to `perm[i]`.
///
/// # Panics
///
/// Panics if `perm` is not a permutation of `0..items.len()`.
pub fn apply_permutation<T: Clone>(items: &[T], perm: &[usize]) -> Vec<T> {
    assert_eq!(items.len(), perm.len(), "permutation size mismatch");
    let mut out: Vec<Option<T>> = vec![None; items.len()];
    for (i, &target) in perm.iter().enumerate() {
        assert!(out[target].is_none(), "index {target} targeted twice");
        out[target] = Some(items[i].clone());
    }
    out.into_iter().flatten().collect()
}

/// Whether `perm` maps every index onto itself.
#[inline]
pub fn is_identity(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| i == p)
}

/// Normalizes a sparse move table into a dense permutation.
///
/// `moves[i] == 0` means "unchanged", any other value is the new position
/// plus one. Returns `None` when nothing moves.
pub(crate) fn normalize_moves(mut moves: Vec<usize>) -> Option<Vec<usize>> {
    let mut moved = false;
    for (i, slot) in moves.iter_mut().enumerate() {
        if *slot == 0 {
            *slot = i;
        } else {
            *slot -= 1;
            moved |= *slot != i;
        }
    }
    if moved {
        Some(moves)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_returns_none() {
        assert_eq!(compute_permutation(&["x", "y", "z"], &["x", "y", "z"]).unwrap(), None);
        assert_eq!(compute_permutation::<u8>(&[], &[]).unwrap(), None);
    }

    #[test]
    fn test_swap() {
        let perm = compute_permutation(&[1, 2], &[2, 1]).unwrap().unwrap();
        assert_eq!(perm, vec![1, 0]);
        assert_eq!(apply_permutation(&[1, 2], &perm), vec![2, 1]);
    }

    #[test]
    fn test_missing_element_is_error() {
        let err = compute_permutation(&["a", "b"], &["a", "c"]).unwrap_err();
        assert!(matches!(err, ChildrenError::PermutationMismatch { old_len: 2, new_len: 2, .. }));
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(compute_permutation(&[1, 2, 3], &[1, 2]).is_err());
    }

    #[test]
    fn test_normalize_moves() {
        // element 0 moves to 2, element 2 moves to 0, element 1 stays
        assert_eq!(normalize_moves(vec![3, 0, 1]), Some(vec![2, 1, 0]));
        assert_eq!(normalize_moves(vec![0, 0, 0]), None);
        // explicit "moved to same place" still counts as unchanged
        assert_eq!(normalize_moves(vec![1, 2]), None);
    }

    #[test]
    fn test_is_identity() {
        assert!(is_identity(&[0, 1, 2]));
        assert!(!is_identity(&[1, 0]));
    }

    proptest! {
        #[test]
        fn prop_permutation_reconstructs_new(seed in proptest::collection::vec(any::<u32>(), 0..40)) {
            let old: Vec<usize> = (0..seed.len()).collect();
            let mut new = old.clone();
            // deterministic shuffle driven by the generated seed
            for (i, s) in seed.iter().enumerate() {
                let j = (*s as usize) % new.len();
                new.swap(i, j);
            }
            match compute_permutation(&old, &new).unwrap() {
                None => prop_assert_eq!(&old, &new),
                Some(perm) => prop_assert_eq!(apply_permutation(&old, &perm), new),
            }
        }

        #[test]
        fn prop_order_preserving_is_none(len in 0usize..50) {
            let items: Vec<String> = (0..len).map(|i| format!("n{i}")).collect();
            prop_assert_eq!(compute_permutation(&items, &items.clone()).unwrap(), None);
        }
    }
}

//! Duplicate-Key Disambiguation
//!
//! A key set may legally contain the same key more than once. Every occurrence
//! must still map to its own node, so each occurrence is wrapped in a
//! [`Dupl`] carrying an occurrence counter:
//!
//! ```text
//! keys:   [ a,      b,      a,      a      ]
//! dupls:  [ (a,0),  (b,0),  (a,1),  (a,2)  ]
//! ```
//!
//! Two `Dupl`s are equal only when both the key and the counter match, so the
//! second `a` of one key set lines up with the second `a` of the next one. The
//! hash only covers the key, which keeps `Hash` consistent with `Eq`.
//!
//! ```
//! use keyed_children::Dupl;
//!
//! let dupls = Dupl::disambiguate(vec!["a", "b", "a"]);
//! assert_eq!(dupls[2].key(), &"a");
//! assert_eq!(dupls[2].count(), 1);
//! assert_ne!(dupls[0], dupls[2]);
//! ```

use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};

use crate::error::ChildrenError;
use crate::HashMap;

/// Key sets at or above this size skip the pairwise `Eq`/`Hash` check.
const CONTRACT_CHECK_LIMIT: usize = 10;

/// One occurrence of a key inside a key set.
#[derive(Clone)]
pub struct Dupl<K> {
    key: K,
    count: usize,
}

impl<K> Dupl<K> {
    /// Wraps the first occurrence of `key`.
    pub fn new(key: K) -> Self {
        Dupl { key, count: 0 }
    }

    /// Wraps `key` as its `count`-th repeated occurrence.
    pub fn with_count(key: K, count: usize) -> Self {
        Dupl { key, count }
    }

    /// The original key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// How many equal keys precede this one in its key set.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the same key as the next repeated occurrence.
    pub fn wrap(self) -> Self {
        Dupl {
            key: self.key,
            count: self.count + 1,
        }
    }

    /// Recovers the original key.
    pub fn unwrap(self) -> K {
        self.key
    }
}

impl<K: Hash + Eq + Clone> Dupl<K> {
    /// Wraps every key of an ordered key set, numbering repeated occurrences.
    pub fn disambiguate<I>(keys: I) -> Vec<Dupl<K>>
    where
        I: IntoIterator<Item = K>,
    {
        let keys = keys.into_iter();
        let mut seen: HashMap<K, usize> = HashMap::with_capacity(keys.size_hint().0);
        let mut out = Vec::with_capacity(keys.size_hint().0);
        for key in keys {
            // optimized for the first occurrence, repeats are rare
            match seen.get_mut(&key) {
                None => {
                    seen.insert(key.clone(), 0);
                    out.push(Dupl::new(key));
                }
                Some(cnt) => {
                    *cnt += 1;
                    out.push(Dupl::with_count(key, *cnt));
                }
            }
        }
        out
    }
}

/// Checks small key sets for keys that compare equal but hash differently.
///
/// Such keys silently corrupt the diff, so they are rejected up front. Large
/// key sets are not checked since the check is quadratic.
pub fn check_key_contract<K, S>(keys: &[K], hasher: &S) -> Result<(), ChildrenError>
where
    K: Hash + Eq + fmt::Debug,
    S: BuildHasher,
{
    if keys.len() >= CONTRACT_CHECK_LIMIT {
        return Ok(());
    }
    for (i, a) in keys.iter().enumerate() {
        for b in &keys[i + 1..] {
            if a == b && hasher.hash_one(a) != hasher.hash_one(b) {
                return Err(ChildrenError::BrokenKeyContract {
                    first: format!("{a:?}"),
                    second: format!("{b:?}"),
                });
            }
        }
    }
    Ok(())
}

impl<K: PartialEq> PartialEq for Dupl<K> {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && self.key == other.key
    }
}

impl<K: Eq> Eq for Dupl<K> {}

impl<K: Hash> Hash for Dupl<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<K: fmt::Debug> fmt::Debug for Dupl<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "{:?}", self.key)
        } else {
            write!(f, "{:?}#{}", self.key, self.count)
        }
    }
}

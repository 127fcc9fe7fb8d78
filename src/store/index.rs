/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    hash::Hash,
};

use crate::node::Fingerprint;

/// Ordered index of `(key, fingerprint)` pairs. Ties on the key are broken
/// by fingerprint so every entry is unique. Use `std::cmp::Reverse` for a
/// descending order.
#[derive(Debug)]
pub struct SortedIndex<K: Ord> {
    entries: BTreeSet<(K, Fingerprint)>,
}

impl<K: Ord + Copy> SortedIndex<K> {
    pub fn new() -> Self {
        Self { entries: BTreeSet::new() }
    }

    pub fn insert(&mut self, key: K, fp: Fingerprint) -> bool {
        self.entries.insert((key, fp))
    }

    pub fn remove(&mut self, key: K, fp: Fingerprint) -> bool {
        self.entries.remove(&(key, fp))
    }

    pub fn contains(&self, key: K, fp: Fingerprint) -> bool {
        self.entries.contains(&(key, fp))
    }

    /// Fingerprints in ascending key order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Fingerprint> + '_ {
        self.entries.iter().map(|(_, fp)| *fp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Maps a discrete attribute value to the fingerprints sharing it.
/// Empty buckets are dropped.
#[derive(Debug)]
pub struct BucketIndex<K: Hash + Eq> {
    buckets: HashMap<K, HashSet<Fingerprint>>,
}

impl<K: Hash + Eq + Copy> BucketIndex<K> {
    pub fn new() -> Self {
        Self { buckets: HashMap::new() }
    }

    pub fn insert(&mut self, key: K, fp: Fingerprint) -> bool {
        self.buckets.entry(key).or_default().insert(fp)
    }

    pub fn remove(&mut self, key: K, fp: Fingerprint) -> bool {
        let Some(bucket) = self.buckets.get_mut(&key) else { return false };
        let removed = bucket.remove(&fp);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        removed
    }

    pub fn contains(&self, key: &K, fp: Fingerprint) -> bool {
        self.buckets.get(key).is_some_and(|b| b.contains(&fp))
    }

    pub fn get(&self, key: &K) -> Option<&HashSet<Fingerprint>> {
        self.buckets.get(key)
    }

    /// Total number of entries over all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    /// Every `(key, fingerprint)` pair held
    pub fn iter(&self) -> impl Iterator<Item = (&K, Fingerprint)> {
        self.buckets.iter().flat_map(|(k, fps)| fps.iter().map(move |fp| (k, *fp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn sorted_index_orders_by_key_then_fingerprint() {
        let mut idx = SortedIndex::new();
        idx.insert(30u16, 1);
        idx.insert(10, 2);
        idx.insert(10, 3);
        idx.insert(20, 4);
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![2, 3, 4, 1]);
        assert_eq!(idx.iter().rev().next(), Some(1));

        assert!(idx.remove(10, 3));
        assert!(!idx.remove(10, 3));
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn reverse_key_sorts_descending() {
        let mut idx = SortedIndex::new();
        idx.insert(Reverse(100u32), 1);
        idx.insert(Reverse(300), 2);
        idx.insert(Reverse(200), 3);
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[test]
    fn bucket_index_drops_empty_buckets() {
        let mut idx = BucketIndex::new();
        assert!(idx.insert(7u16, 1));
        assert!(idx.insert(7, 2));
        assert!(idx.insert(8, 3));
        assert_eq!(idx.len(), 3);

        assert!(idx.remove(7, 1));
        assert!(idx.remove(7, 2));
        assert!(idx.get(&7).is_none());
        assert!(!idx.remove(7, 2));
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![(&8, 3)]);
    }
}

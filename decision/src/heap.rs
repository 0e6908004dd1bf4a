//! Binary heap of keys with position tracking.
//!
//! Unlike `std::collections::BinaryHeap`, entries can be repositioned or
//! removed by key after their priority changes. The ordering is supplied on
//! every call as a `before(a, b)` predicate; the key at the top is one that
//! no other key comes before.

use std::collections::HashMap;
use std::hash::Hash;

pub struct IndexedHeap<K> {
    items: Vec<K>,
    positions: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash> IndexedHeap<K> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn peek(&self) -> Option<&K> {
        self.items.first()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.iter()
    }

    /// Insert `key`, or reposition it if already present.
    pub fn push<F>(&mut self, key: K, before: F)
    where
        F: Fn(&K, &K) -> bool,
    {
        if self.contains(&key) {
            self.update(&key, before);
            return;
        }
        let idx = self.items.len();
        self.items.push(key);
        self.positions.insert(key, idx);
        self.sift_up(idx, &before);
    }

    /// Restore heap order after the priority of `key` changed.
    pub fn update<F>(&mut self, key: &K, before: F)
    where
        F: Fn(&K, &K) -> bool,
    {
        if let Some(&idx) = self.positions.get(key) {
            let idx = self.sift_up(idx, &before);
            self.sift_down(idx, &before);
        }
    }

    pub fn pop<F>(&mut self, before: F) -> Option<K>
    where
        F: Fn(&K, &K) -> bool,
    {
        let top = *self.items.first()?;
        self.remove_at(0, &before);
        Some(top)
    }

    pub fn remove<F>(&mut self, key: &K, before: F) -> bool
    where
        F: Fn(&K, &K) -> bool,
    {
        match self.positions.get(key) {
            Some(&idx) => {
                self.remove_at(idx, &before);
                true
            }
            None => false,
        }
    }

    fn remove_at<F>(&mut self, idx: usize, before: &F)
    where
        F: Fn(&K, &K) -> bool,
    {
        let last = self.items.len() - 1;
        self.swap(idx, last);
        if let Some(removed) = self.items.pop() {
            self.positions.remove(&removed);
        }
        if idx < self.items.len() {
            let idx = self.sift_up(idx, before);
            self.sift_down(idx, before);
        }
    }

    fn sift_up<F>(&mut self, mut idx: usize, before: &F) -> usize
    where
        F: Fn(&K, &K) -> bool,
    {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !before(&self.items[idx], &self.items[parent]) {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
        idx
    }

    fn sift_down<F>(&mut self, mut idx: usize, before: &F)
    where
        F: Fn(&K, &K) -> bool,
    {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut best = idx;
            if left < len && before(&self.items[left], &self.items[best]) {
                best = left;
            }
            if right < len && before(&self.items[right], &self.items[best]) {
                best = right;
            }
            if best == idx {
                return;
            }
            self.swap(idx, best);
            idx = best;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.items.swap(a, b);
        self.positions.insert(self.items[a], a);
        self.positions.insert(self.items[b], b);
    }
}

impl<K: Copy + Eq + Hash> Default for IndexedHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn greater(scores: &HashMap<u32, i64>) -> impl Fn(&u32, &u32) -> bool + '_ {
        move |a, b| scores[a] > scores[b]
    }

    #[test]
    fn pops_in_priority_order() {
        let scores: HashMap<u32, i64> = [(1, 5), (2, 9), (3, 1), (4, 7)].into();
        let mut heap = IndexedHeap::new();
        for k in [1, 2, 3, 4] {
            heap.push(k, greater(&scores));
        }
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop(greater(&scores))).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn update_repositions_after_priority_change() {
        let mut scores: HashMap<u32, i64> = [(1, 5), (2, 9), (3, 1)].into();
        let mut heap = IndexedHeap::new();
        for k in [1, 2, 3] {
            heap.push(k, greater(&scores));
        }
        scores.insert(3, 100);
        heap.update(&3, greater(&scores));
        assert_eq!(heap.peek(), Some(&3));

        scores.insert(3, -1);
        heap.update(&3, greater(&scores));
        assert_eq!(heap.peek(), Some(&2));
    }

    #[test]
    fn remove_by_key() {
        let scores: HashMap<u32, i64> = (0..20).map(|k| (k, (k as i64 * 7) % 13)).collect();
        let mut heap = IndexedHeap::new();
        for k in 0..20 {
            heap.push(k, greater(&scores));
        }
        assert!(heap.remove(&5, greater(&scores)));
        assert!(!heap.remove(&5, greater(&scores)));
        assert!(!heap.contains(&5));
        assert_eq!(heap.len(), 19);

        let mut last = i64::MAX;
        while let Some(k) = heap.pop(greater(&scores)) {
            assert!(scores[&k] <= last);
            last = scores[&k];
        }
    }

    #[test]
    fn push_twice_keeps_one_entry() {
        let scores: HashMap<u32, i64> = [(1, 1)].into();
        let mut heap = IndexedHeap::new();
        heap.push(1, greater(&scores));
        heap.push(1, greater(&scores));
        assert_eq!(heap.len(), 1);
    }
}

//! Cost-bounded chunk store with least-recently-used eviction.
//!
//! Entries live in a dense node vector linked into a recency list
//! (head = most recent, tail = least recent) and are located through a hash
//! map, so lookup, touch, insert and evict are all O(1). Removal swaps the
//! last node into the freed slot and patches its neighbours.
//!
//! The store itself is not synchronized; the controller keeps it behind a
//! single mutex.

use ahash::AHashMap;
use mapview_common::ChunkKey;
use std::sync::Arc;

use crate::chunk::Chunk;

/// Cost charged for every resident chunk.
pub const UNIT_COST: usize = 1;

/// Sentinel for "no node".
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    key: ChunkKey,
    chunk: Arc<Chunk>,
    prev: usize,
    next: usize,
}

/// Mapping from chunk key to chunk with a cost budget.
#[derive(Debug)]
pub struct CacheStore {
    /// Key to node position
    index: AHashMap<ChunkKey, usize>,
    /// Dense node storage
    nodes: Vec<Node>,
    /// Most recently used node
    head: usize,
    /// Least recently used node
    tail: usize,
    /// Sum of resident chunk costs
    current_cost: usize,
    /// Budget
    max_cost: usize,
    /// Total entries evicted over the store's lifetime
    evictions: u64,
}

impl CacheStore {
    /// Creates an empty store with the given budget.
    #[must_use]
    pub fn new(max_cost: usize) -> Self {
        Self {
            index: AHashMap::new(),
            nodes: Vec::new(),
            head: NIL,
            tail: NIL,
            current_cost: 0,
            max_cost,
            evictions: 0,
        }
    }

    /// Looks up a chunk and marks it most recently used.
    pub fn get(&mut self, key: ChunkKey) -> Option<Arc<Chunk>> {
        let idx = *self.index.get(&key)?;
        self.touch(idx);
        Some(Arc::clone(&self.nodes[idx].chunk))
    }

    /// Looks up a chunk without changing recency.
    #[must_use]
    pub fn peek(&self, key: ChunkKey) -> Option<&Arc<Chunk>> {
        self.index.get(&key).map(|&idx| &self.nodes[idx].chunk)
    }

    /// Returns whether a chunk is resident.
    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Inserts an unloaded placeholder and evicts down to the budget.
    ///
    /// The new entry is never evicted by this call. With a budget smaller
    /// than one chunk it stays resident alone until the next insert or
    /// budget change. If the key is already resident the existing chunk is
    /// touched and returned instead.
    pub fn insert_placeholder(&mut self, key: ChunkKey) -> Arc<Chunk> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let chunk = Arc::new(Chunk::placeholder(key));
        self.admit(key, Arc::clone(&chunk));
        chunk
    }

    /// Re-admits a chunk that was evicted while its load was in flight.
    ///
    /// Follows the same eviction rules as [`insert_placeholder`](Self::insert_placeholder).
    pub fn reinsert(&mut self, chunk: Arc<Chunk>) {
        let key = chunk.key();
        if let Some(&idx) = self.index.get(&key) {
            self.touch(idx);
            return;
        }
        self.admit(key, chunk);
    }

    /// Updates the budget and evicts immediately until compliant.
    ///
    /// Returns the number of entries evicted.
    pub fn set_max_cost(&mut self, max_cost: usize) -> usize {
        self.max_cost = max_cost;
        self.evict_to_budget(None)
    }

    /// Removes every entry and resets the cost.
    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.head = NIL;
        self.tail = NIL;
        self.current_cost = 0;
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of resident chunk costs.
    #[must_use]
    pub const fn current_cost(&self) -> usize {
        self.current_cost
    }

    /// Current budget.
    #[must_use]
    pub const fn max_cost(&self) -> usize {
        self.max_cost
    }

    /// Total entries evicted so far.
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Resident keys, most recently used first.
    #[must_use]
    pub fn keys_by_recency(&self) -> Vec<ChunkKey> {
        let mut keys = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while cursor != NIL {
            let node = &self.nodes[cursor];
            keys.push(node.key);
            cursor = node.next;
        }
        keys
    }

    fn admit(&mut self, key: ChunkKey, chunk: Arc<Chunk>) {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            key,
            chunk,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, idx);
        self.push_front(idx);
        self.current_cost += UNIT_COST;
        self.evict_to_budget(Some(key));
    }

    /// Evicts from the tail until within budget, never touching `protect`.
    fn evict_to_budget(&mut self, protect: Option<ChunkKey>) -> usize {
        let mut evicted = 0;
        while self.current_cost > self.max_cost {
            let victim = self.tail;
            if victim == NIL || Some(self.nodes[victim].key) == protect {
                break;
            }
            self.remove_at(victim);
            evicted += 1;
        }
        self.evictions += evicted as u64;
        evicted
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn remove_at(&mut self, idx: usize) {
        self.unlink(idx);
        let last = self.nodes.len() - 1;
        if idx != last {
            self.nodes.swap(idx, last);
            let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
            if prev == NIL {
                self.head = idx;
            } else {
                self.nodes[prev].next = idx;
            }
            if next == NIL {
                self.tail = idx;
            } else {
                self.nodes[next].prev = idx;
            }
            self.index.insert(self.nodes[idx].key, idx);
        }
        if let Some(node) = self.nodes.pop() {
            self.index.remove(&node.key);
            self.current_cost -= UNIT_COST;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(x: i32) -> ChunkKey {
        ChunkKey::new(x, 0)
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = CacheStore::new(4);
        let chunk = store.insert_placeholder(key(1));
        assert!(!chunk.is_loaded());
        assert_eq!(store.len(), 1);
        assert_eq!(store.current_cost(), 1);

        let found = store.get(key(1)).expect("resident");
        assert!(Arc::ptr_eq(&chunk, &found));
        assert!(store.get(key(2)).is_none());
    }

    #[test]
    fn test_insert_existing_returns_same_chunk() {
        let mut store = CacheStore::new(4);
        let a = store.insert_placeholder(key(1));
        let b = store.insert_placeholder(key(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.current_cost(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut store = CacheStore::new(3);
        store.insert_placeholder(key(1));
        store.insert_placeholder(key(2));
        store.insert_placeholder(key(3));

        // Touch 1 so 2 becomes the oldest.
        assert!(store.get(key(1)).is_some());
        store.insert_placeholder(key(4));

        assert!(!store.contains(key(2)));
        assert_eq!(store.keys_by_recency(), vec![key(4), key(1), key(3)]);
        assert_eq!(store.current_cost(), 3);
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut store = CacheStore::new(2);
        store.insert_placeholder(key(1));
        store.insert_placeholder(key(2));
        assert!(store.peek(key(1)).is_some());
        store.insert_placeholder(key(3));
        assert!(!store.contains(key(1)));
    }

    #[test]
    fn test_shrink_evicts_eagerly() {
        let mut store = CacheStore::new(10);
        for x in 0..10 {
            store.insert_placeholder(key(x));
        }
        assert_eq!(store.set_max_cost(4), 6);
        assert_eq!(store.len(), 4);
        assert_eq!(store.keys_by_recency(), vec![key(9), key(8), key(7), key(6)]);

        assert_eq!(store.set_max_cost(20), 0);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_zero_budget_keeps_newest_only() {
        let mut store = CacheStore::new(0);
        let first = store.insert_placeholder(key(1));
        assert!(store.contains(key(1)));
        assert_eq!(store.len(), 1);

        store.insert_placeholder(key(2));
        assert!(!store.contains(key(1)));
        assert!(store.contains(key(2)));
        assert_eq!(store.len(), 1);

        // The evicted placeholder is still usable by whoever holds it.
        assert_eq!(first.key(), key(1));

        store.set_max_cost(0);
        assert!(store.is_empty());
        assert_eq!(store.current_cost(), 0);
    }

    #[test]
    fn test_reinsert_keeps_identity() {
        let mut store = CacheStore::new(1);
        let a = store.insert_placeholder(key(1));
        store.insert_placeholder(key(2));
        assert!(!store.contains(key(1)));

        store.reinsert(Arc::clone(&a));
        let found = store.get(key(1)).expect("reinserted");
        assert!(Arc::ptr_eq(&a, &found));
        assert!(!store.contains(key(2)));
    }

    #[test]
    fn test_clear() {
        let mut store = CacheStore::new(8);
        for x in 0..5 {
            store.insert_placeholder(key(x));
        }
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.current_cost(), 0);
        assert!(store.keys_by_recency().is_empty());

        store.insert_placeholder(key(7));
        assert_eq!(store.keys_by_recency(), vec![key(7)]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(i32),
        Get(i32),
        Budget(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..24i32).prop_map(Op::Insert),
            2 => (0..24i32).prop_map(Op::Get),
            1 => (1..12usize).prop_map(Op::Budget),
        ]
    }

    proptest! {
        #[test]
        fn cost_stays_within_budget(ops in prop::collection::vec(op(), 1..200)) {
            let mut store = CacheStore::new(6);
            for op in ops {
                match op {
                    Op::Insert(x) => { store.insert_placeholder(key(x)); },
                    Op::Get(x) => { store.get(key(x)); },
                    Op::Budget(n) => { store.set_max_cost(n); },
                }
                prop_assert!(store.current_cost() <= store.max_cost());
                prop_assert_eq!(store.current_cost(), store.len() * UNIT_COST);
                prop_assert_eq!(store.keys_by_recency().len(), store.len());
                for k in store.keys_by_recency() {
                    prop_assert!(store.peek(k).is_some());
                }
            }
        }
    }
}

//! Bounded, session-scoped duplicate filter.
//!
//! The window only has to cover the overlap between consecutive batches, so
//! overflow drops the oldest half at once instead of tracking exact recency.

use std::collections::{HashSet, VecDeque};

/// Number of keys retained before the cache is truncated.
pub const DEDUP_CAPACITY: usize = 500;

/// Number of most recent keys kept after truncation.
pub const DEDUP_RETAIN: usize = 250;

pub struct Deduplicator {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(DEDUP_CAPACITY + 1),
            keys: HashSet::with_capacity(DEDUP_CAPACITY + 1),
        }
    }

    pub fn seen(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn remember(&mut self, key: &str) {
        if self.keys.contains(key) {
            return;
        }

        if self.order.len() + 1 > DEDUP_CAPACITY {
            let excess = self.order.len() - DEDUP_RETAIN;
            for evicted in self.order.drain(..excess) {
                self.keys.remove(&evicted);
            }
        }

        self.order.push_back(key.to_string());
        self.keys.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

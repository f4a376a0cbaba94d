// Seen message hashes: deduplication across polls and restarts
//
// Bounded with FIFO eviction; the oldest hash goes first. The ordered list is
// what gets persisted, so a reload restores eviction order too.

use std::collections::{HashSet, VecDeque};

/// Default cap on remembered hashes
pub const MAX_SEEN_HASHES: usize = 50_000;

#[derive(Debug, Clone)]
pub struct SeenHashes {
    /// Set of seen hashes (for lookup)
    hashes: HashSet<String>,
    /// Insertion order (for O(1) FIFO eviction)
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            hashes: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild from a persisted list, oldest first
    pub fn from_persisted(hashes: Vec<String>, capacity: usize) -> Self {
        let mut seen = Self::new(capacity);
        for hash in hashes {
            seen.insert(hash);
        }
        seen
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    /// Record a hash. Returns false if it was already known.
    pub fn insert(&mut self, hash: String) -> bool {
        if self.hashes.contains(&hash) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
        self.hashes.insert(hash.clone());
        self.order.push_back(hash);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Hashes in insertion order, for persistence
    pub fn to_vec(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

impl Default for SeenHashes {
    fn default() -> Self {
        Self::new(MAX_SEEN_HASHES)
    }
}

//! Bounded memory of previously delivered fingerprints.
//!
//! The window keeps fingerprints in insertion order. Once a `record` pushes the size past
//! capacity, the oldest half is dropped in a single pass, so eviction work is amortized
//! over the insertions that preceded it. Fingerprints older than roughly half the capacity
//! may therefore be forgotten and redelivered.

use std::collections::{HashSet, VecDeque};

use danmu_core_types::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Counters describing the window's lifetime activity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub recorded: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct Deduplicator {
    capacity: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
    stats: DedupStats,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            stats: DedupStats::default(),
        }
    }

    pub fn seen(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    /// Remember a fingerprint. Recording one that is already present is a no-op and does
    /// not refresh its position.
    pub fn record(&mut self, fingerprint: Fingerprint) {
        if self.members.contains(&fingerprint) {
            return;
        }
        self.insert(fingerprint);
    }

    /// Returns `true` when the fingerprint was not present and has now been recorded.
    pub fn check_and_record(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.members.contains(fingerprint) {
            self.stats.duplicates += 1;
            return false;
        }
        self.insert(fingerprint.clone());
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Fingerprints from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.order.iter()
    }

    fn insert(&mut self, fingerprint: Fingerprint) {
        self.members.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        self.stats.recorded += 1;
        if self.order.len() > self.capacity {
            self.evict_oldest_half();
        }
    }

    fn evict_oldest_half(&mut self) {
        let count = self.order.len() / 2;
        for fingerprint in self.order.drain(..count) {
            self.members.remove(&fingerprint);
        }
        self.stats.evicted += count as u64;
        self.stats.evictions += 1;
        debug!(
            target: "dedup-window",
            evicted = count,
            remaining = self.order.len(),
            "evicted oldest fingerprints"
        );
    }
}

/// Per-batch filter dropping repeats inside a single upstream batch.
#[derive(Debug, Default)]
pub struct BatchFilter {
    seen: HashSet<Fingerprint>,
}

impl BatchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a fingerprint is offered within this batch.
    pub fn admit(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.seen.contains(fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: usize) -> Fingerprint {
        Fingerprint(format!("fp-{n}"))
    }

    #[test]
    fn check_and_record_reports_first_sighting_only() {
        let mut dedup = Deduplicator::new(4);
        assert!(dedup.check_and_record(&fp(1)));
        assert!(!dedup.check_and_record(&fp(1)));
        assert!(dedup.seen(&fp(1)));
        assert_eq!(dedup.stats().duplicates, 1);
    }

    #[test]
    fn record_is_idempotent() {
        let mut dedup = Deduplicator::new(4);
        dedup.record(fp(1));
        dedup.record(fp(1));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn overflow_evicts_oldest_half_in_one_pass() {
        let mut dedup = Deduplicator::new(4);
        for n in 0..5 {
            dedup.record(fp(n));
        }
        // 5 > 4 -> drop floor(5 / 2) = 2 oldest
        assert_eq!(dedup.len(), 3);
        assert!(!dedup.seen(&fp(0)));
        assert!(!dedup.seen(&fp(1)));
        assert!(dedup.seen(&fp(2)));
        assert!(dedup.seen(&fp(4)));
        assert_eq!(dedup.stats().evictions, 1);
        assert_eq!(dedup.stats().evicted, 2);
    }

    #[test]
    fn size_never_exceeds_default_capacity() {
        let mut dedup = Deduplicator::default();
        for n in 0..5_000 {
            assert!(dedup.check_and_record(&fp(n)));
            assert!(dedup.len() <= DEFAULT_CAPACITY);
        }
        assert!(dedup.stats().evictions >= 8);
    }

    #[test]
    fn forgotten_fingerprints_are_admitted_again() {
        let mut dedup = Deduplicator::new(10);
        for n in 0..11 {
            dedup.record(fp(n));
        }
        assert!(dedup.check_and_record(&fp(0)));
    }

    #[test]
    fn clear_empties_the_window() {
        let mut dedup = Deduplicator::new(10);
        dedup.record(fp(1));
        dedup.clear();
        assert!(dedup.is_empty());
        assert!(dedup.check_and_record(&fp(1)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut dedup = Deduplicator::new(0);
        assert_eq!(dedup.capacity(), 1);
        dedup.record(fp(1));
        dedup.record(fp(2));
        assert_eq!(dedup.len(), 1);
        assert!(dedup.seen(&fp(2)));
    }

    #[test]
    fn batch_filter_drops_repeats() {
        let mut batch = BatchFilter::new();
        assert!(batch.admit(&fp(1)));
        assert!(!batch.admit(&fp(1)));
        assert!(batch.admit(&fp(2)));
    }
}

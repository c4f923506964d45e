//! Position/velocity cache keyed by node.
//!
//! Every resolved node state is stored with the simulation time it was
//! computed for and a time-to-live. A lookup returns the entry whose validity
//! window is centered closest to the query time, provided the center is no
//! further away than one coherence time. Entries older than the configured
//! maximum age are evicted once per channel request.

use std::collections::HashMap;

use super::types::{NodeId, SimTime, Vec3};

/// A cached node state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub sim_time: SimTime,
    pub ttl: SimTime,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl CacheEntry {
    /// Distance (ns) between the center of the validity window and `t`.
    pub fn metric(&self, t: SimTime) -> f64 {
        let middle = self.sim_time as f64 + self.ttl as f64 / 2.0;
        (middle - t as f64).abs()
    }

    fn expires_at(&self) -> SimTime {
        self.sim_time.saturating_add(self.ttl)
    }
}

#[derive(Debug, Clone)]
pub struct PositionVelocityCache {
    entries: HashMap<NodeId, Vec<CacheEntry>>,
    coherence_time: SimTime,
    max_age: SimTime,
}

impl PositionVelocityCache {
    pub fn new(coherence_time: SimTime, max_age: SimTime) -> Self {
        Self {
            entries: HashMap::new(),
            coherence_time,
            max_age,
        }
    }

    /// Best entry for `node` at `t`, or `None` on a miss.
    ///
    /// Ties keep the entry inserted first.
    pub fn lookup(&self, node: NodeId, t: SimTime) -> Option<&CacheEntry> {
        let limit = self.coherence_time as f64;
        let mut best: Option<(&CacheEntry, f64)> = None;
        for entry in self.entries.get(&node)? {
            let metric = entry.metric(t);
            if metric <= limit && best.map_or(true, |(_, m)| metric < m) {
                best = Some((entry, metric));
            }
        }
        best.map(|(entry, _)| entry)
    }

    pub fn insert(&mut self, node: NodeId, entry: CacheEntry) {
        self.entries.entry(node).or_default().push(entry);
    }

    /// Drop every entry that expired more than the maximum age before `t`.
    pub fn evict(&mut self, t: SimTime) {
        let cutoff = t.saturating_sub(self.max_age);
        for list in self.entries.values_mut() {
            list.retain(|e| e.expires_at() >= cutoff);
        }
    }

    /// Cached simulation times for `node`, in insertion order.
    pub fn sim_times(&self, node: NodeId) -> Vec<SimTime> {
        self.entries.get(&node).map(|l| l.iter().map(|e| e.sim_time).collect()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How long resolved positions are retained:
/// `max(1 s, n · ceil(sub_mode / n) · Tc)` for `n` registered nodes.
pub fn max_cache_age(num_nodes: usize, sub_mode: u32, coherence_time: SimTime) -> SimTime {
    const MIN_AGE: SimTime = 1_000_000_000;
    if num_nodes == 0 {
        return MIN_AGE;
    }
    let n = num_nodes as i64;
    let steps = (sub_mode as i64 + n - 1) / n;
    MIN_AGE.max((n * steps).saturating_mul(coherence_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sim_time: SimTime, ttl: SimTime, x: f64) -> CacheEntry {
        CacheEntry {
            sim_time,
            ttl,
            position: Vec3::new(x, 0.0, 0.0),
            velocity: Vec3::ZERO,
        }
    }

    #[test]
    fn lookup_picks_closest_window_center() {
        let mut cache = PositionVelocityCache::new(100, 1_000);
        cache.insert(1, entry(0, 100, 0.0)); // center 50
        cache.insert(1, entry(100, 100, 1.0)); // center 150
        cache.insert(1, entry(200, 100, 2.0)); // center 250
        assert_eq!(cache.lookup(1, 140).unwrap().position.x, 1.0);
        assert_eq!(cache.lookup(1, 260).unwrap().position.x, 2.0);
        assert_eq!(cache.lookup(1, 0).unwrap().position.x, 0.0);
    }

    #[test]
    fn lookup_misses_beyond_coherence_time() {
        let mut cache = PositionVelocityCache::new(100, 1_000);
        cache.insert(1, entry(0, 100, 0.0));
        assert!(cache.lookup(1, 150).is_some()); // metric exactly 100
        assert!(cache.lookup(1, 151).is_none());
        assert!(cache.lookup(2, 0).is_none());
    }

    #[test]
    fn lookup_tie_keeps_first_inserted() {
        let mut cache = PositionVelocityCache::new(100, 1_000);
        cache.insert(1, entry(0, 100, 0.0)); // center 50
        cache.insert(1, entry(100, 100, 1.0)); // center 150
        assert_eq!(cache.lookup(1, 100).unwrap().position.x, 0.0);
    }

    #[test]
    fn evict_removes_only_expired_entries() {
        let mut cache = PositionVelocityCache::new(100, 500);
        cache.insert(1, entry(0, 100, 0.0)); // expires 100
        cache.insert(1, entry(300, 100, 1.0)); // expires 400
        cache.insert(2, entry(50, 100, 2.0)); // expires 150
        cache.evict(660);
        assert_eq!(cache.sim_times(1), vec![300]);
        assert!(cache.sim_times(2).is_empty());
        for node in [1, 2] {
            for t in cache.sim_times(node) {
                assert!(t + 100 >= 660 - 500);
            }
        }
    }

    #[test]
    fn max_cache_age_has_one_second_floor() {
        assert_eq!(max_cache_age(4, 8, 1_000), 1_000_000_000);
        // 4 nodes, sub_mode 8 → 4 · 2 · Tc
        assert_eq!(max_cache_age(4, 8, 500_000_000), 4_000_000_000);
        // 3 nodes, sub_mode 4 → 3 · 2 · Tc
        assert_eq!(max_cache_age(3, 4, 1_000_000_000), 6_000_000_000);
        assert_eq!(max_cache_age(2, 0, 1_000_000_000), 1_000_000_000);
    }
}

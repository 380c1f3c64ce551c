//! Weighted virtual-node consistent hashing.
//!
//! Each shard node contributes a weight-dependent number of virtual points
//! on a ring of `u32` hash values; a key is owned by the node of the first
//! point at or clockwise of the key's hash. Removing a node only reassigns
//! the keys its own points owned.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::WeirError;

/// Pluggable ring hash. The default is CRC32 (IEEE), which is stable across
/// runs and platforms.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Shard weight: how many virtual points the node receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weight {
    Low,
    Mid,
    High,
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weight::Low => f.write_str("low weight"),
            Weight::Mid => f.write_str("middle weight"),
            Weight::High => f.write_str("high weight"),
        }
    }
}

/// One shard node on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub val: String,
    pub weight: Weight,
}

impl Node {
    pub fn new(val: impl Into<String>, weight: Weight) -> Self {
        Self { val: val.into(), weight }
    }
}

#[derive(Default)]
struct RingView {
    /// Sorted virtual point hashes.
    points: Vec<u32>,
    /// Virtual point hash → owning node value.
    owners: HashMap<u32, String>,
}

/// Weighted consistent-hash ring: many concurrent lookups, exclusive
/// writers. A reader never observes a partially updated ring.
pub struct ConsistentHash {
    hash: HashFn,
    /// Virtual points for a `Low` node.
    replicas: usize,
    /// Virtual points for a `High` node; `Mid` gets `max - replicas/2`.
    max_replicas: usize,
    view: RwLock<RingView>,
}

impl ConsistentHash {
    /// Ring with the default CRC32 hash. `replicas` is the point count of a
    /// low-weight node, `max_replicas` of a high-weight node; callers keep
    /// `replicas <= max_replicas`.
    pub fn new(replicas: usize, max_replicas: usize) -> Self {
        Self::with_hash(replicas, max_replicas, Arc::new(crc32fast::hash))
    }

    /// Ring with a caller-supplied hash function.
    pub fn with_hash(replicas: usize, max_replicas: usize, hash: HashFn) -> Self {
        Self { hash, replicas, max_replicas, view: RwLock::new(RingView::default()) }
    }

    fn replicas_for(&self, weight: Weight) -> usize {
        match weight {
            Weight::Low => self.replicas,
            Weight::Mid => self.max_replicas.saturating_sub(self.replicas / 2),
            Weight::High => self.max_replicas,
        }
    }

    /// Virtual point hash for replica `i` of `val`: `hash(val || decimal(i))`.
    fn point_hash(&self, val: &str, i: usize) -> u32 {
        let mut buf = Vec::with_capacity(val.len() + 20);
        buf.extend_from_slice(val.as_bytes());
        buf.extend_from_slice(i.to_string().as_bytes());
        (self.hash)(&buf)
    }

    /// Add nodes to the ring. Fails with `EmptyNode` when given none.
    pub fn add_nodes(&self, nodes: &[Node]) -> Result<(), WeirError> {
        if nodes.is_empty() {
            return Err(WeirError::EmptyNode);
        }

        let mut view = self.view.write().expect("ring lock poisoned");
        for node in nodes {
            for i in 0..self.replicas_for(node.weight) {
                let hash = self.point_hash(&node.val, i);
                if view.owners.insert(hash, node.val.clone()).is_none() {
                    view.points.push(hash);
                }
            }
        }
        view.points.sort_unstable();
        Ok(())
    }

    /// Remove nodes from the ring; the sorted view is rebuilt from the
    /// surviving points. Fails with `EmptyNode` when given none.
    pub fn remove_nodes(&self, nodes: &[Node]) -> Result<(), WeirError> {
        if nodes.is_empty() {
            return Err(WeirError::EmptyNode);
        }

        let mut view = self.view.write().expect("ring lock poisoned");
        for node in nodes {
            for i in 0..self.replicas_for(node.weight) {
                let hash = self.point_hash(&node.val, i);
                view.owners.remove(&hash);
            }
        }
        let mut points: Vec<u32> = view.owners.keys().copied().collect();
        points.sort_unstable();
        view.points = points;
        Ok(())
    }

    /// Look up the node owning `key`: the first virtual point at or after
    /// `hash(key)`, wrapping to the start of the ring.
    pub fn get(&self, key: &[u8]) -> Result<String, WeirError> {
        let view = self.view.read().expect("ring lock poisoned");
        if view.points.is_empty() {
            return Err(WeirError::EmptyNode);
        }

        let hash = (self.hash)(key);
        let idx = view.points.partition_point(|&point| point < hash);
        let point = view.points[if idx == view.points.len() { 0 } else { idx }];
        Ok(view.owners[&point].clone())
    }

    /// Number of virtual points currently on the ring.
    pub fn len(&self) -> usize {
        self.view.read().expect("ring lock poisoned").points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentHash")
            .field("replicas", &self.replicas)
            .field("max_replicas", &self.max_replicas)
            .field("points", &self.len())
            .finish()
    }
}

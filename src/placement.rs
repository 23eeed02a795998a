//! Chunk placement
//!
//! Chooses a primary and an ordered list of secondary storage nodes for
//! each chunk of a file. The primary follows a round robin keyed to the
//! chunk's own index within that file, so chunk 0 of every new file
//! starts the rotation at the same node; secondaries are sampled
//! uniformly at random from whichever active nodes are left.

use rand::seq::SliceRandom;

use crate::error::{Error, Result};

pub struct PlacementPolicy {
    replica_set: usize,
}

/// The outcome of placing one chunk: which SN is primary, and which SNs
/// (in order) are secondaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub primary: String,
    pub secondaries: Vec<String>,
}

impl PlacementPolicy {
    pub fn new(replica_set: usize) -> Self {
        Self { replica_set: replica_set.max(1) }
    }

    /// Place the chunk at `index` within its file across `active_nodes`
    /// (must list only storage nodes currently considered healthy by the
    /// failure-detection loop). The primary is `active_nodes[index %
    /// active_nodes.len()]`; the remaining `replica_set - 1` nodes are
    /// sampled uniformly at random to be secondaries.
    pub fn place(&self, active_nodes: &[String], index: u64) -> Result<Placement> {
        if active_nodes.len() < self.replica_set {
            return Err(Error::QuorumNotReached {
                reached: active_nodes.len(),
                required: self.replica_set,
            });
        }
        let primary_idx = (index % active_nodes.len() as u64) as usize;
        let primary = active_nodes[primary_idx].clone();
        let remainder: Vec<&String> = active_nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != primary_idx)
            .map(|(_, n)| n)
            .collect();
        let secondaries = remainder
            .choose_multiple(&mut rand::thread_rng(), self.replica_set - 1)
            .map(|n| (*n).clone())
            .collect();
        Ok(Placement { primary, secondaries })
    }

    /// Place every chunk of a file that has `chunk_count` chunks,
    /// producing one [`Placement`] per chunk in sequence order; chunk 0
    /// always starts the round robin at `active_nodes[0]`.
    pub fn place_file(&self, active_nodes: &[String], chunk_count: u64) -> Result<Vec<Placement>> {
        (0..chunk_count).map(|i| self.place(active_nodes, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn places_distinct_primary_and_secondaries() {
        let policy = PlacementPolicy::new(2);
        let nodes = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let p = policy.place(&nodes, 0).unwrap();
        assert_eq!(p.primary, "A");
        assert_eq!(p.secondaries.len(), 1);
        assert_ne!(p.secondaries[0], p.primary);
    }

    #[test]
    fn primary_follows_chunk_index_round_robin() {
        let policy = PlacementPolicy::new(1);
        let nodes = vec!["A".to_string(), "B".to_string()];
        assert_eq!(policy.place(&nodes, 0).unwrap().primary, "A");
        assert_eq!(policy.place(&nodes, 1).unwrap().primary, "B");
        assert_eq!(policy.place(&nodes, 2).unwrap().primary, "A");
    }

    #[test]
    fn each_file_starts_its_own_round_robin_at_the_first_node() {
        let policy = PlacementPolicy::new(1);
        let nodes = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let first_file = policy.place_file(&nodes, 2).unwrap();
        let second_file = policy.place_file(&nodes, 2).unwrap();
        assert_eq!(first_file[0].primary, "A");
        assert_eq!(second_file[0].primary, "A");
        assert_eq!(first_file[1].primary, "B");
        assert_eq!(second_file[1].primary, "B");
    }

    #[test]
    fn insufficient_active_nodes_errors() {
        let policy = PlacementPolicy::new(3);
        let nodes = vec!["A".to_string(), "B".to_string()];
        assert!(matches!(policy.place(&nodes, 0), Err(Error::QuorumNotReached { .. })));
    }
}

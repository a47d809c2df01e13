//! Ring neighborhood of a worker.
//!
//! Workers form a ring `0 -> 1 -> ... -> world_size-1 -> 0`. A worker's
//! neighborhood is itself plus the previous and next worker on the ring.
//! For `world_size <= 3` that is every worker.

use super::error::{GateError, Result};
use super::expert_map::ExpertMap;

/// The set of workers adjacent to `rank` on the ring, `rank` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingNeighborhood {
    rank: usize,
    world_size: usize,
    /// Sorted, deduplicated worker ranks.
    workers: Vec<usize>,
}

impl RingNeighborhood {
    /// Build the neighborhood of `rank` in a ring of `world_size` workers.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(GateError::InvalidConfiguration(
                "world_size must be > 0".to_string(),
            ));
        }
        if rank >= world_size {
            return Err(GateError::InvalidConfiguration(format!(
                "rank {rank} out of range (world_size={world_size})"
            )));
        }

        let prev = (rank + world_size - 1) % world_size;
        let next = (rank + 1) % world_size;
        let mut workers = vec![prev, rank, next];
        workers.sort_unstable();
        workers.dedup();

        Ok(Self {
            rank,
            world_size,
            workers,
        })
    }

    /// Previous worker on the ring.
    pub fn prev(&self) -> usize {
        (self.rank + self.world_size - 1) % self.world_size
    }

    /// Next worker on the ring.
    pub fn next(&self) -> usize {
        (self.rank + 1) % self.world_size
    }

    /// Whether `worker` is in the neighborhood.
    #[inline]
    pub fn contains(&self, worker: usize) -> bool {
        self.workers.binary_search(&worker).is_ok()
    }

    /// Neighborhood members in ascending order.
    pub fn workers(&self) -> &[usize] {
        &self.workers
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Global IDs of every expert hosted outside the neighborhood, ascending.
    pub fn masked_experts(&self, experts: &ExpertMap) -> Vec<usize> {
        debug_assert_eq!(experts.world_size(), self.world_size);
        (0..experts.num_experts())
            .filter(|&i| !self.contains(experts.owner(i)))
            .collect()
    }

    /// Number of experts a token from this worker may be routed to.
    pub fn eligible_experts(&self, experts: &ExpertMap) -> usize {
        self.workers.len() * experts.n_expert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_rank() {
        let hood = RingNeighborhood::new(2, 6).unwrap();
        assert_eq!(hood.workers(), &[1, 2, 3]);
        assert_eq!(hood.prev(), 1);
        assert_eq!(hood.next(), 3);
    }

    #[test]
    fn wraps_around_both_ends() {
        let first = RingNeighborhood::new(0, 4).unwrap();
        assert_eq!(first.workers(), &[0, 1, 3]);
        assert_eq!(first.prev(), 3);

        let last = RingNeighborhood::new(3, 4).unwrap();
        assert_eq!(last.workers(), &[0, 2, 3]);
        assert_eq!(last.next(), 0);
    }

    #[test]
    fn small_rings_collapse() {
        assert_eq!(RingNeighborhood::new(0, 1).unwrap().workers(), &[0]);
        assert_eq!(RingNeighborhood::new(1, 2).unwrap().workers(), &[0, 1]);
        assert_eq!(RingNeighborhood::new(1, 3).unwrap().workers(), &[0, 1, 2]);
    }

    #[test]
    fn masked_experts_excludes_neighbors() {
        let experts = ExpertMap::new(2, 4).unwrap();
        let hood = RingNeighborhood::new(0, 4).unwrap();
        assert_eq!(hood.masked_experts(&experts), vec![4, 5]);
        assert_eq!(hood.eligible_experts(&experts), 6);
    }

    #[test]
    fn masked_experts_length() {
        for world_size in 1..10 {
            for n_expert in 1..4 {
                let experts = ExpertMap::new(n_expert, world_size).unwrap();
                for rank in 0..world_size {
                    let hood = RingNeighborhood::new(rank, world_size).unwrap();
                    let expected = n_expert * world_size.saturating_sub(3);
                    assert_eq!(hood.masked_experts(&experts).len(), expected);
                }
            }
        }
    }

    #[test]
    fn invalid_rank_rejected() {
        let err = RingNeighborhood::new(4, 4).unwrap_err();
        assert!(err.is_invalid_configuration());
        assert!(RingNeighborhood::new(0, 0).is_err());
    }
}

//! Expert placement across workers.
//!
//! Experts are placed in contiguous blocks: worker `w` hosts global experts
//! `[w * n_expert .. (w + 1) * n_expert)`. Global expert IDs are what gates
//! emit; local IDs index the experts stored on one worker.
//!
//! ## Example
//!
//! ```
//! use moe_gate_core::moe::ExpertMap;
//!
//! // 2 experts per worker, 4 workers
//! let map = ExpertMap::new(2, 4).unwrap();
//!
//! assert_eq!(map.num_experts(), 8);
//! assert_eq!(map.owner(5), 2);
//! assert_eq!(map.experts_of(3), 6..8);
//! assert_eq!(map.to_local(5), 1);
//! ```

use std::ops::Range;

use super::error::{GateError, Result};

/// Maps global expert IDs to the worker that hosts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpertMap {
    /// Experts hosted on each worker.
    n_expert: usize,
    /// Number of workers.
    world_size: usize,
}

impl ExpertMap {
    /// Create a map for `n_expert` experts on each of `world_size` workers.
    pub fn new(n_expert: usize, world_size: usize) -> Result<Self> {
        if n_expert == 0 {
            return Err(GateError::InvalidConfiguration(
                "n_expert must be > 0".to_string(),
            ));
        }
        if world_size == 0 {
            return Err(GateError::InvalidConfiguration(
                "world_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            n_expert,
            world_size,
        })
    }

    /// Worker that hosts a global expert.
    #[inline]
    pub fn owner(&self, global_id: usize) -> usize {
        debug_assert!(global_id < self.num_experts());
        global_id / self.n_expert
    }

    /// Global expert IDs hosted on `worker`.
    #[inline]
    pub fn experts_of(&self, worker: usize) -> Range<usize> {
        debug_assert!(worker < self.world_size);
        let start = worker * self.n_expert;
        start..start + self.n_expert
    }

    /// Position of a global expert within its owner's block.
    #[inline]
    pub fn to_local(&self, global_id: usize) -> usize {
        global_id % self.n_expert
    }

    /// Global ID of local expert `local_id` on `worker`.
    #[inline]
    pub fn to_global(&self, worker: usize, local_id: usize) -> usize {
        debug_assert!(local_id < self.n_expert);
        worker * self.n_expert + local_id
    }

    /// Whether a global ID refers to an existing expert.
    #[inline]
    pub fn contains(&self, global_id: usize) -> bool {
        global_id < self.num_experts()
    }

    /// Experts per worker.
    #[inline]
    pub fn n_expert(&self) -> usize {
        self.n_expert
    }

    /// Number of workers.
    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Total number of experts across all workers.
    #[inline]
    pub fn num_experts(&self) -> usize {
        self.n_expert * self.world_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_block_index() {
        let map = ExpertMap::new(2, 4).unwrap();

        assert_eq!(map.owner(0), 0);
        assert_eq!(map.owner(1), 0);
        assert_eq!(map.owner(2), 1);
        assert_eq!(map.owner(3), 1);
        assert_eq!(map.owner(4), 2);
        assert_eq!(map.owner(5), 2);
        assert_eq!(map.owner(6), 3);
        assert_eq!(map.owner(7), 3);
    }

    #[test]
    fn experts_of_covers_all_ids_once() {
        let map = ExpertMap::new(3, 5).unwrap();

        let all: Vec<usize> = (0..map.world_size())
            .flat_map(|w| map.experts_of(w))
            .collect();
        assert_eq!(all, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn local_global_round_trip() {
        let map = ExpertMap::new(4, 3).unwrap();

        for global in 0..map.num_experts() {
            let worker = map.owner(global);
            let local = map.to_local(global);
            assert_eq!(map.to_global(worker, local), global);
        }
    }

    #[test]
    fn single_worker_owns_everything() {
        let map = ExpertMap::new(8, 1).unwrap();

        for i in 0..8 {
            assert_eq!(map.owner(i), 0);
            assert_eq!(map.to_local(i), i);
        }
        assert!(map.contains(7));
        assert!(!map.contains(8));
    }

    #[test]
    fn zero_sizes_rejected() {
        assert!(ExpertMap::new(0, 4).unwrap_err().is_invalid_configuration());
        assert!(ExpertMap::new(2, 0).unwrap_err().is_invalid_configuration());
    }
}

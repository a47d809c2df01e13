//! Worker identity within the expert-parallel group.

use crate::moe::{GateError, Result};

/// Where the current worker sits in the ring of expert hosts.
pub trait ProcessGroup: Send + Sync {
    /// Rank of this worker (0..world_size).
    fn rank(&self) -> usize;

    /// Number of workers hosting experts.
    fn world_size(&self) -> usize;
}

/// Process group described by a fixed rank and world size.
///
/// Stands in for one member of a larger group, which is how gates for every
/// rank are built without launching workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalProcessGroup {
    rank: usize,
    world_size: usize,
}

impl LocalProcessGroup {
    /// Fails with [`GateError::InvalidConfiguration`] unless
    /// `rank < world_size`.
    pub fn with_rank(rank: usize, world_size: usize) -> Result<Self> {
        if rank >= world_size {
            return Err(GateError::InvalidConfiguration(format!(
                "rank {rank} out of range (world_size={world_size})"
            )));
        }
        Ok(Self { rank, world_size })
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }
}

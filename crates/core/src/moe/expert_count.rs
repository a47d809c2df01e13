//! Token bookkeeping between the gate and the dispatcher.
//!
//! After a gate has picked experts, the dispatcher needs to know how many
//! token slots go to each expert, in which order to pack them, and how many
//! slots it will receive from every other worker.
//!
//! ```text
//! expert_indices [num_tokens, top_k]
//!     ↓ count_by_gate
//! local_expert_count [num_experts]     pos [num_tokens * top_k]
//!     ↓ all-gather across workers (dispatcher)
//! all_counts [world_size, num_experts]
//!     ↓ exchange_expert_counts
//! global_expert_count [world_size, n_expert]
//! ```

use candle_core::{DType, Tensor};

use super::error::{GateError, Result};
use super::expert_map::ExpertMap;

/// Per-expert token counts for one routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertCounts {
    /// Token slots routed to each global expert.
    pub local_expert_count: Vec<usize>,
    /// Flattened `token * top_k + k` slot ids grouped by expert in ascending
    /// expert order; slots keep their original order within an expert.
    pub pos: Vec<usize>,
}

impl ExpertCounts {
    /// Total number of routed slots.
    pub fn total(&self) -> usize {
        self.pos.len()
    }

    /// Start of each expert's run in `pos` (exclusive prefix sum).
    pub fn expert_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.local_expert_count.len());
        let mut acc = 0;
        for &count in &self.local_expert_count {
            offsets.push(acc);
            acc += count;
        }
        offsets
    }

    /// Slots destined for each worker.
    pub fn worker_counts(&self, experts: &ExpertMap) -> Vec<usize> {
        (0..experts.world_size())
            .map(|w| self.local_expert_count[experts.experts_of(w)].iter().sum())
            .collect()
    }
}

/// Count token slots per expert and order them expert-major.
///
/// # Arguments
/// * `expert_indices` - Gate output of shape `[num_tokens, top_k]`
/// * `num_experts` - Total number of experts across all workers
pub fn count_by_gate(expert_indices: &Tensor, num_experts: usize) -> Result<ExpertCounts> {
    let ids: Vec<u32> = expert_indices
        .flatten_all()?
        .to_dtype(DType::U32)?
        .to_vec1()?;

    let mut local_expert_count = vec![0usize; num_experts];
    for &id in &ids {
        let expert = id as usize;
        if expert >= num_experts {
            return Err(GateError::ExpertOutOfRange {
                expert,
                num_experts,
            });
        }
        local_expert_count[expert] += 1;
    }

    let mut counts = ExpertCounts {
        local_expert_count,
        pos: vec![0; ids.len()],
    };

    // Counting sort keeps slots stable within an expert.
    let mut cursor = counts.expert_offsets();
    for (slot, &id) in ids.iter().enumerate() {
        let expert = id as usize;
        counts.pos[cursor[expert]] = slot;
        cursor[expert] += 1;
    }

    Ok(counts)
}

/// Extract how many slots every worker sends to the local experts of `rank`.
///
/// # Arguments
/// * `all_counts` - Row-major `[world_size, num_experts]`: row `i` is worker
///   `i`'s `local_expert_count`
/// * `experts` - Expert placement
/// * `rank` - Receiving worker
///
/// # Returns
/// Row-major `[world_size, n_expert]`: entry `i * n_expert + e` is the number
/// of slots worker `i` sends to local expert `e` of `rank`.
pub fn exchange_expert_counts(
    all_counts: &[usize],
    experts: &ExpertMap,
    rank: usize,
) -> Result<Vec<usize>> {
    let world_size = experts.world_size();
    let num_experts = experts.num_experts();
    let n_expert = experts.n_expert();

    if rank >= world_size {
        return Err(GateError::InvalidConfiguration(format!(
            "rank {rank} out of range (world_size={world_size})"
        )));
    }
    if all_counts.len() != world_size * num_experts {
        return Err(GateError::ShapeMismatch {
            expected: vec![world_size, num_experts],
            actual: vec![all_counts.len()],
        });
    }

    let local = experts.experts_of(rank);
    let mut global_expert_count = Vec::with_capacity(world_size * n_expert);
    for src in 0..world_size {
        let row = &all_counts[src * num_experts..(src + 1) * num_experts];
        global_expert_count.extend_from_slice(&row[local.clone()]);
    }
    Ok(global_expert_count)
}

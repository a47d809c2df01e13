//! Neighbor-restricted top-k gate.
//!
//! Tokens on worker `rank` may only be routed to experts hosted on the
//! previous, current, or next worker of the ring. Every other expert column is
//! overwritten with a sentinel below the batch minimum before top-k selection,
//! so it can never win as long as the neighborhood hosts at least `top_k`
//! experts. Construction rejects configurations where it does not.

use std::fmt;

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

use super::error::{GateError, Result};
use super::expert_map::ExpertMap;
use super::neighborhood::RingNeighborhood;
use super::scorer::{NaiveScorer, Scorer};
use super::topk::top_k_with_indices;
use crate::config::GateConfig;
use crate::distributed::ProcessGroup;

/// Number of experts the neighbor gate selects per token.
pub const NEIGHBOR_TOP_K: usize = 2;

/// Trait for MoE gates.
pub trait Gate: Send + Sync {
    /// Route tokens to experts.
    ///
    /// # Arguments
    /// * `hidden_states` - Token batch `[num_tokens, d_model]`, or any shape
    ///   `[..., d_model]` which is flattened to `[num_tokens, d_model]`
    ///
    /// # Returns
    /// * `expert_indices` - `u32` global expert IDs `[num_tokens, top_k]`
    /// * `expert_scores` - Raw scores of the selected experts `[num_tokens, top_k]`
    fn route(&self, hidden_states: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Total number of experts across all workers.
    fn num_experts(&self) -> usize;

    /// Experts selected per token.
    fn top_k(&self) -> usize;
}

/// Top-k gate restricted to experts on ring-neighbor workers.
pub struct NeighborGate<S: Scorer = NaiveScorer> {
    scorer: S,
    config: GateConfig,
    experts: ExpertMap,
    neighborhood: RingNeighborhood,
    /// Masked global expert IDs, ascending.
    mask: Vec<usize>,
    /// Per-expert flag, 1 where masked.
    mask_flags: Vec<u8>,
}

impl<S: Scorer> NeighborGate<S> {
    /// Create a gate for worker `rank` around an existing scorer.
    ///
    /// Fails with [`GateError::InvalidConfiguration`] when `top_k != 2`, a size
    /// is zero, `rank >= world_size`, the scorer does not score
    /// `n_expert * world_size` experts, or the neighborhood hosts fewer than
    /// `top_k` experts.
    pub fn new(scorer: S, config: GateConfig, rank: usize) -> Result<Self> {
        check_top_k(config.top_k)?;
        config.validate()?;

        let experts = ExpertMap::new(config.n_expert, config.world_size)?;
        let neighborhood = RingNeighborhood::new(rank, config.world_size)?;

        if scorer.num_experts() != experts.num_experts() {
            return Err(GateError::InvalidConfiguration(format!(
                "scorer produces {} expert scores, gate expects n_expert * world_size = {}",
                scorer.num_experts(),
                experts.num_experts()
            )));
        }

        let eligible = neighborhood.eligible_experts(&experts);
        if eligible < config.top_k {
            return Err(GateError::InvalidConfiguration(format!(
                "only {eligible} experts on neighbor workers {:?}, need at least top_k = {}",
                neighborhood.workers(),
                config.top_k
            )));
        }

        let mask = neighborhood.masked_experts(&experts);
        let mut mask_flags = vec![0u8; experts.num_experts()];
        for &expert in &mask {
            mask_flags[expert] = 1;
        }

        tracing::debug!(
            rank,
            world_size = config.world_size,
            n_expert = config.n_expert,
            valid_workers = ?neighborhood.workers(),
            masked = mask.len(),
            "Built neighbor gate"
        );

        Ok(Self {
            scorer,
            config,
            experts,
            neighborhood,
            mask,
            mask_flags,
        })
    }

    /// Create a gate whose rank and world size come from a process group.
    pub fn for_process_group(
        scorer: S,
        config: GateConfig,
        process_group: &dyn ProcessGroup,
    ) -> Result<Self> {
        if process_group.world_size() != config.world_size {
            return Err(GateError::InvalidConfiguration(format!(
                "process group world_size {} does not match gate world_size {}",
                process_group.world_size(),
                config.world_size
            )));
        }
        Self::new(scorer, config, process_group.rank())
    }

    /// Global expert IDs this gate never routes to, ascending.
    pub fn mask(&self) -> &[usize] {
        &self.mask
    }

    /// Workers whose experts remain eligible.
    pub fn valid_workers(&self) -> &[usize] {
        self.neighborhood.workers()
    }

    pub fn neighborhood(&self) -> &RingNeighborhood {
        &self.neighborhood
    }

    pub fn expert_map(&self) -> &ExpertMap {
        &self.experts
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn rank(&self) -> usize {
        self.neighborhood.rank()
    }

    pub fn world_size(&self) -> usize {
        self.config.world_size
    }

    /// Experts hosted on each worker.
    pub fn n_expert(&self) -> usize {
        self.config.n_expert
    }

    /// Overwrite masked columns with `min(scores) - 1`.
    ///
    /// When the offset is absorbed by the dtype's precision, masked columns
    /// get `-inf` instead so they stay strictly below every eligible score.
    fn apply_mask(&self, scores: &Tensor) -> Result<Tensor> {
        if self.mask.is_empty() {
            return Ok(scores.clone());
        }
        let (num_tokens, num_experts) = scores.dims2()?;

        let min = scores.flatten_all()?.min_keepdim(0)?;
        let below = (&min - 1.0)?;
        let strictly_below: u8 = below.lt(&min)?.squeeze(0)?.to_scalar()?;
        let sentinel = if strictly_below == 1 {
            below
        } else {
            Tensor::new(&[f32::NEG_INFINITY], scores.device())?.to_dtype(scores.dtype())?
        };

        let sentinel = sentinel
            .broadcast_as((num_tokens, num_experts))?
            .contiguous()?;
        let mask = Tensor::from_slice(&self.mask_flags, (1, num_experts), scores.device())?
            .broadcast_as((num_tokens, num_experts))?
            .contiguous()?;

        Ok(mask.where_cond(&sentinel, scores)?)
    }

    /// Flatten `[..., d_model]` into `[num_tokens, d_model]`.
    fn flatten_tokens(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let d_model = self.config.d_model;
        let dims = hidden_states.dims();

        // No token axis: only the trailing width is known.
        if dims.len() < 2 {
            return Err(GateError::ShapeMismatch {
                expected: vec![d_model],
                actual: dims.to_vec(),
            });
        }

        let num_tokens: usize = dims[..dims.len() - 1].iter().product();
        if dims[dims.len() - 1] != d_model {
            return Err(GateError::ShapeMismatch {
                expected: vec![num_tokens, d_model],
                actual: dims.to_vec(),
            });
        }
        Ok(hidden_states.reshape((num_tokens, d_model))?)
    }
}

impl NeighborGate<NaiveScorer> {
    /// Create a gate with a learnable linear scorer loaded from `vb`.
    pub fn naive(config: GateConfig, rank: usize, vb: VarBuilder) -> Result<Self> {
        check_top_k(config.top_k)?;
        config.validate()?;
        let scorer = NaiveScorer::new(config.d_model, config.num_experts(), vb)?;
        Self::new(scorer, config, rank)
    }
}

impl<S: Scorer> Gate for NeighborGate<S> {
    fn route(&self, hidden_states: &Tensor) -> Result<(Tensor, Tensor)> {
        let hidden = self.flatten_tokens(hidden_states)?;
        let num_tokens = hidden.dim(0)?;
        let num_experts = self.experts.num_experts();
        let top_k = self.config.top_k;

        if num_tokens == 0 {
            let device = hidden.device();
            let indices = Tensor::zeros((0, top_k), DType::U32, device)?;
            let scores = Tensor::zeros((0, top_k), hidden.dtype(), device)?;
            return Ok((indices, scores));
        }

        // Raw scores: [num_tokens, num_experts]
        let scores = self.scorer.score(&hidden)?;
        if scores.dims() != [num_tokens, num_experts].as_slice() {
            return Err(GateError::ShapeMismatch {
                expected: vec![num_tokens, num_experts],
                actual: scores.dims().to_vec(),
            });
        }

        let masked = self.apply_mask(&scores)?;
        let (_, expert_indices) = top_k_with_indices(&masked, top_k)?;

        // Report the unmasked scores of the winners.
        let expert_scores = scores
            .contiguous()?
            .gather(&expert_indices, 1)?
            .reshape((num_tokens, top_k))?;

        tracing::trace!(num_tokens, rank = self.rank(), "Routed token batch");

        Ok((expert_indices, expert_scores))
    }

    fn num_experts(&self) -> usize {
        self.experts.num_experts()
    }

    fn top_k(&self) -> usize {
        self.config.top_k
    }
}

impl<S: Scorer> fmt::Debug for NeighborGate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighborGate")
            .field("config", &self.config)
            .field("rank", &self.rank())
            .field("valid_workers", &self.valid_workers())
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_top_k(top_k: usize) -> Result<()> {
    if top_k != NEIGHBOR_TOP_K {
        return Err(GateError::InvalidConfiguration(format!(
            "neighbor gate requires top_k = {NEIGHBOR_TOP_K}, got {top_k}"
        )));
    }
    Ok(())
}

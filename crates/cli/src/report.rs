//! Summaries printed by the `moe-gate` subcommands.

use std::fmt;

use candle_core::{DType, Device, Tensor};
use moe_gate_core::moe::{count_by_gate, Result, Scorer};
use moe_gate_core::{Gate, NeighborGate};
use serde::Serialize;

/// Which experts a rank's gate can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskReport {
    pub rank: usize,
    pub world_size: usize,
    pub n_expert: usize,
    pub valid_workers: Vec<usize>,
    pub masked_experts: Vec<usize>,
    pub eligible_experts: Vec<usize>,
}

impl MaskReport {
    pub fn from_gate<S: Scorer>(gate: &NeighborGate<S>) -> Self {
        let hood = gate.neighborhood();
        let experts = gate.expert_map();
        Self {
            rank: gate.rank(),
            world_size: gate.world_size(),
            n_expert: gate.n_expert(),
            valid_workers: gate.valid_workers().to_vec(),
            masked_experts: gate.mask().to_vec(),
            eligible_experts: (0..gate.num_experts())
                .filter(|&expert| hood.contains(experts.owner(expert)))
                .collect(),
        }
    }
}

impl fmt::Display for MaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rank {} of {} ({} experts per worker)",
            self.rank, self.world_size, self.n_expert
        )?;
        writeln!(f, "  valid workers:    {:?}", self.valid_workers)?;
        writeln!(f, "  eligible experts: {:?}", self.eligible_experts)?;
        write!(f, "  masked experts:   {:?}", self.masked_experts)
    }
}

/// Where one batch of tokens was routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub rank: usize,
    pub num_tokens: usize,
    pub top_k: usize,
    pub per_expert: Vec<usize>,
    pub per_worker: Vec<usize>,
    /// Slots that landed on a masked expert. Always zero for a healthy gate.
    pub masked_hits: usize,
}

impl RouteReport {
    /// Route `hidden_states` through `gate` and tally the decision.
    pub fn from_route<S: Scorer>(gate: &NeighborGate<S>, hidden_states: &Tensor) -> Result<Self> {
        let (indices, _scores) = gate.route(hidden_states)?;
        let counts = count_by_gate(&indices, gate.num_experts())?;
        let masked_hits = gate
            .mask()
            .iter()
            .map(|&expert| counts.local_expert_count[expert])
            .sum();

        Ok(Self {
            rank: gate.rank(),
            num_tokens: indices.dim(0)?,
            top_k: gate.top_k(),
            per_worker: counts.worker_counts(gate.expert_map()),
            per_expert: counts.local_expert_count,
            masked_hits,
        })
    }
}

impl fmt::Display for RouteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rank {} routed {} tokens (top-{})",
            self.rank, self.num_tokens, self.top_k
        )?;
        writeln!(f, "  per expert: {:?}", self.per_expert)?;
        writeln!(f, "  per worker: {:?}", self.per_worker)?;
        write!(f, "  masked hits: {}", self.masked_hits)
    }
}

/// Deterministic `[num_tokens, d_model]` batch for smoke-testing a gate.
pub fn synthetic_tokens(num_tokens: usize, d_model: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = (0..num_tokens * d_model)
        .map(|i| ((i as f32) * 0.37).sin())
        .collect();
    Ok(Tensor::from_vec(data, (num_tokens, d_model), device)?)
}

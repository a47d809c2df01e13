//! Per-rank gate constructors.
//!
//! A generic MoE layer builds one gate per worker from the same
//! [`GateConfig`]. [`gen_neighbor_gate`] captures the worker's rank so the
//! layer does not need to know the gate type needs one.
//!
//! ```
//! use candle_core::{DType, Device};
//! use candle_nn::VarBuilder;
//! use moe_gate_core::{gen_neighbor_gate, GateConfig};
//!
//! let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
//! let gate = gen_neighbor_gate(0).build(&GateConfig::new(16, 2, 4), vb).unwrap();
//! assert_eq!(gate.mask(), &[4, 5]);
//! ```

use candle_nn::VarBuilder;

use super::error::Result;
use super::gate::{check_top_k, NeighborGate};
use super::scorer::{NaiveScorer, Scorer};
use crate::config::GateConfig;

/// Builds [`NeighborGate`]s for a fixed rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborGateFactory {
    rank: usize,
}

/// Create a gate constructor for worker `rank`.
pub fn gen_neighbor_gate(rank: usize) -> NeighborGateFactory {
    NeighborGateFactory { rank }
}

impl NeighborGateFactory {
    /// Rank baked into every gate this factory builds.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Build a gate with a learnable linear scorer loaded from `vb`.
    ///
    /// Fails with `InvalidConfiguration` unless `config.top_k == 2`.
    pub fn build(&self, config: &GateConfig, vb: VarBuilder) -> Result<NeighborGate<NaiveScorer>> {
        check_top_k(config.top_k)?;
        NeighborGate::naive(*config, self.rank, vb)
    }

    /// Build a gate around an existing scorer.
    ///
    /// Fails with `InvalidConfiguration` unless `config.top_k == 2`.
    pub fn build_with_scorer<S: Scorer>(
        &self,
        scorer: S,
        config: &GateConfig,
    ) -> Result<NeighborGate<S>> {
        check_top_k(config.top_k)?;
        NeighborGate::new(scorer, *config, self.rank)
    }
}

//! Per-expert scoring networks.
//!
//! A [`Scorer`] turns a token batch `[num_tokens, d_model]` into raw expert
//! scores `[num_tokens, num_experts]`. Gates own a scorer and decide which
//! experts to keep; the scorer itself knows nothing about workers or masks.

use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

use super::error::Result;

/// Capability that produces raw expert scores for a token batch.
pub trait Scorer: Send + Sync {
    /// Score every expert for every token.
    ///
    /// # Arguments
    /// * `hidden_states` - Token batch of shape `[num_tokens, d_model]`
    ///
    /// # Returns
    /// Raw scores of shape `[num_tokens, num_experts]`.
    fn score(&self, hidden_states: &Tensor) -> Result<Tensor>;

    /// Number of experts scored per token.
    fn num_experts(&self) -> usize;
}

/// Learnable linear projection `d_model -> num_experts` with bias.
#[derive(Debug, Clone)]
pub struct NaiveScorer {
    gate: Linear,
    d_model: usize,
    num_experts: usize,
}

impl NaiveScorer {
    /// Create the projection, loading or initializing `weight`/`bias` from `vb`.
    pub fn new(d_model: usize, num_experts: usize, vb: VarBuilder) -> Result<Self> {
        let gate = candle_nn::linear(d_model, num_experts, vb)?;
        Ok(Self {
            gate,
            d_model,
            num_experts,
        })
    }

    /// Wrap an existing linear layer whose weight is `[num_experts, d_model]`.
    pub fn from_linear(gate: Linear) -> Result<Self> {
        let (num_experts, d_model) = gate.weight().dims2()?;
        Ok(Self {
            gate,
            d_model,
            num_experts,
        })
    }

    /// Input width.
    pub fn d_model(&self) -> usize {
        self.d_model
    }
}

impl Scorer for NaiveScorer {
    fn score(&self, hidden_states: &Tensor) -> Result<Tensor> {
        Ok(self.gate.forward(hidden_states)?)
    }

    fn num_experts(&self) -> usize {
        self.num_experts
    }
}

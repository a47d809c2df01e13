//! Mixture of Experts (MoE) gating.
//!
//! This module decides, for every token, which experts process it and with
//! what weight, when experts are spread over the workers of a ring.
//!
//! ## Submodules
//!
//! - [`scorer`]: Raw per-expert scoring ([`Scorer`], [`NaiveScorer`])
//! - [`gate`]: Neighbor-restricted top-k gate
//! - [`factory`]: Per-rank gate constructors
//! - [`neighborhood`]: Ring neighborhood of a worker
//! - [`expert_map`]: Expert placement across workers
//! - [`expert_count`]: Per-expert token counts for the dispatcher
//! - [`topk`]: Top-k selection and weight normalization

mod error;
pub mod expert_count;
pub mod expert_map;
pub mod factory;
pub mod gate;
pub mod neighborhood;
pub mod scorer;
pub mod topk;

pub use error::{GateError, Result};
pub use expert_count::{count_by_gate, exchange_expert_counts, ExpertCounts};
pub use expert_map::ExpertMap;
pub use factory::{gen_neighbor_gate, NeighborGateFactory};
pub use gate::{Gate, NeighborGate, NEIGHBOR_TOP_K};
pub use neighborhood::RingNeighborhood;
pub use scorer::{NaiveScorer, Scorer};
pub use topk::{normalized_weights, top_k_with_indices};

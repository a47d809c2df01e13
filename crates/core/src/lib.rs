//! Neighbor-restricted top-k routing gate for distributed mixture-of-experts
//! layers.
//!
//! - [`moe`]: scorer capability, the neighbor gate, its factory, and the
//!   expert bookkeeping a dispatcher needs
//! - [`distributed`]: worker identity (rank, world size)
//! - [`config`]: gate shape configuration

pub mod config;
pub mod distributed;
pub mod moe;

pub use config::GateConfig;
pub use moe::{gen_neighbor_gate, Gate, GateError, NeighborGate, NeighborGateFactory, Scorer};

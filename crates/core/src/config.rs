use serde::{Deserialize, Serialize};

use crate::moe::{GateError, Result};

/// Top-k fixed by the neighbor gate.
pub const DEFAULT_TOP_K: usize = 2;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Shape of a gate: token width, experts per worker, number of workers and
/// how many experts each token is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Width of each token embedding.
    pub d_model: usize,
    /// Number of experts hosted on each worker.
    pub n_expert: usize,
    /// Number of workers in the ring.
    pub world_size: usize,
    /// Experts selected per token.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl GateConfig {
    /// Create a configuration with the default `top_k` of 2.
    pub fn new(d_model: usize, n_expert: usize, world_size: usize) -> Self {
        Self {
            d_model,
            n_expert,
            world_size,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override `top_k`.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Total number of experts across all workers.
    pub fn num_experts(&self) -> usize {
        self.n_expert * self.world_size
    }

    /// Reject zero-sized dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 {
            return Err(GateError::InvalidConfiguration(
                "d_model must be > 0".to_string(),
            ));
        }
        if self.n_expert == 0 {
            return Err(GateError::InvalidConfiguration(
                "n_expert must be > 0".to_string(),
            ));
        }
        if self.world_size == 0 {
            return Err(GateError::InvalidConfiguration(
                "world_size must be > 0".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(GateError::InvalidConfiguration(
                "top_k must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_top_k_to_two() {
        let cfg = GateConfig::new(16, 2, 4);
        assert_eq!(cfg.top_k, 2);
        assert_eq!(cfg.num_experts(), 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn with_top_k_overrides() {
        let cfg = GateConfig::new(16, 2, 4).with_top_k(3);
        assert_eq!(cfg.top_k, 3);
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        assert!(GateConfig::new(0, 2, 4).validate().is_err());
        assert!(GateConfig::new(16, 0, 4).validate().is_err());
        assert!(GateConfig::new(16, 2, 0).validate().is_err());
        assert!(GateConfig::new(16, 2, 4).with_top_k(0).validate().is_err());
    }

    #[test]
    fn deserialize_without_top_k_uses_default() {
        let cfg: GateConfig =
            serde_json::from_str(r#"{"d_model": 32, "n_expert": 4, "world_size": 8}"#).unwrap();
        assert_eq!(cfg, GateConfig::new(32, 4, 8));
    }
}

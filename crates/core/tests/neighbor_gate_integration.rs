//! Integration tests for the neighbor gate.
//!
//! Every test runs on CPU with small configurations. Scores come either from a
//! randomly initialized linear scorer or from a scorer that replays fixed
//! rows, so routing decisions can be checked exactly.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use moe_gate_core::distributed::LocalProcessGroup;
use moe_gate_core::moe::{
    count_by_gate, exchange_expert_counts, normalized_weights, top_k_with_indices, ExpertMap,
    NaiveScorer, Result, RingNeighborhood,
};
use moe_gate_core::{gen_neighbor_gate, Gate, GateConfig, GateError, NeighborGate, Scorer};

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Scorer that returns a fixed `[num_tokens, num_experts]` matrix.
struct ReplayScorer {
    scores: Tensor,
}

impl Scorer for ReplayScorer {
    fn score(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let num_tokens = hidden_states.dim(0)?;
        Ok(self.scores.narrow(0, 0, num_tokens)?)
    }

    fn num_experts(&self) -> usize {
        self.scores.dim(1).unwrap()
    }
}

fn random_gate(config: GateConfig, rank: usize) -> NeighborGate<NaiveScorer> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    gen_neighbor_gate(rank).build(&config, vb).unwrap()
}

fn random_tokens(num_tokens: usize, d_model: usize) -> Tensor {
    Tensor::randn(0f32, 1.0, (num_tokens, d_model), &Device::Cpu).unwrap()
}

fn sorted_rows(indices: &Tensor) -> Vec<Vec<u32>> {
    let mut rows: Vec<Vec<u32>> = indices.to_vec2().unwrap();
    for row in &mut rows {
        row.sort();
    }
    rows
}

// ─── Mask construction ───────────────────────────────────────────────────────

#[test]
fn mask_length_matches_ring_size() {
    for world_size in 1..9 {
        for n_expert in 2..4 {
            for rank in 0..world_size {
                let gate = random_gate(GateConfig::new(8, n_expert, world_size), rank);
                let expected = if world_size >= 3 {
                    n_expert * (world_size - 3)
                } else {
                    0
                };
                assert_eq!(
                    gate.mask().len(),
                    expected,
                    "world_size={world_size} n_expert={n_expert} rank={rank}"
                );
            }
        }
    }
}

#[test]
fn mask_membership_iff_owner_outside_ring() {
    let config = GateConfig::new(8, 3, 7);
    let experts = ExpertMap::new(config.n_expert, config.world_size).unwrap();

    for rank in 0..config.world_size {
        let gate = random_gate(config, rank);
        let hood = RingNeighborhood::new(rank, config.world_size).unwrap();
        for expert in 0..config.num_experts() {
            let masked = gate.mask().contains(&expert);
            assert_eq!(masked, !hood.contains(experts.owner(expert)));
        }
    }
}

#[test]
fn identical_parameters_give_identical_masks() {
    let config = GateConfig::new(8, 2, 6);
    for rank in 0..config.world_size {
        let a = random_gate(config, rank);
        let b = random_gate(config, rank);
        assert_eq!(a.mask(), b.mask());
    }
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn four_workers_rank_zero() {
    let config = GateConfig::new(16, 2, 4);
    let gate = random_gate(config, 0);

    assert_eq!(gate.valid_workers(), &[0, 1, 3]);
    assert_eq!(gate.mask(), &[4, 5]);

    for _ in 0..10 {
        let (indices, _) = gate.route(&random_tokens(32, 16)).unwrap();
        let indices: Vec<u32> = indices.flatten_all().unwrap().to_vec1().unwrap();
        assert!(indices.iter().all(|&i| i != 4 && i != 5));
    }
}

#[test]
fn three_workers_is_plain_top_two() {
    let device = Device::Cpu;
    let scores = Tensor::new(
        &[[0.3f32, 0.9, 0.1], [2.0, -1.0, 1.5], [-0.2, -0.1, -0.3]],
        &device,
    )
    .unwrap();
    let scorer = ReplayScorer {
        scores: scores.clone(),
    };
    let gate = gen_neighbor_gate(1)
        .build_with_scorer(scorer, &GateConfig::new(4, 1, 3))
        .unwrap();
    assert!(gate.mask().is_empty());

    let hidden = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
    let (indices, _) = gate.route(&hidden).unwrap();
    let (_, plain) = top_k_with_indices(&scores, 2).unwrap();

    assert_eq!(sorted_rows(&indices), sorted_rows(&plain));
    assert_eq!(sorted_rows(&indices), vec![vec![0, 1], vec![0, 2], vec![0, 1]]);
}

#[test]
fn routed_experts_stay_in_ring() {
    for world_size in [1usize, 2, 3, 4, 5, 8] {
        let config = GateConfig::new(12, 2, world_size);
        let experts = ExpertMap::new(config.n_expert, world_size).unwrap();
        for rank in 0..world_size {
            let gate = random_gate(config, rank);
            let hood = RingNeighborhood::new(rank, world_size).unwrap();

            let (indices, _) = gate.route(&random_tokens(16, 12)).unwrap();
            let indices: Vec<u32> = indices.flatten_all().unwrap().to_vec1().unwrap();
            for idx in indices {
                let owner = experts.owner(idx as usize);
                assert!(
                    hood.contains(owner),
                    "rank {rank}/{world_size} routed to expert {idx} on worker {owner}"
                );
            }
        }
    }
}

#[test]
fn scores_are_raw_values_at_selected_indices() {
    let device = Device::Cpu;
    let d_model = 8;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let scorer = NaiveScorer::new(d_model, 10, vb).unwrap();
    let hidden = random_tokens(6, d_model);
    let raw: Vec<Vec<f32>> = scorer.score(&hidden).unwrap().to_vec2().unwrap();

    let gate = gen_neighbor_gate(2)
        .build_with_scorer(scorer, &GateConfig::new(d_model, 2, 5))
        .unwrap();
    let (indices, scores) = gate.route(&hidden).unwrap();

    assert_eq!(scores.dims(), &[6, 2]);
    let indices: Vec<Vec<u32>> = indices.to_vec2().unwrap();
    let scores: Vec<Vec<f32>> = scores.to_vec2().unwrap();
    for t in 0..6 {
        for k in 0..2 {
            assert_eq!(scores[t][k], raw[t][indices[t][k] as usize]);
        }
    }
}

#[test]
fn normalized_weights_are_softmax_of_scores() {
    let gate = random_gate(GateConfig::new(8, 2, 4), 1);
    let (_, scores) = gate.route(&random_tokens(5, 8)).unwrap();

    let raw: Vec<Vec<f32>> = scores.to_vec2().unwrap();
    let weights: Vec<Vec<f32>> = normalized_weights(&scores).unwrap().to_vec2().unwrap();
    for (s, w) in raw.iter().zip(&weights) {
        let e0 = s[0].exp();
        let e1 = s[1].exp();
        assert!((w[0] - e0 / (e0 + e1)).abs() < 1e-5);
        assert!((w[0] + w[1] - 1.0).abs() < 1e-5);
    }
}

#[test]
fn selected_experts_beat_every_other_eligible_expert() {
    let device = Device::Cpu;
    let config = GateConfig::new(8, 2, 6);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let scorer = NaiveScorer::new(8, config.num_experts(), vb).unwrap();
    let hidden = random_tokens(12, 8);
    let raw: Vec<Vec<f32>> = scorer.score(&hidden).unwrap().to_vec2().unwrap();

    let gate = gen_neighbor_gate(0).build_with_scorer(scorer, &config).unwrap();
    let (indices, _) = gate.route(&hidden).unwrap();
    let indices: Vec<Vec<u32>> = indices.to_vec2().unwrap();

    for (t, row) in indices.iter().enumerate() {
        let chosen_min = row
            .iter()
            .map(|&i| raw[t][i as usize])
            .fold(f32::INFINITY, f32::min);
        for expert in 0..config.num_experts() {
            if gate.mask().contains(&expert) || row.contains(&(expert as u32)) {
                continue;
            }
            assert!(raw[t][expert] <= chosen_min);
        }
    }
}

// ─── Configuration errors ────────────────────────────────────────────────────

#[test]
fn factory_rejects_top_k_other_than_two() {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let err = gen_neighbor_gate(0)
        .build(&GateConfig::new(8, 2, 4).with_top_k(4), vb)
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidConfiguration(_)));
}

#[test]
fn single_expert_single_worker_rejected() {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let err = gen_neighbor_gate(0)
        .build(&GateConfig::new(8, 1, 1), vb)
        .unwrap_err();
    assert!(err.is_invalid_configuration());
}

#[test]
fn gate_from_process_group() {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let config = GateConfig::new(8, 2, 4);
    let scorer = NaiveScorer::new(8, config.num_experts(), vb).unwrap();
    let pg = LocalProcessGroup::with_rank(2, 4).unwrap();

    let gate = NeighborGate::for_process_group(scorer, config, &pg).unwrap();
    assert_eq!(gate.valid_workers(), &[1, 2, 3]);
    assert_eq!(gate.mask(), &[0, 1]);
}

// ─── Dispatcher bookkeeping ──────────────────────────────────────────────────

#[test]
fn counts_only_touch_neighbor_workers() {
    let config = GateConfig::new(8, 2, 6);
    let experts = ExpertMap::new(config.n_expert, config.world_size).unwrap();
    let gate = random_gate(config, 3);

    let (indices, _) = gate.route(&random_tokens(40, 8)).unwrap();
    let counts = count_by_gate(&indices, gate.num_experts()).unwrap();

    assert_eq!(counts.total(), 80);
    let per_worker = counts.worker_counts(&experts);
    assert_eq!(per_worker.iter().sum::<usize>(), 80);
    for (worker, &n) in per_worker.iter().enumerate() {
        if ![2, 3, 4].contains(&worker) {
            assert_eq!(n, 0, "worker {worker} received tokens");
        }
    }
}

#[test]
fn exchange_across_all_ranks() {
    let config = GateConfig::new(8, 2, 4);
    let experts = ExpertMap::new(config.n_expert, config.world_size).unwrap();

    // Every rank routes its own batch; concatenated counts stand in for the
    // all-gather the dispatcher performs.
    let mut all_counts = Vec::new();
    for rank in 0..config.world_size {
        let gate = random_gate(config, rank);
        let (indices, _) = gate.route(&random_tokens(10, 8)).unwrap();
        let counts = count_by_gate(&indices, gate.num_experts()).unwrap();
        all_counts.extend(counts.local_expert_count);
    }

    let mut received = 0;
    for rank in 0..config.world_size {
        let global = exchange_expert_counts(&all_counts, &experts, rank).unwrap();
        assert_eq!(global.len(), config.world_size * config.n_expert);
        received += global.iter().sum::<usize>();

        // Worker 2's ring is {1, 2, 3}, so it never sends to rank 0.
        if rank == 0 {
            assert_eq!(&global[2 * config.n_expert..3 * config.n_expert], &[0, 0]);
        }
    }
    assert_eq!(received, 4 * 10 * 2);
}

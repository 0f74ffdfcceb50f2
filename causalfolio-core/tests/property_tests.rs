//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Acyclicity: random edge insertion never yields a cycle
//! 2. Budget: optimized weights sum to 1, and are non-negative without shorts
//! 3. Linearity: doubling an intervention doubles every effect
//! 4. Determinism: simulate twice, identical output

use causalfolio_core::graph::{CausalGraph, EdgeSpec, NodeKind};
use causalfolio_core::optimize::{OptimizerConfig, PortfolioOptimizer, RiskModel};
use causalfolio_core::simulate::{EffectEstimate, EffectSimulator, Intervention};
use nalgebra::DMatrix;
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_edges(n: usize) -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
    prop::collection::vec((0..n, 0..n, -2.0..2.0_f64), 0..3 * n)
}

fn arb_problem() -> impl Strategy<Value = (usize, Vec<f64>, Vec<f64>)> {
    (2..6usize).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec(-1.0..1.0_f64, n * n),
            prop::collection::vec(-0.2..0.2_f64, n),
        )
    })
}

fn build_graph(n: usize, edges: &[(usize, usize, f64)]) -> CausalGraph {
    let mut g = CausalGraph::new();
    for i in 0..n {
        let kind = if i + 1 == n {
            NodeKind::Asset
        } else {
            NodeKind::Macro
        };
        g.add_node(format!("n{i}"), kind).unwrap();
    }
    for &(c, e, b) in edges {
        // Rejected insertions are expected; the graph must stay acyclic
        let _ = g.add_edge(&format!("n{c}"), &format!("n{e}"), EdgeSpec::fixed(b));
    }
    g
}

fn problem(n: usize, a: &[f64], mu: &[f64]) -> (Vec<EffectEstimate>, RiskModel) {
    let a = DMatrix::from_row_slice(n, n, a);
    let sigma = &a * a.transpose() / n as f64 + DMatrix::identity(n, n) * 0.01;
    let symbols: Vec<String> = (0..n).map(|i| format!("S{i}")).collect();
    let effects = symbols
        .iter()
        .zip(mu)
        .map(|(s, &m)| EffectEstimate {
            symbol: s.clone(),
            effect: m,
            std_error: 0.0,
            lower: m,
            upper: m,
        })
        .collect();
    (effects, RiskModel::new(symbols, sigma).unwrap())
}

fn optimizer() -> PortfolioOptimizer {
    PortfolioOptimizer::new(OptimizerConfig {
        annualization: 1.0,
        include_baseline: false,
        ..OptimizerConfig::default()
    })
}

// ── 1. Acyclicity ────────────────────────────────────────────────────

proptest! {
    /// Whatever edges are attempted, the topological order respects all kept edges.
    #[test]
    fn random_insertion_stays_acyclic(edges in arb_edges(6)) {
        let g = build_graph(6, &edges);
        let order = g.topological_order();
        prop_assert_eq!(order.len(), 6);
        let pos: Vec<usize> = (0..6)
            .map(|i| order.iter().position(|id| id.0 == i).unwrap())
            .collect();
        for edge in g.edges() {
            prop_assert!(pos[edge.cause.0] < pos[edge.effect.0]);
        }
    }
}

// ── 2. Budget ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn long_only_weights_valid((n, a, mu) in arb_problem()) {
        let (effects, risk) = problem(n, &a, &mu);
        let alloc = optimizer().optimize(&effects, &risk, false).unwrap();
        prop_assert!((alloc.weights.sum() - 1.0).abs() < 1e-6);
        for (_, w) in alloc.weights.iter() {
            prop_assert!(w >= 0.0);
        }
    }

    #[test]
    fn long_short_weights_sum_to_one((n, a, mu) in arb_problem()) {
        let (effects, risk) = problem(n, &a, &mu);
        let alloc = optimizer().optimize(&effects, &risk, true).unwrap();
        prop_assert!((alloc.weights.sum() - 1.0).abs() < 1e-6);
    }
}

// ── 3-4. Simulation ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn effects_scale_linearly(edges in arb_edges(5), magnitude in -1.0..1.0_f64) {
        let g = build_graph(5, &edges);
        let sim = EffectSimulator::default();
        let once = sim.propagate(&g, &Intervention::new("n0", magnitude)).unwrap();
        let twice = sim.propagate(&g, &Intervention::new("n0", 2.0 * magnitude)).unwrap();
        for (a, b) in once.iter().zip(&twice) {
            prop_assert!((2.0 * a.effect - b.effect).abs() <= 1e-9 * (1.0 + b.effect.abs()));
        }
    }

    #[test]
    fn simulate_is_deterministic(edges in arb_edges(5), magnitude in -1.0..1.0_f64) {
        let g = build_graph(5, &edges);
        let sim = EffectSimulator::default();
        let shock = Intervention::new("n0", magnitude);
        prop_assert_eq!(sim.simulate(&g, &shock).unwrap(), sim.simulate(&g, &shock).unwrap());
    }
}

//! Integration tests for causal graph fitting.
//!
//! Tests:
//! 1. Known coefficients are recovered from synthetic data
//! 2. Lagged hints regress on the lagged cause
//! 3. A hinted fit never invents edges outside the hints
//! 4. Kept edges are all significant; the benchmark gets no parents
//! 5. Too few joint observations fail before estimation

use causalfolio_core::data::sample::business_days;
use causalfolio_core::data::{sample_dataset, SeriesKind, TimeSeries};
use causalfolio_core::fit::{CausalGraphModel, FitConfig, FitError, TopologyHint};
use causalfolio_core::graph::NodeKind;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

/// Macro level series whose first differences are uniform noise.
fn random_walk(name: &str, n: usize, seed: u64) -> TimeSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let dates = business_days(start(), n);
    let mut level = 1.0;
    let values: Vec<f64> = (0..n)
        .map(|_| {
            level += rng.gen_range(-0.1..0.1);
            level
        })
        .collect();
    TimeSeries::from_pairs(name, SeriesKind::Macro, &dates, &values).unwrap()
}

fn returns_from(name: &str, dates: &[NaiveDate], values: &[f64]) -> TimeSeries {
    TimeSeries::from_pairs(name, SeriesKind::AssetReturn, dates, values).unwrap()
}

fn model() -> CausalGraphModel {
    CausalGraphModel::new(FitConfig::default())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn recovers_known_coefficient() {
    let x = random_walk("x", 201, 7);
    let dx = x.differences();
    let mut rng = StdRng::seed_from_u64(11);
    let y: Vec<f64> = dx
        .values()
        .iter()
        .map(|v| 0.5 * v + rng.gen_range(-0.001..0.001))
        .collect();
    let asset = returns_from("asset", &dx.dates(), &y);

    let graph = model().fit(&[x, asset], None).unwrap();
    let edge = graph.edge("x", "asset").expect("edge kept");
    assert!((edge.spec.coefficient - 0.5).abs() < 0.01, "{:?}", edge.spec);
    assert_eq!(edge.spec.observations, 200);
    assert!(edge.spec.p_value.unwrap() < 1e-6);
}

#[test]
fn lagged_hint_uses_earlier_observation() {
    let x = random_walk("x", 61, 3);
    let dx = x.differences();
    let dates = dx.dates();
    let lagged = dx.values();
    // y_t = 2 Δx_{t-1}
    let y: Vec<f64> = lagged.windows(2).map(|w| 2.0 * w[0]).collect();
    let asset = returns_from("asset", &dates[1..], &y);

    let hints = [TopologyHint::new("x", "asset").lagged(1)];
    let graph = model().fit(&[x, asset], Some(&hints)).unwrap();
    let edge = graph.edge("x", "asset").unwrap();
    assert_eq!(edge.spec.lag, 1);
    assert!((edge.spec.coefficient - 2.0).abs() < 1e-6);
    assert_eq!(edge.spec.observations, 59);
}

#[test]
fn hinted_fit_stays_inside_hints() {
    let series = sample_dataset().series().to_vec();
    let hints = [
        TopologyHint::new("fed_rate", "inflation"),
        TopologyHint::new("fed_rate", "asset_1"),
        TopologyHint::new("inflation", "asset_1"),
    ];
    let graph = model().fit(&series, Some(&hints)).unwrap();
    // Every variable stays a node
    assert_eq!(graph.node_count(), series.len());
    for edge in graph.edges() {
        let cause = &graph.node(edge.cause).name;
        let effect = &graph.node(edge.effect).name;
        assert!(
            hints.iter().any(|h| &h.cause == cause && &h.effect == effect),
            "unexpected edge {cause} -> {effect}"
        );
    }
    assert!(graph.edge("fed_rate", "inflation").is_some());
}

#[test]
fn default_fit_on_sample_keeps_significant_macro_edges() {
    let series = sample_dataset().series().to_vec();
    let config = FitConfig {
        benchmark: Some("MKT".into()),
        ..FitConfig::default()
    };
    let graph = CausalGraphModel::new(config).fit(&series, None).unwrap();

    let fed_inflation = graph.edge("fed_rate", "inflation").unwrap();
    assert!((fed_inflation.spec.coefficient - 0.4).abs() < 0.1);

    let mkt = graph.id("MKT").unwrap();
    assert_eq!(graph.incoming(mkt).count(), 0);
    for edge in graph.edges() {
        assert!(edge.spec.p_value.unwrap() < 0.05);
        assert_eq!(graph.node(edge.cause).kind, NodeKind::Macro);
    }
}

#[test]
fn fit_is_deterministic() {
    let series = sample_dataset().series().to_vec();
    let a = model().fit(&series, None).unwrap();
    let b = model().fit(&series, None).unwrap();
    assert_eq!(a, b);
}

#[test]
fn short_history_is_insufficient() {
    let x = random_walk("x", 11, 5);
    let dx = x.differences();
    let asset = returns_from("asset", &dx.dates(), &dx.values());
    match model().fit(&[x, asset], None) {
        Err(FitError::InsufficientData {
            cause,
            effect,
            observations,
            required,
        }) => {
            assert_eq!(cause, "x");
            assert_eq!(effect, "asset");
            assert_eq!(observations, 10);
            assert_eq!(required, 30);
        }
        other => panic!("expected InsufficientData, got {other:?}"),
    }
}

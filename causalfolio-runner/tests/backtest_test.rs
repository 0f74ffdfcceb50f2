//! Integration tests for the backtester on the sample dataset.
//!
//! Tests:
//! 1. Causal strategy end-to-end: aligned outputs, sane metrics
//! 2. No look-ahead: perturbing data after a rebalance leaves its weights unchanged
//! 3. Fewer than two rebalance dates is insufficient history
//! 4. Cancellation and timeout yield no result

use std::cell::Cell;
use std::time::Duration;

use chrono::NaiveDate;

use causalfolio_core::cancel::{CancelToken, Interrupted};
use causalfolio_core::data::{sample_dataset, Observation, SeriesKind, TimeSeries};
use causalfolio_core::optimize::PortfolioWeights;
use causalfolio_runner::{
    BacktestConfig, BacktestError, Backtester, BoxError, CausalStrategy, EngineConfig,
    FixedWeights, Rebalance,
};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn causal_strategy() -> CausalStrategy {
    CausalStrategy::from_config(&EngineConfig::default(), false)
}

/// Scale every value dated after `cutoff`.
fn perturbed_after(series: &[TimeSeries], cutoff: NaiveDate) -> Vec<TimeSeries> {
    series
        .iter()
        .map(|s| {
            let points = s
                .points()
                .iter()
                .map(|p| {
                    let value = if p.date > cutoff { p.value * 1.7 + 0.3 } else { p.value };
                    Observation::new(p.date, value)
                })
                .collect();
            TimeSeries::new(s.name(), s.kind(), points).unwrap()
        })
        .collect()
}

fn flat_returns(name: &str, n: usize) -> TimeSeries {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..n)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect();
    TimeSeries::from_pairs(name, SeriesKind::AssetReturn, &dates, &vec![0.001; n]).unwrap()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn causal_backtest_on_sample() {
    let dataset = sample_dataset();
    let result = Backtester::default()
        .run(dataset.series(), &causal_strategy(), "MKT")
        .unwrap();

    assert_eq!(result.returns.len(), result.dates.len());
    assert_eq!(result.benchmark_returns.len(), result.dates.len());
    assert_eq!(result.cumulative_returns.len(), result.dates.len());
    assert!(result.rebalances.len() >= 2);
    // First return is dated strictly after the first rebalance
    assert!(result.dates[0] > result.rebalances[0].date);
    for record in &result.rebalances {
        assert!((record.weights.sum() - 1.0).abs() < 1e-6);
        assert!(record.weights.iter().all(|(_, w)| w >= 0.0));
    }
    assert!(result.metrics.max_drawdown <= 0.0);
    assert!(result.metrics.volatility > 0.0);
    assert!(result.metrics.sharpe_ratio.is_finite());
}

#[test]
fn weights_ignore_data_after_the_rebalance() {
    let dataset = sample_dataset();
    let backtester = Backtester::default();
    let baseline = backtester
        .run(dataset.series(), &causal_strategy(), "MKT")
        .unwrap();
    let cutoff = baseline.rebalances[1].date;

    let perturbed = perturbed_after(dataset.series(), cutoff);
    let rerun = backtester
        .run(&perturbed, &causal_strategy(), "MKT")
        .unwrap();

    for (a, b) in baseline.rebalances.iter().zip(&rerun.rebalances) {
        if a.date > cutoff {
            break;
        }
        assert_eq!(a, b, "weights chosen on {} changed", a.date);
    }
    // The perturbation is visible afterwards
    assert_ne!(baseline.returns, rerun.returns);
}

#[test]
fn strategy_history_never_extends_past_the_rebalance_date() {
    let dataset = sample_dataset();
    let latest_seen = Cell::new(true);
    let record = |date: NaiveDate, history: &[TimeSeries]| -> Result<PortfolioWeights, BoxError> {
        let ok = history
            .iter()
            .all(|s| s.last_date().map_or(true, |last| last <= date));
        latest_seen.set(latest_seen.get() && ok);
        Ok(PortfolioWeights::equal(&["asset_1", "asset_2"]))
    };
    Backtester::default()
        .run(dataset.series(), &record, "MKT")
        .unwrap();
    assert!(latest_seen.get());
}

#[test]
fn single_rebalance_is_insufficient_history() {
    let series = vec![flat_returns("A", 65), flat_returns("MKT", 65)];
    let strategy = FixedWeights(PortfolioWeights::equal(&["A"]));
    match Backtester::default().run(&series, &strategy, "MKT") {
        Err(BacktestError::InsufficientHistory {
            rebalances,
            required,
        }) => {
            assert_eq!(rebalances, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected InsufficientHistory, got {other:?}"),
    }
}

#[test]
fn expired_deadline_times_out() {
    let dataset = sample_dataset();
    let cancel = CancelToken::with_timeout(Duration::ZERO);
    let result = Backtester::default().run_with_cancel(
        dataset.series(),
        &causal_strategy(),
        "MKT",
        &cancel,
    );
    assert!(matches!(
        result,
        Err(BacktestError::Interrupted(Interrupted::TimedOut))
    ));
}

#[test]
fn cancellation_between_rebalances_returns_nothing() {
    let series = vec![flat_returns("A", 40), flat_returns("MKT", 40)];
    let cancel = CancelToken::new();
    let calls = Cell::new(0);
    let strategy = |_: NaiveDate, _: &[TimeSeries]| -> Result<PortfolioWeights, BoxError> {
        calls.set(calls.get() + 1);
        if calls.get() == 2 {
            cancel.cancel();
        }
        Ok(PortfolioWeights::equal(&["A"]))
    };
    let backtester = Backtester::new(BacktestConfig {
        rebalance: Rebalance::Weekly,
        warmup_periods: 0,
        ..BacktestConfig::default()
    });
    let result = backtester.run_with_cancel(&series, &strategy, "MKT", &cancel);
    assert!(matches!(
        result,
        Err(BacktestError::Interrupted(Interrupted::Cancelled))
    ));
    assert_eq!(calls.get(), 2);
}

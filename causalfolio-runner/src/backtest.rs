//! Historical replay of a periodically rebalanced strategy against a benchmark.
//!
//! The timeline is the set of dates on which every investable asset and the
//! benchmark have a return. At each rebalance date the strategy sees every
//! input series truncated through that date and nothing later; its weights
//! apply to returns strictly after the rebalance date, up to and including
//! the next one.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use causalfolio_core::cancel::{CancelToken, Interrupted};
use causalfolio_core::data::TimeSeries;
use causalfolio_core::optimize::PortfolioWeights;

use crate::metrics::{self, PerformanceMetrics};

/// Current schema version for serialized results.
pub const SCHEMA_VERSION: u32 = 1;

/// Error type strategies may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(
        "insufficient history: {rebalances} rebalance date(s) available, at least {required} required"
    )]
    InsufficientHistory { rebalances: usize, required: usize },

    #[error("benchmark '{0}' not found among asset series")]
    BenchmarkNotFound(String),

    #[error("no investable assets besides the benchmark")]
    EmptyUniverse,

    #[error("strategy weighted unknown symbol '{symbol}' on {date}")]
    UnknownSymbol { symbol: String, date: NaiveDate },

    #[error("strategy failed on {date}: {source}")]
    Strategy {
        date: NaiveDate,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

// ─── Strategy ────────────────────────────────────────────────────────

/// Chooses target weights from the history available on `date`.
pub trait Strategy {
    fn weights(
        &self,
        date: NaiveDate,
        history: &[TimeSeries],
    ) -> Result<PortfolioWeights, BoxError>;
}

impl<F> Strategy for F
where
    F: Fn(NaiveDate, &[TimeSeries]) -> Result<PortfolioWeights, BoxError>,
{
    fn weights(
        &self,
        date: NaiveDate,
        history: &[TimeSeries],
    ) -> Result<PortfolioWeights, BoxError> {
        self(date, history)
    }
}

/// The same weights at every rebalance.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedWeights(pub PortfolioWeights);

impl Strategy for FixedWeights {
    fn weights(
        &self,
        _date: NaiveDate,
        _history: &[TimeSeries],
    ) -> Result<PortfolioWeights, BoxError> {
        Ok(self.0.clone())
    }
}

// ─── Configuration ───────────────────────────────────────────────────

/// Rebalance frequency over the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rebalance {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    /// Every N timeline periods; written `{ every = N }`.
    Every(usize),
}

impl Rebalance {
    fn period_key(self, index: usize, date: NaiveDate) -> (i32, u32) {
        match self {
            Rebalance::Daily => (index as i32, 0),
            Rebalance::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            Rebalance::Monthly => (date.year(), date.month()),
            Rebalance::Quarterly => (date.year(), (date.month() - 1) / 3),
            Rebalance::Every(_) => (index as i32, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub rebalance: Rebalance,
    /// Timeline periods skipped before the first rebalance.
    pub warmup_periods: usize,
    pub periods_per_year: f64,
    /// Annual risk-free rate for Sharpe and Sortino.
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            rebalance: Rebalance::Monthly,
            warmup_periods: 63,
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

// ─── Result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub date: NaiveDate,
    pub weights: PortfolioWeights,
}

/// Complete result of one backtest. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub benchmark: String,
    /// Dates strictly after the first rebalance, aligned with the return vectors.
    pub dates: Vec<NaiveDate>,
    pub returns: Vec<f64>,
    pub benchmark_returns: Vec<f64>,
    pub cumulative_returns: Vec<f64>,
    pub benchmark_cumulative_returns: Vec<f64>,
    pub metrics: PerformanceMetrics,
    pub benchmark_metrics: PerformanceMetrics,
    pub active_return: f64,
    pub information_ratio: f64,
    pub rebalances: Vec<RebalanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn rebalance_dates(&self) -> Vec<NaiveDate> {
        self.rebalances.iter().map(|r| r.date).collect()
    }

    pub fn with_dataset_hash(mut self, hash: impl Into<String>) -> Self {
        self.dataset_hash = Some(hash.into());
        self
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }
}

// ─── Backtester ──────────────────────────────────────────────────────

/// Returns of every series on the common timeline.
struct Aligned {
    dates: Vec<NaiveDate>,
    universe: Vec<String>,
    /// `assets[a][t]` is the return of `universe[a]` on `dates[t]`.
    assets: Vec<Vec<f64>>,
    benchmark: Vec<f64>,
}

fn align(series: &[TimeSeries], benchmark: &str) -> Result<Aligned, BacktestError> {
    let bench = series
        .iter()
        .find(|s| s.kind().is_asset() && s.name() == benchmark)
        .map(TimeSeries::simple_returns)
        .ok_or_else(|| BacktestError::BenchmarkNotFound(benchmark.to_string()))?;

    let mut assets: Vec<TimeSeries> = series
        .iter()
        .filter(|s| s.kind().is_asset() && s.name() != benchmark)
        .map(TimeSeries::simple_returns)
        .collect();
    if assets.is_empty() {
        return Err(BacktestError::EmptyUniverse);
    }
    assets.sort_by(|a, b| a.name().cmp(b.name()));

    let mut common: BTreeSet<NaiveDate> = bench.dates().into_iter().collect();
    for asset in &assets {
        let dates: BTreeSet<NaiveDate> = asset.dates().into_iter().collect();
        common = common.intersection(&dates).copied().collect();
    }
    let dates: Vec<NaiveDate> = common.into_iter().collect();

    let on_timeline = |s: &TimeSeries| -> Vec<f64> {
        dates.iter().filter_map(|&d| s.value_at(d)).collect()
    };
    Ok(Aligned {
        universe: assets.iter().map(|s| s.name().to_string()).collect(),
        assets: assets.iter().map(on_timeline).collect(),
        benchmark: on_timeline(&bench),
        dates,
    })
}

#[derive(Debug, Clone, Default)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Timeline indices on which the strategy is consulted.
    ///
    /// The last timeline date is never included.
    pub fn schedule(&self, dates: &[NaiveDate]) -> Vec<usize> {
        let warmup = self.config.warmup_periods;
        if dates.len() < 2 || warmup >= dates.len() - 1 {
            return Vec::new();
        }
        let rule = self.config.rebalance;
        let mut out = vec![warmup];
        for t in warmup + 1..dates.len() - 1 {
            let due = match rule {
                Rebalance::Every(n) => (t - warmup) % n.max(1) == 0,
                _ => rule.period_key(t, dates[t]) != rule.period_key(t - 1, dates[t - 1]),
            };
            if due {
                out.push(t);
            }
        }
        out
    }

    pub fn run(
        &self,
        series: &[TimeSeries],
        strategy: &dyn Strategy,
        benchmark: &str,
    ) -> Result<BacktestResult, BacktestError> {
        self.run_with_cancel(series, strategy, benchmark, &CancelToken::none())
    }

    pub fn run_with_cancel(
        &self,
        series: &[TimeSeries],
        strategy: &dyn Strategy,
        benchmark: &str,
        cancel: &CancelToken,
    ) -> Result<BacktestResult, BacktestError> {
        let aligned = align(series, benchmark)?;
        let schedule = self.schedule(&aligned.dates);
        if schedule.len() < 2 {
            return Err(BacktestError::InsufficientHistory {
                rebalances: schedule.len(),
                required: 2,
            });
        }

        let first = schedule[0];
        let n = aligned.dates.len();
        let mut returns = Vec::with_capacity(n - first - 1);
        let mut rebalances = Vec::with_capacity(schedule.len());

        for (k, &start) in schedule.iter().enumerate() {
            cancel.check()?;
            let date = aligned.dates[start];
            let history: Vec<TimeSeries> =
                series.iter().map(|s| s.truncated_through(date)).collect();

            let weights = strategy
                .weights(date, &history)
                .map_err(|source| match cancel.interruption() {
                    Some(i) => BacktestError::Interrupted(i),
                    None => BacktestError::Strategy { date, source },
                })?;
            let vector = self.weight_vector(&aligned.universe, &weights, date)?;

            let end = schedule.get(k + 1).copied().unwrap_or(n - 1);
            for t in start + 1..=end {
                let r: f64 = vector
                    .iter()
                    .zip(&aligned.assets)
                    .map(|(w, asset)| w * asset[t])
                    .sum();
                returns.push(r);
            }
            rebalances.push(RebalanceRecord { date, weights });
        }
        cancel.check()?;

        let dates = aligned.dates[first + 1..].to_vec();
        let benchmark_returns = aligned.benchmark[first + 1..].to_vec();
        let periods = self.config.periods_per_year;
        let rf = self.config.risk_free_rate;
        let result = BacktestResult {
            schema_version: SCHEMA_VERSION,
            benchmark: benchmark.to_string(),
            cumulative_returns: metrics::cumulative_returns(&returns),
            benchmark_cumulative_returns: metrics::cumulative_returns(&benchmark_returns),
            metrics: PerformanceMetrics::compute(&returns, periods, rf),
            benchmark_metrics: PerformanceMetrics::compute(&benchmark_returns, periods, rf),
            active_return: metrics::active_return(&returns, &benchmark_returns, periods),
            information_ratio: metrics::information_ratio(&returns, &benchmark_returns, periods),
            dates,
            returns,
            benchmark_returns,
            rebalances,
            dataset_hash: None,
            config_hash: None,
        };

        info!(
            benchmark,
            rebalances = result.rebalances.len(),
            periods = result.returns.len(),
            sharpe = result.metrics.sharpe_ratio,
            max_drawdown = result.metrics.max_drawdown,
            "backtest completed"
        );
        Ok(result)
    }

    fn weight_vector(
        &self,
        universe: &[String],
        weights: &PortfolioWeights,
        date: NaiveDate,
    ) -> Result<Vec<f64>, BacktestError> {
        for (symbol, w) in weights.iter() {
            if !universe.iter().any(|u| u == symbol) {
                return Err(BacktestError::UnknownSymbol {
                    symbol: symbol.to_string(),
                    date,
                });
            }
            if !w.is_finite() {
                return Err(BacktestError::Strategy {
                    date,
                    source: format!("non-finite weight for '{symbol}'").into(),
                });
            }
        }
        Ok(universe.iter().map(|s| weights.get(s)).collect())
    }
}

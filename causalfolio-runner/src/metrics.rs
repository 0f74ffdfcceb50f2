//! Performance metrics — pure functions over periodic return series.
//!
//! Every metric takes simple returns (0.01 = +1%) and the number of periods
//! per year. No dependency on the backtester or the data store.

use serde::{Deserialize, Serialize};

use causalfolio_core::stats::{mean, std_dev};

/// Headline metrics for one return series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub total_return: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
}

impl PerformanceMetrics {
    /// `risk_free_rate` is annual; it is spread evenly over the periods.
    pub fn compute(returns: &[f64], periods_per_year: f64, risk_free_rate: f64) -> Self {
        Self {
            sharpe_ratio: sharpe_ratio(returns, risk_free_rate, periods_per_year),
            max_drawdown: max_drawdown(returns),
            annualized_return: annualized_return(returns, periods_per_year),
            volatility: volatility(returns, periods_per_year),
            total_return: total_return(returns),
            sortino_ratio: sortino_ratio(returns, risk_free_rate, periods_per_year),
            calmar_ratio: calmar_ratio(returns, periods_per_year),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Running product of `1 + r`, starting from the first return.
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |growth, r| {
            *growth *= 1.0 + r;
            Some(*growth)
        })
        .collect()
}

/// `Π(1 + r) - 1`.
pub fn total_return(returns: &[f64]) -> f64 {
    returns.iter().map(|r| 1.0 + r).product::<f64>() - 1.0
}

/// Geometric annualization: `Π(1 + r)^(P / n) - 1`.
///
/// A wiped-out portfolio annualizes to -1.
pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let growth = 1.0 + total_return(returns);
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(periods_per_year / returns.len() as f64) - 1.0
}

/// `std(r) × sqrt(P)`.
pub fn volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    std_dev(returns) * periods_per_year.sqrt()
}

/// Sharpe = mean(r - rf/P) / std(r) × sqrt(P).
///
/// Returns 0.0 if variance is zero or fewer than 2 periods.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let per_period_rf = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - per_period_rf).collect();
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean(&excess) / std * periods_per_year.sqrt()
}

/// Sortino ratio (downside deviation only).
///
/// Returns 0.0 if there is no downside or fewer than 2 periods.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let per_period_rf = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - per_period_rf).collect();

    let downside_sq: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean(&excess) / downside_std * periods_per_year.sqrt()
}

/// Maximum drawdown as a non-positive fraction (-0.15 = 15% drawdown).
///
/// The curve starts at 1.0 before the first return, so a loss on the very
/// first period counts.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;
    for growth in cumulative_returns(returns) {
        peak = peak.max(growth);
        if peak > 0.0 {
            max_dd = max_dd.min(growth / peak - 1.0);
        }
    }
    max_dd
}

/// Calmar = annualized return / |max drawdown|.
///
/// Returns 0.0 when there is no drawdown.
pub fn calmar_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    let dd = max_drawdown(returns);
    if dd >= 0.0 {
        return 0.0;
    }
    annualized_return(returns, periods_per_year) / dd.abs()
}

// ─── Comparison against a benchmark ─────────────────────────────────

/// Annualized portfolio return minus annualized benchmark return.
pub fn active_return(portfolio: &[f64], benchmark: &[f64], periods_per_year: f64) -> f64 {
    annualized_return(portfolio, periods_per_year) - annualized_return(benchmark, periods_per_year)
}

/// mean(active) / std(active) × sqrt(P), over aligned periods.
pub fn information_ratio(portfolio: &[f64], benchmark: &[f64], periods_per_year: f64) -> f64 {
    let active: Vec<f64> = portfolio
        .iter()
        .zip(benchmark)
        .map(|(p, b)| p - b)
        .collect();
    if active.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&active);
    if std < 1e-15 {
        return 0.0;
    }
    mean(&active) / std * periods_per_year.sqrt()
}

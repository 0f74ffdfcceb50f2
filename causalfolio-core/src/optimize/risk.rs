//! Sample covariance risk model and its diagonal-shrinkage regularization.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};

use super::OptimizeError;
use crate::data::TimeSeries;
use crate::linalg::stable_cholesky;

/// Diagonal entries are floored here before shrinkage.
const DIAGONAL_FLOOR: f64 = 1e-12;

/// Asset covariance plus per-asset mean return, over common dates.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskModel {
    symbols: Vec<String>,
    means: DVector<f64>,
    covariance: DMatrix<f64>,
    observations: usize,
}

impl RiskModel {
    /// Build from an explicit covariance matrix (means default to zero).
    pub fn new(symbols: Vec<String>, covariance: DMatrix<f64>) -> Result<Self, OptimizeError> {
        let n = symbols.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(OptimizeError::OptimizationFailed(format!(
                "covariance is {}x{} for {n} symbols",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        Ok(Self {
            symbols,
            means: DVector::zeros(n),
            covariance,
            observations: 0,
        })
    }

    /// Sample covariance (n - 1) of `symbols` over the dates where every one
    /// of them has a return.
    pub fn from_returns(returns: &[TimeSeries], symbols: &[String]) -> Result<Self, OptimizeError> {
        let mut selected = Vec::with_capacity(symbols.len());
        for sym in symbols {
            let series = returns
                .iter()
                .find(|s| s.name() == sym)
                .ok_or_else(|| OptimizeError::UnknownSymbol(sym.clone()))?;
            selected.push(series);
        }
        if selected.is_empty() {
            return Err(OptimizeError::EmptyUniverse);
        }

        let mut common: BTreeSet<NaiveDate> = selected[0].points().iter().map(|p| p.date).collect();
        for s in &selected[1..] {
            let dates: BTreeSet<NaiveDate> = s.points().iter().map(|p| p.date).collect();
            common = common.intersection(&dates).copied().collect();
        }
        let n = common.len();
        if n < 2 {
            return Err(OptimizeError::InsufficientHistory {
                observations: n,
                required: 2,
            });
        }

        let k = selected.len();
        let mut data = DMatrix::zeros(n, k);
        for (j, s) in selected.iter().enumerate() {
            for (i, date) in common.iter().enumerate() {
                data[(i, j)] = s.value_at(*date).unwrap_or(0.0);
            }
        }

        let means = DVector::from_fn(k, |j, _| data.column(j).mean());
        let mut centered = data;
        for j in 0..k {
            let m = means[j];
            centered.column_mut(j).add_scalar_mut(-m);
        }
        let covariance = (centered.transpose() * &centered) / (n - 1) as f64;

        Ok(Self {
            symbols: symbols.to_vec(),
            means,
            covariance,
            observations: n,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn means(&self) -> &DVector<f64> {
        &self.means
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Covariance and means restricted to `symbols`, in that order.
    pub(crate) fn select(
        &self,
        symbols: &[&str],
    ) -> Result<(DMatrix<f64>, DVector<f64>), OptimizeError> {
        let idx: Vec<usize> = symbols
            .iter()
            .map(|s| {
                self.index(s)
                    .ok_or_else(|| OptimizeError::UnknownSymbol(s.to_string()))
            })
            .collect::<Result<_, _>>()?;
        let k = idx.len();
        let cov = DMatrix::from_fn(k, k, |i, j| self.covariance[(idx[i], idx[j])]);
        let means = DVector::from_fn(k, |i, _| self.means[idx[i]]);
        Ok((cov, means))
    }
}

/// Return `sigma` unchanged when it factorizes, otherwise the first
/// `(1 - δ) Σ + δ diag(Σ)` for δ = 0.1, 0.2, … that does, with δ.
pub(crate) fn regularize(
    sigma: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, Option<f64>), OptimizeError> {
    if stable_cholesky(sigma).is_some() {
        return Ok((sigma.clone(), None));
    }
    let n = sigma.nrows();
    let diag = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            sigma[(i, i)].max(DIAGONAL_FLOOR)
        } else {
            0.0
        }
    });
    for step in 1..=10 {
        let delta = step as f64 / 10.0;
        let shrunk = sigma * (1.0 - delta) + &diag * delta;
        if stable_cholesky(&shrunk).is_some() {
            return Ok((shrunk, Some(delta)));
        }
    }
    Err(OptimizeError::OptimizationFailed(
        "covariance could not be regularized".to_string(),
    ))
}

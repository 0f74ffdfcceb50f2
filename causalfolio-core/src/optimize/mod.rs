//! Portfolio construction from simulated effects.
//!
//! Mean-variance: maximize `μᵀw − λ wᵀΣw` subject to full investment and,
//! when shorts are disallowed, `w ≥ 0`. `μ` is the historical mean plus the
//! simulated effect; both it and `Σ` are annualized. A covariance that does
//! not factorize is shrunk toward its diagonal and the shrinkage reported.
//!
//! Effect-softmax: weights proportional to `exp(effect / temperature)`.

pub mod risk;
mod solver;

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::{CancelToken, Interrupted};
use crate::simulate::EffectEstimate;

pub use risk::RiskModel;

const SUM_TOL: f64 = 1e-6;
const CLAMP_TOL: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("insufficient history: {observations} common observations, {required} required")]
    InsufficientHistory { observations: usize, required: usize },

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("empty universe: no assets to allocate")]
    EmptyUniverse,

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

// ─── Weights ─────────────────────────────────────────────────────────

/// Symbol → weight, ordered by symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioWeights(BTreeMap<String, f64>);

impl PortfolioWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self(weights)
    }

    /// Equal weight across `symbols`.
    pub fn equal<S: AsRef<str>>(symbols: &[S]) -> Self {
        let w = 1.0 / symbols.len().max(1) as f64;
        Self(symbols.iter().map(|s| (s.as_ref().to_string(), w)).collect())
    }

    pub fn get(&self, symbol: &str) -> f64 {
        self.0.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, f64> {
        self.0
    }
}

impl FromIterator<(String, f64)> for PortfolioWeights {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Optimizer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub weights: PortfolioWeights,
    /// `μᵀw`, annualized.
    pub expected_return: f64,
    /// `sqrt(wᵀΣw)`, annualized.
    pub risk: f64,
    /// Diagonal shrinkage intensity, when the covariance needed it.
    pub shrinkage: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    #[default]
    MeanVariance,
    EffectSoftmax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub method: AllocationMethod,
    pub risk_aversion: f64,
    pub max_iterations: usize,
    /// Add the historical mean return to each simulated effect.
    pub include_baseline: bool,
    /// Scale applied to means, effects and covariance (252 for daily data).
    pub annualization: f64,
    pub softmax_temperature: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: AllocationMethod::MeanVariance,
            risk_aversion: 1.0,
            max_iterations: 500,
            include_baseline: true,
            annualization: 252.0,
            softmax_temperature: 0.01,
        }
    }
}

// ─── Optimizer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        effects: &[EffectEstimate],
        risk_model: &RiskModel,
        allow_short: bool,
    ) -> Result<Allocation, OptimizeError> {
        self.optimize_with_cancel(effects, risk_model, allow_short, &CancelToken::none())
    }

    pub fn optimize_with_cancel(
        &self,
        effects: &[EffectEstimate],
        risk_model: &RiskModel,
        allow_short: bool,
        cancel: &CancelToken,
    ) -> Result<Allocation, OptimizeError> {
        if effects.is_empty() {
            return Err(OptimizeError::EmptyUniverse);
        }
        let mut seen = BTreeSet::new();
        for e in effects {
            if !seen.insert(e.symbol.as_str()) {
                return Err(OptimizeError::OptimizationFailed(format!(
                    "symbol '{}' listed twice",
                    e.symbol
                )));
            }
        }
        let symbols: Vec<&str> = effects.iter().map(|e| e.symbol.as_str()).collect();
        let (sigma, baseline) = risk_model.select(&symbols)?;

        let scale = self.config.annualization;
        let mu = DVector::from_fn(effects.len(), |i, _| {
            let base = if self.config.include_baseline {
                baseline[i]
            } else {
                0.0
            };
            (base + effects[i].effect) * scale
        });
        if mu.iter().any(|v| !v.is_finite()) {
            return Err(OptimizeError::OptimizationFailed(
                "non-finite expected return".to_string(),
            ));
        }

        let (sigma, shrinkage) = risk::regularize(&(sigma * scale))?;
        let mut warnings = Vec::new();
        if let Some(delta) = shrinkage {
            let msg = format!(
                "covariance was not positive definite; shrunk toward its diagonal (intensity {delta:.1})"
            );
            warn!(shrinkage = delta, "{msg}");
            warnings.push(msg);
        }

        let raw = match self.config.method {
            AllocationMethod::MeanVariance => {
                let q = &sigma * (2.0 * self.config.risk_aversion);
                if allow_short {
                    solver::solve_long_short(&q, &mu)?
                } else {
                    solver::solve_long_only(&q, &mu, self.config.max_iterations, cancel)?
                }
            }
            AllocationMethod::EffectSoftmax => {
                effect_softmax(effects, allow_short, self.config.softmax_temperature)?
            }
        };
        cancel.check()?;

        let w = finalize(raw, allow_short)?;
        let expected_return = mu.dot(&w);
        let risk = (w.transpose() * &sigma * &w)[(0, 0)].max(0.0).sqrt();
        debug!(
            assets = effects.len(),
            allow_short,
            expected_return,
            risk,
            "allocation computed"
        );

        Ok(Allocation {
            weights: symbols
                .iter()
                .zip(w.iter())
                .map(|(s, &v)| (s.to_string(), v))
                .collect(),
            expected_return,
            risk,
            shrinkage,
            warnings,
        })
    }
}

/// `w_i ∝ exp(effect_i / t)`; negative effects count as zero when shorts
/// are disallowed.
fn effect_softmax(
    effects: &[EffectEstimate],
    allow_short: bool,
    temperature: f64,
) -> Result<DVector<f64>, OptimizeError> {
    if !(temperature > 0.0) {
        return Err(OptimizeError::OptimizationFailed(format!(
            "softmax temperature must be positive, got {temperature}"
        )));
    }
    let scores: Vec<f64> = effects
        .iter()
        .map(|e| {
            let x = if allow_short { e.effect } else { e.effect.max(0.0) };
            x / temperature
        })
        .collect();
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    Ok(DVector::from_iterator(exp.len(), exp.iter().map(|e| e / total)))
}

/// Enforce the output contract: finite, fully invested, and non-negative
/// without shorts (tiny negatives are clamped).
fn finalize(mut w: DVector<f64>, allow_short: bool) -> Result<DVector<f64>, OptimizeError> {
    if w.iter().any(|v| !v.is_finite()) {
        return Err(OptimizeError::OptimizationFailed(
            "solver produced non-finite weights".to_string(),
        ));
    }
    if !allow_short {
        for v in w.iter_mut() {
            if *v < -CLAMP_TOL {
                return Err(OptimizeError::OptimizationFailed(format!(
                    "negative weight {v} without short selling"
                )));
            }
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        let total = w.sum();
        if total <= 0.0 {
            return Err(OptimizeError::OptimizationFailed(
                "weights sum to zero".to_string(),
            ));
        }
        w /= total;
    }
    if (w.sum() - 1.0).abs() > SUM_TOL {
        return Err(OptimizeError::OptimizationFailed(format!(
            "weights sum to {}",
            w.sum()
        )));
    }
    Ok(w)
}

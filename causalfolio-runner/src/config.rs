//! Engine configuration, loaded from TOML.
//!
//! Every section is optional; a missing section or key takes its default.
//!
//! ```toml
//! [data]
//! benchmark_symbol = "MKT"
//!
//! [graph]
//! significance = 0.05
//!
//! [[graph.hints]]
//! cause = "fed_rate"
//! effect = "asset_1"
//!
//! [portfolio]
//! risk_aversion = 2.0
//!
//! [backtest]
//! rebalance = { every = 21 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use causalfolio_core::data::sample::SAMPLE_BENCHMARK;
use causalfolio_core::data::IngestConfig;
use causalfolio_core::fit::{FitConfig, MacroTransform, TopologyHint};
use causalfolio_core::optimize::{AllocationMethod, OptimizerConfig};
use causalfolio_core::simulate::SimulationConfig;

use crate::backtest::{BacktestConfig, Rebalance};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("cannot hash config: {0}")]
    Hash(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data: DataConfig,
    pub graph: GraphConfig,
    pub simulation: SimulationSection,
    pub portfolio: PortfolioConfig,
    pub backtest: BacktestConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn open_unit(name: &str, v: f64) -> Result<(), ConfigError> {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be in (0, 1), got {v}")))
            }
        }
        fn positive(name: &str, v: f64) -> Result<(), ConfigError> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be positive, got {v}")))
            }
        }

        if self.data.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "data.max_upload_bytes must be positive".into(),
            ));
        }
        if self.data.benchmark_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("data.benchmark_symbol is empty".into()));
        }
        open_unit("graph.significance", self.graph.significance)?;
        if self.graph.min_observations < 3 {
            return Err(ConfigError::Invalid(format!(
                "graph.min_observations must be at least 3, got {}",
                self.graph.min_observations
            )));
        }
        if !(self.graph.ridge_lambda >= 0.0 && self.graph.ridge_lambda.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "graph.ridge_lambda must be non-negative, got {}",
                self.graph.ridge_lambda
            )));
        }
        if self.simulation.intervention_node.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "simulation.intervention_node is empty".into(),
            ));
        }
        open_unit("simulation.confidence_level", self.simulation.confidence_level)?;
        positive("portfolio.risk_aversion", self.portfolio.risk_aversion)?;
        positive("portfolio.softmax_temperature", self.portfolio.softmax_temperature)?;
        if !self.portfolio.scenario_shock.is_finite() {
            return Err(ConfigError::Invalid(
                "portfolio.scenario_shock must be finite".into(),
            ));
        }
        if self.portfolio.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "portfolio.max_iterations must be positive".into(),
            ));
        }
        positive("backtest.periods_per_year", self.backtest.periods_per_year)?;
        if !self.backtest.risk_free_rate.is_finite() {
            return Err(ConfigError::Invalid(
                "backtest.risk_free_rate must be finite".into(),
            ));
        }
        if self.backtest.rebalance == Rebalance::Every(0) {
            return Err(ConfigError::Invalid(
                "backtest.rebalance every must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Content hash of the effective configuration.
    ///
    /// Two sessions with identical configs share the same hash.
    pub fn config_hash(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            macro_variables: self.data.macro_variables.clone(),
        }
    }

    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            significance: self.graph.significance,
            min_observations: self.graph.min_observations,
            ridge_lambda: self.graph.ridge_lambda,
            macro_transform: self.graph.macro_transform,
            macro_order: self.graph.macro_order.clone(),
            benchmark: Some(self.data.benchmark_symbol.clone()),
        }
    }

    /// Configured topology hints; `None` means the default topology.
    pub fn hints(&self) -> Option<&[TopologyHint]> {
        if self.graph.hints.is_empty() {
            None
        } else {
            Some(&self.graph.hints)
        }
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            confidence_level: self.simulation.confidence_level,
        }
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            method: self.portfolio.method,
            risk_aversion: self.portfolio.risk_aversion,
            max_iterations: self.portfolio.max_iterations,
            include_baseline: self.portfolio.include_baseline,
            annualization: self.backtest.periods_per_year,
            softmax_temperature: self.portfolio.softmax_temperature,
        }
    }
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Upload size limit in bytes.
    pub max_upload_bytes: usize,
    pub macro_variables: Vec<String>,
    pub benchmark_symbol: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            macro_variables: IngestConfig::default().macro_variables,
            benchmark_symbol: SAMPLE_BENCHMARK.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub significance: f64,
    pub min_observations: usize,
    pub ridge_lambda: f64,
    pub macro_transform: MacroTransform,
    pub macro_order: Vec<String>,
    pub hints: Vec<TopologyHint>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        let fit = FitConfig::default();
        Self {
            significance: fit.significance,
            min_observations: fit.min_observations,
            ridge_lambda: fit.ridge_lambda,
            macro_transform: fit.macro_transform,
            macro_order: fit.macro_order,
            hints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Node shocked by the `simulate` operation.
    pub intervention_node: String,
    pub confidence_level: f64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            intervention_node: "fed_rate".to_string(),
            confidence_level: SimulationConfig::default().confidence_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub method: AllocationMethod,
    pub risk_aversion: f64,
    pub max_iterations: usize,
    pub include_baseline: bool,
    /// Shock on the intervention node used when building a portfolio.
    pub scenario_shock: f64,
    pub softmax_temperature: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        let opt = OptimizerConfig::default();
        Self {
            method: opt.method,
            risk_aversion: opt.risk_aversion,
            max_iterations: opt.max_iterations,
            include_baseline: opt.include_baseline,
            scenario_shock: 0.25,
            softmax_temperature: opt.softmax_temperature,
        }
    }
}

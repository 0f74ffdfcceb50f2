//! The causal pipeline as a strategy: fit → simulate → optimize.

use chrono::NaiveDate;

use causalfolio_core::cancel::CancelToken;
use causalfolio_core::data::TimeSeries;
use causalfolio_core::fit::{CausalGraphModel, TopologyHint};
use causalfolio_core::graph::CausalGraph;
use causalfolio_core::optimize::{Allocation, PortfolioOptimizer, PortfolioWeights, RiskModel};
use causalfolio_core::simulate::{EffectEstimate, EffectSimulator, Intervention};

use crate::backtest::{BoxError, Strategy};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Allocates on the simulated effect of a fixed scenario shock.
///
/// As a backtest strategy it refits the graph on each rebalance's history.
#[derive(Debug, Clone)]
pub struct CausalStrategy {
    model: CausalGraphModel,
    hints: Option<Vec<TopologyHint>>,
    simulator: EffectSimulator,
    optimizer: PortfolioOptimizer,
    intervention: Intervention,
    benchmark: String,
    allow_short: bool,
    cancel: CancelToken,
}

impl CausalStrategy {
    pub fn from_config(config: &EngineConfig, allow_short: bool) -> Self {
        Self {
            model: CausalGraphModel::new(config.fit_config()),
            hints: config.hints().map(<[TopologyHint]>::to_vec),
            simulator: EffectSimulator::new(config.simulation_config()),
            optimizer: PortfolioOptimizer::new(config.optimizer_config()),
            intervention: Intervention::new(
                config.simulation.intervention_node.clone(),
                config.portfolio.scenario_shock,
            ),
            benchmark: config.data.benchmark_symbol.clone(),
            allow_short,
            cancel: CancelToken::none(),
        }
    }

    /// Share `cancel` with every fit and solve this strategy runs.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn intervention(&self) -> &Intervention {
        &self.intervention
    }

    /// Fit a fresh graph on `history`.
    pub fn fit(&self, history: &[TimeSeries]) -> Result<CausalGraph, EngineError> {
        Ok(self
            .model
            .fit_with_cancel(history, self.hints.as_deref(), &self.cancel)?)
    }

    /// Per-asset effects of `intervention`, restricted to investable assets.
    pub fn effects(
        &self,
        graph: &CausalGraph,
        history: &[TimeSeries],
        intervention: &Intervention,
    ) -> Result<Vec<EffectEstimate>, EngineError> {
        let universe = self.universe(history);
        Ok(self
            .simulator
            .simulate(graph, intervention)?
            .into_iter()
            .filter(|e| universe.contains(&e.symbol))
            .collect())
    }

    /// Allocate using an already fitted graph.
    pub fn allocate_on(
        &self,
        graph: &CausalGraph,
        history: &[TimeSeries],
    ) -> Result<Allocation, EngineError> {
        let effects = self.effects(graph, history, &self.intervention)?;
        let returns: Vec<TimeSeries> = history
            .iter()
            .filter(|s| s.kind().is_asset())
            .map(TimeSeries::simple_returns)
            .collect();
        let symbols: Vec<String> = effects.iter().map(|e| e.symbol.clone()).collect();
        let risk = RiskModel::from_returns(&returns, &symbols)?;
        Ok(self
            .optimizer
            .optimize_with_cancel(&effects, &risk, self.allow_short, &self.cancel)?)
    }

    pub fn allocate(&self, history: &[TimeSeries]) -> Result<Allocation, EngineError> {
        let graph = self.fit(history)?;
        self.allocate_on(&graph, history)
    }

    fn universe(&self, history: &[TimeSeries]) -> Vec<String> {
        history
            .iter()
            .filter(|s| s.kind().is_asset() && s.name() != self.benchmark)
            .map(|s| s.name().to_string())
            .collect()
    }
}

impl Strategy for CausalStrategy {
    fn weights(
        &self,
        _date: NaiveDate,
        history: &[TimeSeries],
    ) -> Result<PortfolioWeights, BoxError> {
        Ok(self.allocate(history)?.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causalfolio_core::data::sample_dataset;

    #[test]
    fn sample_allocation_covers_universe() {
        let dataset = sample_dataset();
        let strategy = CausalStrategy::from_config(&EngineConfig::default(), false);
        let alloc = strategy.allocate(dataset.series()).unwrap();
        let symbols: Vec<&str> = alloc.weights.symbols().collect();
        assert_eq!(symbols, ["asset_1", "asset_2", "asset_3", "asset_4", "asset_5"]);
        assert!((alloc.weights.sum() - 1.0).abs() < 1e-6);
        assert!(alloc.weights.iter().all(|(_, w)| w >= 0.0));
    }

    #[test]
    fn cancelled_allocation_is_interrupted() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let strategy =
            CausalStrategy::from_config(&EngineConfig::default(), false).with_cancel(cancel);
        let err = strategy.allocate(sample_dataset().series()).unwrap_err();
        assert!(err.interruption().is_some(), "{err}");
    }
}

//! Counterfactual effect propagation.
//!
//! An intervention fixes one node's change (`do(node += magnitude)`) and
//! pushes it through the graph in topological order. Each edge contributes
//! `coefficient × upstream effect`; contributions at a node add up, so the
//! total effect is the sum of path products over every path from the
//! intervened node.
//!
//! Uncertainty treats every edge coefficient and every upstream effect as
//! independent estimates. For one contribution `b · x`:
//!
//! ```text
//! Var(b · x) = b² Var(x) + x² Var(b) + Var(b) Var(x)
//! ```
//!
//! and variances at a node add. Correlation between coefficient estimates
//! is ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{CausalGraph, NodeKind};
use crate::stats::normal_quantile;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulateError {
    #[error("node not found: '{0}' is not in the graph")]
    NodeNotFound(String),

    #[error("invalid intervention magnitude: {0}")]
    InvalidMagnitude(f64),

    #[error("confidence level must lie in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

/// Exogenous change applied to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub node: String,
    pub magnitude: f64,
}

impl Intervention {
    pub fn new(node: impl Into<String>, magnitude: f64) -> Self {
        Self {
            node: node.into(),
            magnitude,
        }
    }
}

/// Propagated effect at any node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEffect {
    pub name: String,
    pub kind: NodeKind,
    pub effect: f64,
    pub variance: f64,
}

/// Expected return delta for one asset, with its confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    pub symbol: String,
    pub effect: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub confidence_level: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EffectSimulator {
    config: SimulationConfig,
}

impl EffectSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Effect and variance at every node, in node insertion order.
    pub fn propagate(
        &self,
        graph: &CausalGraph,
        intervention: &Intervention,
    ) -> Result<Vec<NodeEffect>, SimulateError> {
        let source = graph
            .id(&intervention.node)
            .ok_or_else(|| SimulateError::NodeNotFound(intervention.node.clone()))?;
        if !intervention.magnitude.is_finite() {
            return Err(SimulateError::InvalidMagnitude(intervention.magnitude));
        }

        let reachable = graph.reachable(source);
        let mut effect = vec![0.0; graph.node_count()];
        let mut variance = vec![0.0; graph.node_count()];
        effect[source.0] = intervention.magnitude;

        for node in graph.topological_order() {
            if node == source || !reachable.contains(&node) {
                continue;
            }
            let (mut mean, mut var) = (0.0, 0.0);
            for edge in graph.incoming(node) {
                if !reachable.contains(&edge.cause) {
                    continue;
                }
                let b = edge.spec.coefficient;
                let s2 = edge.spec.std_error * edge.spec.std_error;
                let x = effect[edge.cause.0];
                let v = variance[edge.cause.0];
                mean += b * x;
                var += b * b * v + x * x * s2 + s2 * v;
            }
            effect[node.0] = mean;
            variance[node.0] = var;
        }

        Ok(graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| NodeEffect {
                name: n.name.clone(),
                kind: n.kind,
                effect: effect[i],
                variance: variance[i],
            })
            .collect())
    }

    /// Per-asset expected return deltas with confidence intervals.
    pub fn simulate(
        &self,
        graph: &CausalGraph,
        intervention: &Intervention,
    ) -> Result<Vec<EffectEstimate>, SimulateError> {
        let level = self.config.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(SimulateError::InvalidConfidence(level));
        }
        let z = normal_quantile((1.0 + level) / 2.0);

        Ok(self
            .propagate(graph, intervention)?
            .into_iter()
            .filter(|n| n.kind == NodeKind::Asset)
            .map(|n| {
                let std_error = n.variance.sqrt();
                EffectEstimate {
                    symbol: n.name,
                    effect: n.effect,
                    std_error,
                    lower: n.effect - z * std_error,
                    upper: n.effect + z * std_error,
                }
            })
            .collect())
    }
}

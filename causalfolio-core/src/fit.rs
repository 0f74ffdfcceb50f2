//! Causal graph fitting.
//!
//! `CausalGraphModel::fit` turns a set of series into a `CausalGraph`:
//!
//! 1. Build the candidate topology, either from hints (validated in full
//!    before any estimation) or the default macro → macro / macro → asset
//!    layout.
//! 2. Transform series: assets to simple returns, macros to first
//!    differences (or levels).
//! 3. For every effect node, regress it on all of its candidate parents at
//!    their lags, over the dates where every value exists.
//! 4. Keep the edges whose coefficient is significant at
//!    `FitConfig::significance`.
//!
//! Effect nodes are estimated in parallel; the result is assembled in node
//! order, so the output does not depend on thread scheduling.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cancel::{CancelToken, Interrupted};
use crate::data::{SeriesKind, TimeSeries};
use crate::graph::{fit_linear, CausalGraph, EdgeSpec, GraphError, Method, NodeKind};

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("cyclic topology: hinted edge {cause} -> {effect} closes a cycle")]
    CyclicTopology { cause: String, effect: String },

    #[error("unknown variable '{0}' in topology hint")]
    UnknownVariable(String),

    #[error("forbidden edge {cause} -> {effect}: {reason}")]
    ForbiddenEdge {
        cause: String,
        effect: String,
        reason: String,
    },

    #[error(
        "insufficient data for {cause} -> {effect}: {observations} joint observations, \
         {required} required"
    )]
    InsufficientData {
        cause: String,
        effect: String,
        observations: usize,
        required: usize,
    },

    #[error("estimation failed for '{effect}': {reason}")]
    Estimation { effect: String, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

// ─── Configuration ───────────────────────────────────────────────────

/// How macro series enter the regressions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroTransform {
    /// First differences `x_t - x_{t-1}`.
    #[default]
    Difference,
    Level,
}

/// A user-supplied candidate edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyHint {
    pub cause: String,
    pub effect: String,
    #[serde(default)]
    pub lag: usize,
}

impl TopologyHint {
    pub fn new(cause: impl Into<String>, effect: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            effect: effect.into(),
            lag: 0,
        }
    }

    pub fn lagged(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Edges with a two-sided p-value at or above this are dropped.
    pub significance: f64,
    /// Minimum joint observations per (cause, effect) pair.
    pub min_observations: usize,
    pub ridge_lambda: f64,
    pub macro_transform: MacroTransform,
    /// Causal ordering of macros for the default topology.
    pub macro_order: Vec<String>,
    /// Asset that gets no default parents (the benchmark index).
    pub benchmark: Option<String>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            significance: 0.05,
            min_observations: 30,
            ridge_lambda: 1e-3,
            macro_transform: MacroTransform::Difference,
            macro_order: ["fed_rate", "inflation", "gdp_growth", "unemployment"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            benchmark: None,
        }
    }
}

// ─── Model ───────────────────────────────────────────────────────────

/// Candidate parents of one effect node.
struct EffectGroup {
    effect: usize,
    parents: Vec<(usize, usize)>,
}

struct Estimated {
    effect: usize,
    edges: Vec<(usize, EdgeSpec)>,
    dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CausalGraphModel {
    config: FitConfig,
}

impl CausalGraphModel {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit a graph over `series`, restricted to `hints` when given.
    pub fn fit(
        &self,
        series: &[TimeSeries],
        hints: Option<&[TopologyHint]>,
    ) -> Result<CausalGraph, FitError> {
        self.fit_with_cancel(series, hints, &CancelToken::none())
    }

    pub fn fit_with_cancel(
        &self,
        series: &[TimeSeries],
        hints: Option<&[TopologyHint]>,
        cancel: &CancelToken,
    ) -> Result<CausalGraph, FitError> {
        let mut nodes = CausalGraph::new();
        for s in series {
            nodes.add_node(s.name(), node_kind(s.kind()))?;
        }

        let candidates = match hints {
            Some(hints) => self.hinted_topology(&nodes, hints)?,
            None => self.default_topology(&nodes),
        };

        let transformed: Vec<TimeSeries> = series.iter().map(|s| self.transform(s)).collect();
        let groups = group_by_effect(&candidates, nodes.node_count());

        // Every pair is checked before any regression runs
        for group in &groups {
            for &(cause, lag) in &group.parents {
                let observations =
                    pairwise_count(&transformed[group.effect], &transformed[cause], lag);
                if observations < self.config.min_observations {
                    return Err(FitError::InsufficientData {
                        cause: transformed[cause].name().to_string(),
                        effect: transformed[group.effect].name().to_string(),
                        observations,
                        required: self.config.min_observations,
                    });
                }
            }
        }

        let results: Vec<Result<Estimated, FitError>> = groups
            .par_iter()
            .map(|group| {
                cancel.check()?;
                self.estimate(group, &transformed)
            })
            .collect();
        cancel.check()?;

        let mut graph = nodes;
        let mut kept = 0;
        let mut dropped = 0;
        for result in results {
            let est = result?;
            dropped += est.dropped;
            let effect = series[est.effect].name();
            for (cause, spec) in est.edges {
                graph.add_edge(series[cause].name(), effect, spec)?;
                kept += 1;
            }
        }

        info!(
            nodes = graph.node_count(),
            candidates = candidates.len(),
            kept,
            dropped,
            "causal graph fitted"
        );
        Ok(graph)
    }

    fn transform(&self, s: &TimeSeries) -> TimeSeries {
        match (s.kind(), self.config.macro_transform) {
            (SeriesKind::Macro, MacroTransform::Difference) => s.differences(),
            (SeriesKind::Macro, MacroTransform::Level) => s.clone(),
            _ => s.simple_returns(),
        }
    }

    /// Validate hints in full: names, then edge direction, then acyclicity.
    fn hinted_topology(
        &self,
        nodes: &CausalGraph,
        hints: &[TopologyHint],
    ) -> Result<Vec<(usize, usize, usize)>, FitError> {
        for hint in hints {
            for name in [&hint.cause, &hint.effect] {
                if !nodes.contains(name) {
                    return Err(FitError::UnknownVariable(name.clone()));
                }
            }
        }

        let mut ids = Vec::with_capacity(hints.len());
        for hint in hints {
            let (Some(cause), Some(effect)) = (nodes.id(&hint.cause), nodes.id(&hint.effect))
            else {
                return Err(FitError::UnknownVariable(hint.cause.clone()));
            };
            if nodes.node(cause).kind == NodeKind::Asset {
                let reason = match nodes.node(effect).kind {
                    NodeKind::Asset => "asset returns are never caused by other asset returns",
                    NodeKind::Macro => "assets do not cause macro variables",
                };
                return Err(FitError::ForbiddenEdge {
                    cause: hint.cause.clone(),
                    effect: hint.effect.clone(),
                    reason: reason.to_string(),
                });
            }
            ids.push((cause.0, effect.0, hint.lag));
        }

        let mut topology = nodes.clone();
        for hint in hints {
            let spec = EdgeSpec::fixed(0.0).with_lag(hint.lag);
            match topology.add_edge(&hint.cause, &hint.effect, spec) {
                Ok(()) => {}
                Err(GraphError::CycleDetected { cause, effect }) => {
                    return Err(FitError::CyclicTopology { cause, effect })
                }
                Err(GraphError::SelfLoop(name)) => {
                    return Err(FitError::CyclicTopology {
                        cause: name.clone(),
                        effect: name,
                    })
                }
                Err(other) => return Err(other.into()),
            }
        }
        Ok(ids)
    }

    /// Ordered macros feed every later macro; every macro feeds every
    /// non-benchmark asset.
    fn default_topology(&self, nodes: &CausalGraph) -> Vec<(usize, usize, usize)> {
        let mut macros: Vec<usize> = self
            .config
            .macro_order
            .iter()
            .filter_map(|name| nodes.id(name))
            .filter(|id| nodes.node(*id).kind == NodeKind::Macro)
            .map(|id| id.0)
            .collect();
        let ordered: BTreeSet<usize> = macros.iter().copied().collect();
        let mut rest: Vec<usize> = (0..nodes.node_count())
            .filter(|i| nodes.nodes()[*i].kind == NodeKind::Macro && !ordered.contains(i))
            .collect();
        rest.sort_by(|a, b| nodes.nodes()[*a].name.cmp(&nodes.nodes()[*b].name));
        macros.extend(rest);

        let benchmark = self.config.benchmark.as_deref();
        let mut edges = Vec::new();
        for (i, &cause) in macros.iter().enumerate() {
            for &effect in &macros[i + 1..] {
                edges.push((cause, effect, 0));
            }
        }
        for (effect, node) in nodes.nodes().iter().enumerate() {
            if node.kind == NodeKind::Asset && Some(node.name.as_str()) != benchmark {
                for &cause in &macros {
                    edges.push((cause, effect, 0));
                }
            }
        }
        edges
    }

    fn estimate(&self, group: &EffectGroup, series: &[TimeSeries]) -> Result<Estimated, FitError> {
        let effect = &series[group.effect];
        let mut y = Vec::new();
        let mut columns = vec![Vec::new(); group.parents.len()];
        for point in effect.points() {
            let row: Option<Vec<f64>> = group
                .parents
                .iter()
                .map(|&(cause, lag)| series[cause].lagged_value(point.date, lag))
                .collect();
            if let Some(row) = row {
                y.push(point.value);
                for (col, v) in columns.iter_mut().zip(row) {
                    col.push(v);
                }
            }
        }

        if y.len() < self.config.min_observations {
            let (cause, _) = group.parents[0];
            return Err(FitError::InsufficientData {
                cause: series[cause].name().to_string(),
                effect: effect.name().to_string(),
                observations: y.len(),
                required: self.config.min_observations,
            });
        }

        let fit = fit_linear(&y, &columns, self.config.ridge_lambda).ok_or_else(|| {
            FitError::Estimation {
                effect: effect.name().to_string(),
                reason: "regression produced no finite solution".to_string(),
            }
        })?;
        if fit.method == Method::Ridge {
            debug!(effect = effect.name(), "ridge regression used");
        }

        let mut edges = Vec::new();
        let mut dropped = 0;
        for (j, &(cause, lag)) in group.parents.iter().enumerate() {
            if fit.p_values[j] < self.config.significance {
                edges.push((
                    cause,
                    EdgeSpec {
                        coefficient: fit.coefficients[j],
                        std_error: fit.std_errors[j],
                        lag,
                        p_value: Some(fit.p_values[j]),
                        observations: fit.observations,
                    },
                ));
            } else {
                dropped += 1;
            }
        }
        debug!(
            effect = effect.name(),
            parents = group.parents.len(),
            kept = edges.len(),
            observations = fit.observations,
            "effect node estimated"
        );
        Ok(Estimated {
            effect: group.effect,
            edges,
            dropped,
        })
    }
}

fn node_kind(kind: SeriesKind) -> NodeKind {
    match kind {
        SeriesKind::Macro => NodeKind::Macro,
        SeriesKind::AssetPrice | SeriesKind::AssetReturn => NodeKind::Asset,
    }
}

fn group_by_effect(candidates: &[(usize, usize, usize)], node_count: usize) -> Vec<EffectGroup> {
    let mut parents = vec![Vec::new(); node_count];
    for &(cause, effect, lag) in candidates {
        parents[effect].push((cause, lag));
    }
    parents
        .into_iter()
        .enumerate()
        .filter(|(_, p)| !p.is_empty())
        .map(|(effect, parents)| EffectGroup { effect, parents })
        .collect()
}

fn pairwise_count(effect: &TimeSeries, cause: &TimeSeries, lag: usize) -> usize {
    effect
        .points()
        .iter()
        .filter(|p| cause.lagged_value(p.date, lag).is_some())
        .count()
}

//! Causalfolio Core — data ingestion, causal DAG fitting, effect simulation,
//! portfolio optimization.
//!
//! This crate holds the pure computations of the engine:
//! - Time series ingestion and the session data store
//! - Acyclic-by-construction causal graph and its OLS/ridge estimation
//! - Linear counterfactual propagation with confidence intervals
//! - Mean-variance and effect-softmax allocation
//! - Student-t and normal statistics, cooperative cancellation

pub mod cancel;
pub mod data;
pub mod fit;
pub mod graph;
mod linalg;
pub mod optimize;
pub mod simulate;
pub mod stats;

pub use cancel::{CancelToken, Interrupted};
pub use data::{DataError, DataSource, DataStore, Dataset, SeriesKind, TimeSeries};
pub use fit::{CausalGraphModel, FitConfig, FitError, MacroTransform, TopologyHint};
pub use graph::{CausalGraph, EdgeSpec, GraphError, GraphSnapshot, NodeKind};
pub use optimize::{
    Allocation, AllocationMethod, OptimizeError, OptimizerConfig, PortfolioOptimizer,
    PortfolioWeights, RiskModel,
};
pub use simulate::{
    EffectEstimate, EffectSimulator, Intervention, NodeEffect, SimulateError, SimulationConfig,
};

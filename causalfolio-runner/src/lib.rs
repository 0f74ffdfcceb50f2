//! Causalfolio Runner — sessions, backtesting, metrics and the request contract.
//!
//! This crate builds on `causalfolio-core` to provide:
//! - TOML engine configuration with validation and a content hash
//! - Per-session context (data store, fitted-graph cache)
//! - The causal fit → simulate → optimize pipeline as a strategy
//! - A look-ahead-free backtester with benchmark comparison
//! - Performance metrics over return series
//! - Request/response DTOs and the `{status, data, error}` envelope

pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod metrics;
pub mod session;
pub mod strategy;

pub use api::{dispatch, Envelope, Operation, Status};
pub use backtest::{
    BacktestConfig, BacktestError, BacktestResult, Backtester, BoxError, FixedWeights, Rebalance,
    RebalanceRecord, Strategy, SCHEMA_VERSION,
};
pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use metrics::PerformanceMetrics;
pub use session::Session;
pub use strategy::CausalStrategy;

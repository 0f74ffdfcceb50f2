//! Request/response contract and the `{status, data, error}` envelope.
//!
//! Operations:
//! - `sample-data` — the built-in dataset as price columns
//! - `upload` — ingest a CSV file into the session
//! - `simulate` — effects of a `fed_rate` shock
//! - `portfolio` — allocation under the configured scenario
//! - `backtest` — replay of the causal strategy against the benchmark
//! - `graph` — nodes and edges of the fitted graph
//!
//! [`dispatch`] never panics and never returns anything but an envelope.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use causalfolio_core::cancel::CancelToken;
use causalfolio_core::data::{sample_dataset, Loaded};
use causalfolio_core::graph::GraphSnapshot;

use crate::error::EngineError;
use crate::metrics::PerformanceMetrics;
use crate::session::Session;

// ─── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl<T: Serialize> From<Result<T, EngineError>> for Envelope {
    fn from(result: Result<T, EngineError>) -> Self {
        match result.and_then(|data| {
            serde_json::to_value(data)
                .map_err(|e| EngineError::BadRequest(format!("unserializable response: {e}")))
        }) {
            Ok(value) => Envelope::success(value),
            Err(e) => Envelope::error(e.to_string()),
        }
    }
}

// ─── Operations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SampleData,
    Upload,
    Simulate,
    Portfolio,
    Backtest,
    Graph,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::SampleData,
        Operation::Upload,
        Operation::Simulate,
        Operation::Portfolio,
        Operation::Backtest,
        Operation::Graph,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::SampleData => "sample-data",
            Operation::Upload => "upload",
            Operation::Simulate => "simulate",
            Operation::Portfolio => "portfolio",
            Operation::Backtest => "backtest",
            Operation::Graph => "graph",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| EngineError::BadRequest(format!("unknown operation '{s}'")))
    }
}

// ─── DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDataResponse {
    pub stocks: Vec<String>,
    pub prices: BTreeMap<String, Vec<f64>>,
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Original file name; its extension selects the parser.
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub dataset: String,
    pub rows: usize,
    pub series: usize,
    pub assets: Vec<String>,
    pub macros: Vec<String>,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub dataset_hash: String,
    pub generation: u64,
}

impl From<&Loaded> for IngestionStatus {
    fn from(loaded: &Loaded) -> Self {
        let ds = &loaded.dataset;
        let range = ds.date_range();
        Self {
            dataset: ds.source().label().to_string(),
            rows: ds.observation_count(),
            series: ds.series().len(),
            assets: ds.asset_symbols(),
            macros: ds.macro_names(),
            first_date: range.map(|(first, _)| first.to_string()),
            last_date: range.map(|(_, last)| last.to_string()),
            dataset_hash: ds.hash().to_string(),
            generation: loaded.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub fed_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulateResponse {
    pub effects: BTreeMap<String, f64>,
    pub confidence_intervals: BTreeMap<String, [f64; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRequest {
    #[serde(default)]
    pub allow_short: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioResponse {
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub risk: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResponse {
    pub returns: Vec<f64>,
    pub dates: Vec<String>,
    pub metrics: PerformanceMetrics,
    pub benchmark: String,
    pub benchmark_returns: Vec<f64>,
    pub cumulative_returns: Vec<f64>,
    pub benchmark_metrics: PerformanceMetrics,
    pub rebalance_dates: Vec<String>,
}

// ─── Handlers ────────────────────────────────────────────────────────

pub fn sample_data() -> SampleDataResponse {
    let dataset = sample_dataset();
    let dates = dataset
        .assets()
        .next()
        .map(|s| s.dates().iter().map(|d| d.to_string()).collect())
        .unwrap_or_default();
    SampleDataResponse {
        stocks: dataset.asset_symbols(),
        prices: dataset
            .assets()
            .map(|s| (s.name().to_string(), s.values()))
            .collect(),
        dates,
    }
}

pub fn upload(session: &Session, request: &UploadRequest) -> Result<IngestionStatus, EngineError> {
    let loaded = session.upload(&request.filename, request.content.as_bytes())?;
    Ok(IngestionStatus::from(&loaded))
}

pub fn simulate(
    session: &Session,
    request: &SimulateRequest,
    cancel: &CancelToken,
) -> Result<SimulateResponse, EngineError> {
    let estimates = session.simulate(request.fed_rate, cancel)?;
    Ok(SimulateResponse {
        effects: estimates.iter().map(|e| (e.symbol.clone(), e.effect)).collect(),
        confidence_intervals: estimates
            .iter()
            .map(|e| (e.symbol.clone(), [e.lower, e.upper]))
            .collect(),
    })
}

pub fn portfolio(
    session: &Session,
    request: &PortfolioRequest,
    cancel: &CancelToken,
) -> Result<PortfolioResponse, EngineError> {
    let allocation = session.portfolio(request.allow_short, cancel)?;
    Ok(PortfolioResponse {
        weights: allocation.weights.into_map(),
        expected_return: allocation.expected_return,
        risk: allocation.risk,
        warnings: allocation.warnings,
    })
}

pub fn backtest(session: &Session, cancel: &CancelToken) -> Result<BacktestResponse, EngineError> {
    let result = session.backtest(cancel)?;
    Ok(BacktestResponse {
        dates: result.dates.iter().map(|d| d.to_string()).collect(),
        rebalance_dates: result.rebalance_dates().iter().map(|d| d.to_string()).collect(),
        returns: result.returns,
        metrics: result.metrics,
        benchmark: result.benchmark,
        benchmark_returns: result.benchmark_returns,
        cumulative_returns: result.cumulative_returns,
        benchmark_metrics: result.benchmark_metrics,
    })
}

pub fn graph(session: &Session, cancel: &CancelToken) -> Result<GraphSnapshot, EngineError> {
    Ok(session.graph(cancel)?.snapshot())
}

// ─── Dispatch ────────────────────────────────────────────────────────

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, EngineError> {
    let body = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(body)
        .map_err(|e| EngineError::BadRequest(format!("invalid request body: {e}")))
}

fn route(session: &Session, operation: &str, body: &str, cancel: &CancelToken) -> Envelope {
    let operation = match operation.parse::<Operation>() {
        Ok(op) => op,
        Err(e) => return Envelope::error(e.to_string()),
    };
    match operation {
        Operation::SampleData => Ok::<_, EngineError>(sample_data()).into(),
        Operation::Upload => parse_body(body).and_then(|req| upload(session, &req)).into(),
        Operation::Simulate => parse_body(body)
            .and_then(|req| simulate(session, &req, cancel))
            .into(),
        Operation::Portfolio => parse_body(body)
            .and_then(|req| portfolio(session, &req, cancel))
            .into(),
        Operation::Backtest => backtest(session, cancel).into(),
        Operation::Graph => graph(session, cancel).into(),
    }
}

/// Route `operation` with a JSON `body` and wrap the outcome.
///
/// Unknown operations, malformed bodies and panics all become error
/// envelopes.
pub fn dispatch(session: &Session, operation: &str, body: &str, cancel: &CancelToken) -> Envelope {
    match panic::catch_unwind(AssertUnwindSafe(|| route(session, operation, body, cancel))) {
        Ok(envelope) => {
            if let Some(error) = &envelope.error {
                warn!(operation, error = %error, "operation failed");
            }
            envelope
        }
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(operation, detail = %detail, "operation panicked");
            Envelope::error(format!("internal error in '{operation}': {detail}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
        assert!("rebalance".parse::<Operation>().is_err());
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let ok = serde_json::to_value(Envelope::success(1)).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "success", "data": 1}));
        let err = serde_json::to_value(Envelope::<()>::error("boom")).unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "error": "boom"}));
    }

    #[test]
    fn sample_data_shape() {
        let sample = sample_data();
        assert_eq!(sample.stocks.len(), 6);
        assert!(sample.stocks.contains(&"MKT".to_string()));
        for prices in sample.prices.values() {
            assert_eq!(prices.len(), sample.dates.len());
        }
        assert_eq!(sample.dates[0], "2023-01-02");
    }

    #[test]
    fn empty_body_uses_defaults() {
        let req: PortfolioRequest = parse_body("").unwrap();
        assert!(!req.allow_short);
        assert!(parse_body::<SimulateRequest>("{}").is_err());
    }
}

//! Top-level engine error. Its `Display` is the message surfaced in error
//! envelopes.

use thiserror::Error;

use causalfolio_core::cancel::Interrupted;
use causalfolio_core::data::DataError;
use causalfolio_core::fit::FitError;
use causalfolio_core::graph::GraphError;
use causalfolio_core::optimize::OptimizeError;
use causalfolio_core::simulate::SimulateError;

use crate::backtest::BacktestError;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Simulate(#[from] SimulateError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// Malformed request body or unknown operation.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl EngineError {
    /// The interruption behind this error, wherever it was raised.
    pub fn interruption(&self) -> Option<Interrupted> {
        match self {
            EngineError::Interrupted(i)
            | EngineError::Fit(FitError::Interrupted(i))
            | EngineError::Optimize(OptimizeError::Interrupted(i))
            | EngineError::Backtest(BacktestError::Interrupted(i)) => Some(*i),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_pass_through() {
        let err: EngineError = DataError::EmptySeries.into();
        assert_eq!(err.to_string(), DataError::EmptySeries.to_string());
        let err: EngineError = SimulateError::NodeNotFound("fed_rate".into()).into();
        assert!(err.to_string().contains("fed_rate"));
    }

    #[test]
    fn nested_interruptions_are_found() {
        let err: EngineError = OptimizeError::Interrupted(Interrupted::TimedOut).into();
        assert_eq!(err.interruption(), Some(Interrupted::TimedOut));
        let err: EngineError = FitError::Interrupted(Interrupted::Cancelled).into();
        assert_eq!(err.interruption(), Some(Interrupted::Cancelled));
        let err: EngineError = DataError::EmptySeries.into();
        assert_eq!(err.interruption(), None);
    }
}

//! Per-session context: the data store, the engine configuration and the
//! fitted graph of the current dataset.
//!
//! Sessions share nothing with each other. Within a session, loads are
//! serialized by the store; every computation runs against an `Arc`
//! snapshot of the dataset and may proceed concurrently.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use causalfolio_core::cancel::CancelToken;
use causalfolio_core::data::{DataError, DataSource, DataStore, Dataset, Loaded, RawTable};
use causalfolio_core::graph::CausalGraph;
use causalfolio_core::optimize::Allocation;
use causalfolio_core::simulate::{EffectEstimate, Intervention};

use crate::backtest::{BacktestResult, Backtester};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::strategy::CausalStrategy;

#[derive(Debug)]
struct CachedGraph {
    dataset_hash: String,
    graph: Arc<CausalGraph>,
}

#[derive(Debug)]
pub struct Session {
    config: EngineConfig,
    store: DataStore,
    graph: RwLock<Option<CachedGraph>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: DataStore::new(config.ingest_config()),
            config,
            graph: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// The loaded dataset, or the built-in sample when nothing is loaded.
    pub fn dataset(&self) -> Arc<Dataset> {
        self.store.snapshot_or_sample()
    }

    /// Ingest an uploaded CSV file.
    pub fn upload(&self, name: &str, bytes: &[u8]) -> Result<Loaded, EngineError> {
        let limit = self.config.data.max_upload_bytes;
        if bytes.len() > limit {
            return Err(DataError::UploadTooLarge {
                size: bytes.len(),
                limit,
            }
            .into());
        }
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".csv") || lower.ends_with(".txt")) {
            return Err(DataError::MalformedData(format!(
                "unsupported file type '{name}': expected .csv or .txt"
            ))
            .into());
        }
        let raw = RawTable::from_csv_bytes(bytes)?;
        let loaded = self.store.load(
            &raw,
            DataSource::Upload {
                name: name.to_string(),
            },
        )?;
        info!(file = name, bytes = bytes.len(), "upload ingested");
        Ok(loaded)
    }

    /// Fitted graph of the current dataset, fitting on first use.
    pub fn graph(&self, cancel: &CancelToken) -> Result<Arc<CausalGraph>, EngineError> {
        self.graph_for(&self.dataset(), cancel)
    }

    /// Fitted graph of `dataset`, cached by its hash.
    ///
    /// A failed fit leaves the cache untouched.
    pub fn graph_for(
        &self,
        dataset: &Dataset,
        cancel: &CancelToken,
    ) -> Result<Arc<CausalGraph>, EngineError> {
        if let Some(cached) = self.graph.read().as_ref() {
            if cached.dataset_hash == dataset.hash() {
                debug!(hash = %&dataset.hash()[..12], "graph cache hit");
                return Ok(Arc::clone(&cached.graph));
            }
        }

        let graph = Arc::new(self.strategy(false, cancel).fit(dataset.series())?);
        *self.graph.write() = Some(CachedGraph {
            dataset_hash: dataset.hash().to_string(),
            graph: Arc::clone(&graph),
        });
        Ok(graph)
    }

    /// Effects of shocking the configured intervention node by `magnitude`.
    pub fn simulate(
        &self,
        magnitude: f64,
        cancel: &CancelToken,
    ) -> Result<Vec<EffectEstimate>, EngineError> {
        let dataset = self.dataset();
        let graph = self.graph_for(&dataset, cancel)?;
        let intervention =
            Intervention::new(self.config.simulation.intervention_node.clone(), magnitude);
        self.strategy(false, cancel)
            .effects(&graph, dataset.series(), &intervention)
    }

    /// Allocation under the configured scenario shock.
    pub fn portfolio(
        &self,
        allow_short: bool,
        cancel: &CancelToken,
    ) -> Result<Allocation, EngineError> {
        let dataset = self.dataset();
        let graph = self.graph_for(&dataset, cancel)?;
        self.strategy(allow_short, cancel)
            .allocate_on(&graph, dataset.series())
    }

    /// Replay the long-only causal strategy over the current dataset.
    pub fn backtest(&self, cancel: &CancelToken) -> Result<BacktestResult, EngineError> {
        let dataset = self.dataset();
        let strategy = self.strategy(false, cancel);
        let result = Backtester::new(self.config.backtest.clone()).run_with_cancel(
            dataset.series(),
            &strategy,
            &self.config.data.benchmark_symbol,
            cancel,
        )?;
        Ok(result
            .with_dataset_hash(dataset.hash())
            .with_config_hash(self.config.config_hash()?))
    }

    fn strategy(&self, allow_short: bool, cancel: &CancelToken) -> CausalStrategy {
        CausalStrategy::from_config(&self.config, allow_short).with_cancel(cancel.clone())
    }
}

//! Session-scoped data store.
//!
//! A `DataStore` is the one mutable resource of a session: the currently
//! loaded `Dataset`. Loads are serialized by a single writer lock held for
//! the whole parse → validate → publish sequence. Readers take an
//! `Arc<Dataset>` snapshot and never observe a half-loaded dataset.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ingest::{load_table, IngestConfig, RawTable};
use super::sample::sample_dataset;
use super::series::{SeriesKind, TimeSeries};
use super::DataError;

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    Sample,
    Upload { name: String },
}

impl DataSource {
    pub fn label(&self) -> &str {
        match self {
            DataSource::Sample => "sample",
            DataSource::Upload { name } => name,
        }
    }
}

/// An immutable, validated collection of series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    series: Vec<TimeSeries>,
    source: DataSource,
    hash: String,
}

impl Dataset {
    /// Validate a set of series: non-empty, unique names, no empty series.
    pub fn new(series: Vec<TimeSeries>, source: DataSource) -> Result<Self, DataError> {
        if series.is_empty() || series.iter().all(|s| s.is_empty()) {
            return Err(DataError::EmptySeries);
        }
        let mut seen = BTreeSet::new();
        for s in &series {
            if !seen.insert(s.name()) {
                return Err(DataError::MalformedData(format!(
                    "series '{}' appears more than once",
                    s.name()
                )));
            }
            if s.is_empty() {
                return Err(DataError::MalformedData(format!(
                    "series '{}' has no observations",
                    s.name()
                )));
            }
        }
        Ok(Self::from_trusted(series, source))
    }

    pub(crate) fn from_trusted(series: Vec<TimeSeries>, source: DataSource) -> Self {
        let hash = dataset_hash(&series);
        Self {
            series,
            source,
            hash,
        }
    }

    pub fn series(&self) -> &[TimeSeries] {
        &self.series
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// BLAKE3 digest over every (name, kind, date, value).
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn get(&self, name: &str) -> Option<&TimeSeries> {
        self.series.iter().find(|s| s.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn assets(&self) -> impl Iterator<Item = &TimeSeries> {
        self.series.iter().filter(|s| s.kind().is_asset())
    }

    pub fn macros(&self) -> impl Iterator<Item = &TimeSeries> {
        self.series.iter().filter(|s| s.kind() == SeriesKind::Macro)
    }

    pub fn asset_symbols(&self) -> Vec<String> {
        self.assets().map(|s| s.name().to_string()).collect()
    }

    pub fn macro_names(&self) -> Vec<String> {
        self.macros().map(|s| s.name().to_string()).collect()
    }

    /// Every asset as a return series (prices converted to simple returns).
    pub fn asset_returns(&self) -> Vec<TimeSeries> {
        self.assets().map(TimeSeries::simple_returns).collect()
    }

    /// Every series cut at `date` (inclusive).
    pub fn truncated_through(&self, date: NaiveDate) -> Vec<TimeSeries> {
        self.series.iter().map(|s| s.truncated_through(date)).collect()
    }

    /// Investable assets: every asset except the benchmark.
    pub fn universe(&self, benchmark: Option<&str>) -> Vec<String> {
        self.assets()
            .filter(|s| Some(s.name()) != benchmark)
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Total number of observations across all series.
    pub fn observation_count(&self) -> usize {
        self.series.iter().map(TimeSeries::len).sum()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.series.iter().filter_map(TimeSeries::first_date).min()?;
        let last = self.series.iter().filter_map(TimeSeries::last_date).max()?;
        Some((first, last))
    }
}

fn dataset_hash(series: &[TimeSeries]) -> String {
    let mut hasher = blake3::Hasher::new();
    for s in series {
        hasher.update(s.name().as_bytes());
        hasher.update(&[0u8]);
        hasher.update(format!("{:?}", s.kind()).as_bytes());
        for p in s.points() {
            hasher.update(p.date.to_string().as_bytes());
            hasher.update(&p.value.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub dataset: Arc<Dataset>,
    /// Number of successful loads into this store, including this one.
    pub generation: u64,
}

/// Holder of the session's current dataset.
#[derive(Debug, Default)]
pub struct DataStore {
    config: IngestConfig,
    current: RwLock<Option<Arc<Dataset>>>,
    writer: Mutex<u64>,
}

impl DataStore {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            writer: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Parse and validate a raw table, then publish it as the current dataset.
    ///
    /// On error the previously loaded dataset stays in place.
    pub fn load(&self, raw: &RawTable, source: DataSource) -> Result<Loaded, DataError> {
        let mut generation = self.writer.lock();
        let series = load_table(raw, &self.config)?;
        let dataset = Dataset::new(series, source)?;
        Ok(self.publish(&mut generation, dataset))
    }

    fn publish(&self, generation: &mut u64, dataset: Dataset) -> Loaded {
        *generation += 1;
        let dataset = Arc::new(dataset);
        info!(
            source = dataset.source().label(),
            series = dataset.series().len(),
            observations = dataset.observation_count(),
            hash = %&dataset.hash()[..12],
            generation = *generation,
            "dataset loaded"
        );
        *self.current.write() = Some(Arc::clone(&dataset));
        Loaded {
            dataset,
            generation: *generation,
        }
    }

    /// The currently loaded dataset, if any.
    pub fn snapshot(&self) -> Option<Arc<Dataset>> {
        self.current.read().clone()
    }

    /// The loaded dataset, or the built-in sample when nothing is loaded.
    pub fn snapshot_or_sample(&self) -> Arc<Dataset> {
        self.snapshot().unwrap_or_else(|| Arc::new(sample_dataset()))
    }

    pub fn generation(&self) -> u64 {
        *self.writer.lock()
    }

    /// The fixed built-in dataset, independent of any store state.
    pub fn sample() -> Vec<TimeSeries> {
        sample_dataset().series().to_vec()
    }
}

//! Data ingestion, the session data store, and the built-in sample dataset.

pub mod ingest;
pub mod sample;
pub mod series;
pub mod store;

use chrono::NaiveDate;
use thiserror::Error;

pub use ingest::{load_table, IngestConfig, RawTable};
pub use sample::sample_dataset;
pub use series::{Observation, SeriesKind, TimeSeries};
pub use store::{DataSource, DataStore, Dataset, Loaded};

/// Validation errors raised at ingestion. Any of these blocks downstream work.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("empty series: the input contains no rows")]
    EmptySeries,

    #[error("duplicate timestamp: '{variable}' has more than one value on {date}")]
    DuplicateTimestamp { variable: String, date: NaiveDate },

    #[error("upload too large: {size} bytes exceeds the limit of {limit} bytes")]
    UploadTooLarge { size: usize, limit: usize },
}

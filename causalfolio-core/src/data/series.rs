//! Time series domain type.
//!
//! A `TimeSeries` is an ordered run of (date, value) observations for one
//! named variable. Dates are strictly increasing; gaps are allowed and stay
//! visible (a missing date is simply absent, never filled).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::DataError;

/// What a series measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Asset price level; graph and backtest use its simple returns.
    AssetPrice,
    /// Asset period return, used as-is.
    AssetReturn,
    /// Macroeconomic indicator (rates, inflation, growth, ...).
    Macro,
}

impl SeriesKind {
    pub fn is_asset(self) -> bool {
        matches!(self, SeriesKind::AssetPrice | SeriesKind::AssetReturn)
    }

    /// Parse a `kind` column cell.
    pub fn parse(cell: &str) -> Option<Self> {
        match cell.trim().to_ascii_lowercase().as_str() {
            "price" | "asset_price" => Some(SeriesKind::AssetPrice),
            "return" | "returns" | "asset_return" => Some(SeriesKind::AssetReturn),
            "macro" => Some(SeriesKind::Macro),
            _ => None,
        }
    }
}

/// A single dated value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Ordered observations of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    name: String,
    kind: SeriesKind,
    points: Vec<Observation>,
}

impl TimeSeries {
    /// Build a series, rejecting repeated or decreasing dates and non-finite values.
    pub fn new(
        name: impl Into<String>,
        kind: SeriesKind,
        points: Vec<Observation>,
    ) -> Result<Self, DataError> {
        let name = name.into();
        for pair in points.windows(2) {
            if pair[1].date == pair[0].date {
                return Err(DataError::DuplicateTimestamp {
                    variable: name,
                    date: pair[1].date,
                });
            }
            if pair[1].date < pair[0].date {
                return Err(DataError::MalformedData(format!(
                    "series '{name}': dates not increasing at {}",
                    pair[1].date
                )));
            }
        }
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(DataError::MalformedData(format!(
                "series '{name}': non-finite value on {}",
                bad.date
            )));
        }
        Ok(Self { name, kind, points })
    }

    /// Construct without validation. Callers guarantee strictly increasing
    /// dates and finite values.
    pub(crate) fn from_trusted(
        name: impl Into<String>,
        kind: SeriesKind,
        points: Vec<Observation>,
    ) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].date < w[1].date));
        Self {
            name: name.into(),
            kind,
            points,
        }
    }

    /// Convenience constructor from parallel date/value slices.
    pub fn from_pairs(
        name: impl Into<String>,
        kind: SeriesKind,
        dates: &[NaiveDate],
        values: &[f64],
    ) -> Result<Self, DataError> {
        let name = name.into();
        if dates.len() != values.len() {
            return Err(DataError::MalformedData(format!(
                "series '{name}': {} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        let points = dates
            .iter()
            .zip(values)
            .map(|(&date, &value)| Observation { date, value })
            .collect();
        Self::new(name, kind, points)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Position of `date` in the series (binary search).
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.points.binary_search_by(|p| p.date.cmp(&date)).ok()
    }

    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.position(date).map(|i| self.points[i].value)
    }

    /// Value `lag` observations before the observation dated `date`.
    ///
    /// Lag counts observations of this series, not calendar days.
    pub fn lagged_value(&self, date: NaiveDate, lag: usize) -> Option<f64> {
        let idx = self.position(date)?;
        idx.checked_sub(lag).map(|i| self.points[i].value)
    }

    /// Observations dated on or before `date`.
    pub fn truncated_through(&self, date: NaiveDate) -> TimeSeries {
        let end = self.points.partition_point(|p| p.date <= date);
        TimeSeries {
            name: self.name.clone(),
            kind: self.kind,
            points: self.points[..end].to_vec(),
        }
    }

    /// Simple period returns `v_t / v_{t-1} - 1`, dated at `t`.
    ///
    /// Return series come back unchanged. Steps from a non-positive price
    /// are skipped (left as an explicit gap).
    pub fn simple_returns(&self) -> TimeSeries {
        if self.kind != SeriesKind::AssetPrice {
            return self.clone();
        }
        let points = self
            .points
            .windows(2)
            .filter(|w| w[0].value > 0.0)
            .map(|w| Observation {
                date: w[1].date,
                value: w[1].value / w[0].value - 1.0,
            })
            .collect();
        TimeSeries {
            name: self.name.clone(),
            kind: SeriesKind::AssetReturn,
            points,
        }
    }

    /// First differences `v_t - v_{t-1}`, dated at `t`.
    pub fn differences(&self) -> TimeSeries {
        let points = self
            .points
            .windows(2)
            .map(|w| Observation {
                date: w[1].date,
                value: w[1].value - w[0].value,
            })
            .collect();
        TimeSeries {
            name: self.name.clone(),
            kind: self.kind,
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn prices() -> TimeSeries {
        TimeSeries::from_pairs(
            "SPY",
            SeriesKind::AssetPrice,
            &[d(2), d(3), d(5)],
            &[100.0, 110.0, 99.0],
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_dates() {
        let err = TimeSeries::from_pairs("X", SeriesKind::Macro, &[d(2), d(2)], &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, DataError::DuplicateTimestamp { .. }));
    }

    #[test]
    fn rejects_decreasing_dates() {
        let err = TimeSeries::from_pairs("X", SeriesKind::Macro, &[d(3), d(2)], &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, DataError::MalformedData(_)));
    }

    #[test]
    fn rejects_nan_values() {
        let err =
            TimeSeries::from_pairs("X", SeriesKind::Macro, &[d(2)], &[f64::NAN]).unwrap_err();
        assert!(matches!(err, DataError::MalformedData(_)));
    }

    #[test]
    fn simple_returns_from_prices() {
        let r = prices().simple_returns();
        assert_eq!(r.kind(), SeriesKind::AssetReturn);
        assert_eq!(r.dates(), vec![d(3), d(5)]);
        assert!((r.values()[0] - 0.1).abs() < 1e-12);
        assert!((r.values()[1] - (99.0 / 110.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn differences_keep_kind() {
        let rates =
            TimeSeries::from_pairs("fed", SeriesKind::Macro, &[d(2), d(3), d(4)], &[5.0, 5.25, 5.0])
                .unwrap();
        let diff = rates.differences();
        assert_eq!(diff.kind(), SeriesKind::Macro);
        assert_eq!(diff.values(), vec![0.25, -0.25]);
    }

    #[test]
    fn truncation_is_inclusive() {
        let s = prices();
        assert_eq!(s.truncated_through(d(3)).len(), 2);
        assert_eq!(s.truncated_through(d(4)).len(), 2);
        assert_eq!(s.truncated_through(d(1)).len(), 0);
    }

    #[test]
    fn lagged_lookup_counts_observations() {
        let s = prices();
        // d(5) is index 2; one observation back is d(3) even though d(4) is missing
        assert_eq!(s.lagged_value(d(5), 1), Some(110.0));
        assert_eq!(s.lagged_value(d(2), 1), None);
        assert_eq!(s.lagged_value(d(4), 0), None);
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(SeriesKind::parse(" Price "), Some(SeriesKind::AssetPrice));
        assert_eq!(SeriesKind::parse("return"), Some(SeriesKind::AssetReturn));
        assert_eq!(SeriesKind::parse("MACRO"), Some(SeriesKind::Macro));
        assert_eq!(SeriesKind::parse("volume"), None);
    }
}

//! Raw tabular ingestion: CSV bytes → validated `TimeSeries`.
//!
//! Long format, one observation per row:
//!
//! ```text
//! date,symbol,value[,kind]
//! 2024-01-02,fed_rate,5.25,macro
//! 2024-01-02,AAPL,185.6,price
//! ```
//!
//! Wide format, one column per variable (no symbol column). Non-macro
//! columns are prices; empty cells are gaps:
//!
//! ```text
//! date,AAPL,MSFT,fed_rate
//! 2024-01-02,185.6,370.9,5.25
//! ```
//!
//! Validation never coerces: a bad cell fails the whole table.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::series::{Observation, SeriesKind, TimeSeries};
use super::DataError;

const DATE_COLUMNS: [&str; 2] = ["date", "timestamp"];
const NAME_COLUMNS: [&str; 2] = ["symbol", "variable"];
const VALUE_COLUMNS: [&str; 3] = ["value", "price", "return"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Header row plus string cells, as produced by a CSV reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a CSV stream with a header row.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| DataError::MalformedData(format!("unreadable header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record
                .map_err(|e| DataError::MalformedData(format!("row {}: {e}", i + 1)))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, DataError> {
        Self::from_csv(bytes)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Variable names (case-insensitive) treated as macro indicators when
    /// the table has no `kind` column.
    pub macro_variables: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            macro_variables: [
                "fed_rate",
                "inflation",
                "gdp_growth",
                "unemployment",
                "fedrate",
                "gdp",
                "cpi",
                "unrate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl IngestConfig {
    fn is_macro(&self, name: &str) -> bool {
        self.macro_variables
            .iter()
            .any(|m| m.eq_ignore_ascii_case(name))
    }
}

/// Long layout: one observation per row.
struct LongColumns {
    date: usize,
    name: usize,
    value: usize,
    value_kind: SeriesKind,
    kind: Option<usize>,
    width: usize,
}

/// Wide layout: a date column plus one column per variable.
struct WideColumns {
    date: usize,
    series: Vec<(usize, String)>,
    width: usize,
}

enum Layout {
    Long(LongColumns),
    Wide(WideColumns),
}

fn locate_columns(headers: &[String]) -> Result<Layout, DataError> {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
    let find = |candidates: &[&'static str]| {
        candidates
            .iter()
            .find_map(|c| normalized.iter().position(|h| h == c).map(|i| (i, *c)))
    };

    let date = find(&DATE_COLUMNS);
    let name = find(&NAME_COLUMNS);
    let value = find(&VALUE_COLUMNS);

    match (date, name, value) {
        (Some((date, _)), Some((name, _)), Some((value, value_col))) => {
            Ok(Layout::Long(LongColumns {
                date,
                name,
                value,
                value_kind: match value_col {
                    "price" => SeriesKind::AssetPrice,
                    _ => SeriesKind::AssetReturn,
                },
                kind: normalized.iter().position(|h| h == "kind"),
                width: headers.len(),
            }))
        }
        (Some((date, _)), None, _) if headers.len() > 1 => wide_columns(headers, date),
        _ => {
            let mut missing = Vec::new();
            if date.is_none() {
                missing.push("date");
            }
            if name.is_none() {
                missing.push("symbol/variable");
            }
            if value.is_none() {
                missing.push("value");
            }
            Err(DataError::MalformedData(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )))
        }
    }
}

fn wide_columns(headers: &[String], date: usize) -> Result<Layout, DataError> {
    let mut series: Vec<(usize, String)> = Vec::with_capacity(headers.len() - 1);
    for (i, header) in headers.iter().enumerate() {
        if i == date {
            continue;
        }
        let name = header.trim();
        if name.is_empty() {
            return Err(DataError::MalformedData(format!(
                "column {}: empty variable name",
                i + 1
            )));
        }
        if series.iter().any(|(_, n)| n == name) {
            return Err(DataError::MalformedData(format!(
                "column {}: variable '{name}' appears twice",
                i + 1
            )));
        }
        series.push((i, name.to_string()));
    }
    Ok(Layout::Wide(WideColumns {
        date,
        series,
        width: headers.len(),
    }))
}

fn parse_date(cell: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cell.trim(), fmt).ok())
}

fn check_width(row: &[String], width: usize, row_no: usize) -> Result<(), DataError> {
    if row.len() == width {
        Ok(())
    } else {
        Err(DataError::MalformedData(format!(
            "row {row_no}: expected {width} cells, found {}",
            row.len()
        )))
    }
}

fn row_date(cell: &str, row_no: usize) -> Result<NaiveDate, DataError> {
    parse_date(cell)
        .ok_or_else(|| DataError::MalformedData(format!("row {row_no}: bad date '{cell}'")))
}

fn row_value(cell: &str, row_no: usize) -> Result<f64, DataError> {
    let value: f64 = cell
        .trim()
        .parse()
        .map_err(|_| DataError::MalformedData(format!("row {row_no}: bad value '{cell}'")))?;
    if !value.is_finite() {
        return Err(DataError::MalformedData(format!(
            "row {row_no}: non-finite value"
        )));
    }
    Ok(value)
}

/// Validate and normalize a raw table into one series per variable.
///
/// Series come back sorted by name; each series is sorted by date.
pub fn load_table(raw: &RawTable, config: &IngestConfig) -> Result<Vec<TimeSeries>, DataError> {
    let layout = locate_columns(raw.headers())?;
    if raw.is_empty() {
        return Err(DataError::EmptySeries);
    }
    let grouped = match layout {
        Layout::Long(cols) => group_long(raw, &cols, config)?,
        Layout::Wide(cols) => group_wide(raw, &cols, config)?,
    };

    grouped
        .into_iter()
        .map(|(name, (kind, mut points))| {
            points.sort_by_key(|p| p.date);
            TimeSeries::new(name, kind, points)
        })
        .collect()
}

type Grouped = BTreeMap<String, (SeriesKind, Vec<Observation>)>;

fn group_long(
    raw: &RawTable,
    cols: &LongColumns,
    config: &IngestConfig,
) -> Result<Grouped, DataError> {
    let mut grouped = Grouped::new();
    for (i, row) in raw.rows().iter().enumerate() {
        let row_no = i + 1;
        check_width(row, cols.width, row_no)?;

        let name = row[cols.name].trim();
        if name.is_empty() {
            return Err(DataError::MalformedData(format!("row {row_no}: empty symbol")));
        }
        let date = row_date(&row[cols.date], row_no)?;
        let value = row_value(&row[cols.value], row_no)?;

        let kind = match cols.kind {
            Some(k) => SeriesKind::parse(&row[k]).ok_or_else(|| {
                DataError::MalformedData(format!("row {row_no}: unknown kind '{}'", row[k]))
            })?,
            None if config.is_macro(name) => SeriesKind::Macro,
            None => cols.value_kind,
        };

        let entry = grouped
            .entry(name.to_string())
            .or_insert_with(|| (kind, Vec::new()));
        if entry.0 != kind {
            return Err(DataError::MalformedData(format!(
                "row {row_no}: '{name}' mixes kinds {:?} and {:?}",
                entry.0, kind
            )));
        }
        entry.1.push(Observation { date, value });
    }
    Ok(grouped)
}

/// Empty cells are gaps; non-macro columns are asset prices.
fn group_wide(
    raw: &RawTable,
    cols: &WideColumns,
    config: &IngestConfig,
) -> Result<Grouped, DataError> {
    let mut grouped: Grouped = cols
        .series
        .iter()
        .map(|(_, name)| {
            let kind = if config.is_macro(name) {
                SeriesKind::Macro
            } else {
                SeriesKind::AssetPrice
            };
            (name.clone(), (kind, Vec::new()))
        })
        .collect();

    for (i, row) in raw.rows().iter().enumerate() {
        let row_no = i + 1;
        check_width(row, cols.width, row_no)?;
        let date = row_date(&row[cols.date], row_no)?;
        for (col, name) in &cols.series {
            let cell = row[*col].trim();
            if cell.is_empty() {
                continue;
            }
            let value = row_value(cell, row_no)?;
            if let Some((_, points)) = grouped.get_mut(name) {
                points.push(Observation { date, value });
            }
        }
    }

    if let Some((name, _)) = grouped.iter().find(|(_, (_, points))| points.is_empty()) {
        return Err(DataError::MalformedData(format!(
            "column '{name}' has no values"
        )));
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> RawTable {
        RawTable::from_csv_bytes(csv.as_bytes()).unwrap()
    }

    #[test]
    fn loads_long_format_with_kind_column() {
        let raw = table(
            "date,symbol,value,kind\n\
             2024-01-03,AAPL,101.0,price\n\
             2024-01-02,AAPL,100.0,price\n\
             2024-01-02,fed_rate,5.25,macro\n",
        );
        let series = load_table(&raw, &IngestConfig::default()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name(), "AAPL");
        assert_eq!(series[0].kind(), SeriesKind::AssetPrice);
        // Unordered rows are sorted per variable
        assert_eq!(series[0].values(), vec![100.0, 101.0]);
        assert_eq!(series[1].kind(), SeriesKind::Macro);
    }

    #[test]
    fn infers_kind_from_value_column_and_macro_list() {
        let raw = table(
            "Date,Symbol,Price,Volume\n\
             2024-01-02,MSFT,370.0,1000\n\
             2024-01-02,CPI,310.3,0\n",
        );
        let series = load_table(&raw, &IngestConfig::default()).unwrap();
        assert_eq!(series[0].name(), "CPI");
        assert_eq!(series[0].kind(), SeriesKind::Macro);
        assert_eq!(series[1].kind(), SeriesKind::AssetPrice);
    }

    #[test]
    fn missing_columns_are_malformed() {
        let raw = table("symbol,value\nA,1.0\n");
        match load_table(&raw, &IngestConfig::default()).unwrap_err() {
            DataError::MalformedData(msg) => assert!(msg.contains("date"), "{msg}"),
            other => panic!("expected MalformedData, got {other:?}"),
        }

        let raw = table("date\n2024-01-02\n");
        match load_table(&raw, &IngestConfig::default()).unwrap_err() {
            DataError::MalformedData(msg) => {
                assert!(msg.contains("symbol/variable"), "{msg}");
                assert!(msg.contains("value"), "{msg}");
            }
            other => panic!("expected MalformedData, got {other:?}"),
        }
    }

    #[test]
    fn loads_wide_format() {
        let raw = table(
            "date,AAPL,MSFT,fed_rate\n\
             2024-01-03,101.0,201.0,5.25\n\
             2024-01-02,100.0,,5.25\n",
        );
        let series = load_table(&raw, &IngestConfig::default()).unwrap();
        let names: Vec<&str> = series.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["AAPL", "MSFT", "fed_rate"]);
        assert_eq!(series[0].kind(), SeriesKind::AssetPrice);
        assert_eq!(series[0].values(), vec![100.0, 101.0]);
        // The empty cell stays a gap
        assert_eq!(series[1].len(), 1);
        assert_eq!(series[2].kind(), SeriesKind::Macro);
    }

    #[test]
    fn wide_format_validates_cells() {
        let raw = table("date,A,B\n2024-01-02,1.0,2.0\n2024-01-03,1.1,x\n");
        match load_table(&raw, &IngestConfig::default()) {
            Err(DataError::MalformedData(msg)) => assert!(msg.starts_with("row 2"), "{msg}"),
            other => panic!("expected MalformedData, got {other:?}"),
        }

        let raw = table("date,A\n2024-01-02,1.0\n2024-01-02,1.1\n");
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::DuplicateTimestamp { variable, .. }) if variable == "A"
        ));

        let raw = table("date,A,A\n2024-01-02,1.0,2.0\n");
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::MalformedData(_))
        ));

        let raw = table("date,A,B\n2024-01-02,1.0,\n");
        match load_table(&raw, &IngestConfig::default()) {
            Err(DataError::MalformedData(msg)) => assert!(msg.contains("'B'"), "{msg}"),
            other => panic!("expected MalformedData, got {other:?}"),
        }
    }

    #[test]
    fn zero_rows_is_empty_series() {
        let raw = table("date,symbol,value\n");
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::EmptySeries)
        ));
    }

    #[test]
    fn repeated_variable_date_is_duplicate() {
        let raw = table(
            "date,variable,value\n\
             2024-01-02,gdp,1.0\n\
             2024-01-02,gdp,1.1\n",
        );
        match load_table(&raw, &IngestConfig::default()) {
            Err(DataError::DuplicateTimestamp { variable, date }) => {
                assert_eq!(variable, "gdp");
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
            }
            other => panic!("expected DuplicateTimestamp, got {other:?}"),
        }
    }

    #[test]
    fn bad_cells_name_the_row() {
        let raw = table("date,symbol,value\n2024-01-02,A,1.0\n2024-13-40,A,2.0\n");
        match load_table(&raw, &IngestConfig::default()) {
            Err(DataError::MalformedData(msg)) => assert!(msg.starts_with("row 2"), "{msg}"),
            other => panic!("expected MalformedData, got {other:?}"),
        }

        let raw = table("date,symbol,value\n2024-01-02,A,abc\n");
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::MalformedData(_))
        ));
    }

    #[test]
    fn short_rows_rejected() {
        let raw = table("date,symbol,value\n2024-01-02,A\n");
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::MalformedData(_))
        ));
    }

    #[test]
    fn mixed_kinds_rejected() {
        let raw = table(
            "date,symbol,value,kind\n\
             2024-01-02,A,1.0,price\n\
             2024-01-03,A,0.01,return\n",
        );
        assert!(matches!(
            load_table(&raw, &IngestConfig::default()),
            Err(DataError::MalformedData(_))
        ));
    }
}

//! Provider response shapes.
//!
//! Providers hand back one of a few known layouts. They are kept as a tagged
//! union and resolved into a row table in one place ([`RawSeries::table`]) so
//! neither the fetcher nor the normalizer has to know which layout arrived.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Canonical OHLCV fields a provider column can map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjClose,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Date,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
        Field::AdjClose,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Map a provider header onto a canonical field, ignoring case, spacing
    /// and punctuation ("Adj Close", "adj_close" and "adjclose" are the same).
    pub fn from_header(header: &str) -> Option<Field> {
        let key: String = header
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "date" | "datetime" | "timestamp" => Some(Field::Date),
            "open" => Some(Field::Open),
            "high" => Some(Field::High),
            "low" => Some(Field::Low),
            "close" => Some(Field::Close),
            "volume" => Some(Field::Volume),
            "adjclose" | "adjustedclose" => Some(Field::AdjClose),
            _ => None,
        }
    }
}

/// Raw time series for one instrument, as returned by a provider
#[derive(Debug, Clone, PartialEq)]
pub enum RawSeries {
    /// Single header row; one of the columns carries the date.
    Flat {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Two header levels: (field name, symbol). Used by providers that batch
    /// several symbols into one response.
    MultiLevel {
        columns: Vec<(String, String)>,
        rows: Vec<Vec<Value>>,
    },
    /// Column-oriented history for a single symbol.
    PerSymbol {
        symbol: String,
        dates: Vec<Value>,
        fields: Vec<(String, Vec<Value>)>,
    },
}

impl RawSeries {
    pub fn empty() -> Self {
        RawSeries::Flat {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        match self {
            RawSeries::Flat { rows, .. } | RawSeries::MultiLevel { rows, .. } => rows.len(),
            RawSeries::PerSymbol { dates, .. } => dates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            RawSeries::Flat { .. } => "flat",
            RawSeries::MultiLevel { .. } => "multi-level",
            RawSeries::PerSymbol { .. } => "per-symbol",
        }
    }

    /// Resolve any layout into a row table keyed by canonical field.
    ///
    /// Two-level headers collapse to their outer level. When the same outer
    /// name appears more than once, the column whose inner level names
    /// `symbol` wins; otherwise the first one is kept.
    pub fn table(&self, symbol: &str) -> RawTable<'_> {
        let mut columns = [None; 7];

        match self {
            RawSeries::Flat { columns: headers, rows } => {
                for (idx, header) in headers.iter().enumerate() {
                    if let Some(field) = Field::from_header(header) {
                        columns[field.index()].get_or_insert(idx);
                    }
                }
                RawTable {
                    columns,
                    rows: rows.iter().map(|row| row.iter().collect()).collect(),
                }
            }
            RawSeries::MultiLevel { columns: headers, rows } => {
                for (idx, (outer, inner)) in headers.iter().enumerate() {
                    let Some(field) = Field::from_header(outer) else {
                        continue;
                    };
                    let slot = &mut columns[field.index()];
                    if slot.is_none() || inner.eq_ignore_ascii_case(symbol) {
                        let keep_existing = slot
                            .map(|existing| headers[existing].1.eq_ignore_ascii_case(symbol))
                            .unwrap_or(false);
                        if !keep_existing {
                            *slot = Some(idx);
                        }
                    }
                }
                RawTable {
                    columns,
                    rows: rows.iter().map(|row| row.iter().collect()).collect(),
                }
            }
            RawSeries::PerSymbol { dates, fields, .. } => {
                columns[Field::Date.index()] = Some(0);
                let mut series: Vec<&Vec<Value>> = Vec::with_capacity(fields.len());
                for (name, values) in fields {
                    if let Some(field) = Field::from_header(name) {
                        if field != Field::Date && columns[field.index()].is_none() {
                            columns[field.index()] = Some(series.len() + 1);
                            series.push(values);
                        }
                    }
                }
                let rows = dates
                    .iter()
                    .enumerate()
                    .map(|(i, date)| {
                        let mut row = Vec::with_capacity(series.len() + 1);
                        row.push(date);
                        for values in &series {
                            row.push(values.get(i).unwrap_or(&Value::Null));
                        }
                        row
                    })
                    .collect();
                RawTable { columns, rows }
            }
        }
    }
}

/// Row view over a [`RawSeries`], addressed by canonical field
#[derive(Debug)]
pub struct RawTable<'a> {
    columns: [Option<usize>; 7],
    rows: Vec<Vec<&'a Value>>,
}

impl<'a> RawTable<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns[field.index()].is_some()
    }

    /// Cell for `field` in row `row`; `None` when the column is absent or the
    /// row is short.
    pub fn cell(&self, row: usize, field: Field) -> Option<&'a Value> {
        let col = self.columns[field.index()]?;
        self.rows.get(row)?.get(col).copied()
    }

    pub fn column(&self, field: Field) -> Option<Vec<&'a Value>> {
        if !self.has(field) {
            return None;
        }
        Some((0..self.rows.len()).map(|row| self.cell(row, field).unwrap_or(&Value::Null)).collect())
    }
}

/// Best-effort numeric reading of a cell
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
}

/// Best-effort date reading of a cell: ISO dates, date-times, or unix
/// timestamps in seconds or milliseconds.
pub fn value_as_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(date);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.date_naive());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt.date());
            }
            s.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        }
        Value::Number(n) => {
            let ts = match n.as_i64() {
                Some(ts) => ts,
                None => n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)?,
            };
            // 8-digit YYYYMMDD, as written by spreadsheet exports
            if (19_000_101..=21_001_231).contains(&ts) {
                if let Ok(date) = NaiveDate::parse_from_str(&ts.to_string(), "%Y%m%d") {
                    return Some(date);
                }
            }
            let secs = if ts.abs() >= 100_000_000_000 { ts / 1000 } else { ts };
            DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

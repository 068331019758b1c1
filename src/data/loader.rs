//! Candle loader for CSV and Parquet files.
//!
//! Files carry one row per trading day with at least two columns:
//! - `date` (`YYYY-MM-DD` string or a date column)
//! - `close` (any numeric type)
//!
//! No gap filling is performed. A missing bar shifts every later `idx`,
//! so the loader only sorts and rejects duplicate dates.

use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use super::types::Candle;

/// Required columns in a candle file.
pub const EXPECTED_COLUMNS: &[&str] = &["date", "close"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads an ascending candle series from disk.
pub struct CandleLoader;

impl CandleLoader {
    /// Load a candle file, dispatching on the extension.
    pub fn load(path: &Path) -> Result<Vec<Candle>, LoaderError> {
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }

        let lf = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => LazyCsvReader::new(path).with_has_header(true).finish()?,
            Some("parquet") => LazyFrame::scan_parquet(path, ScanArgsParquet::default())?,
            other => {
                return Err(LoaderError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        let df = lf
            .select([col("date"), col("close").cast(DataType::Float64)])
            .collect()?;

        let candles = dataframe_to_candles(&df)?;
        info!(
            "Loaded {} candles from {} ({} to {})",
            candles.len(),
            path.display(),
            candles.first().map(|c| c.date.to_string()).unwrap_or_default(),
            candles.last().map(|c| c.date.to_string()).unwrap_or_default(),
        );
        Ok(candles)
    }
}

/// Convert a `date`/`close` frame into a sorted, de-duplicated-checked series.
fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<Candle>, LoaderError> {
    let dates_col = df.column("date")?;

    // Handle both string and date column types
    let dates: Vec<Option<NaiveDate>> = if let Ok(str_col) = dates_col.str() {
        str_col
            .into_iter()
            .map(|s| s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
            .collect()
    } else if let Ok(date_col) = dates_col.date() {
        date_col.into_iter().map(|d| d.map(date_from_days)).collect()
    } else {
        return Err(LoaderError::InvalidData(
            "date column has unexpected type".to_string(),
        ));
    };

    let closes: Vec<Option<f64>> = df.column("close")?.f64()?.into_iter().collect();

    let mut candles = Vec::with_capacity(dates.len());
    for (row, (date, close)) in dates.into_iter().zip(closes).enumerate() {
        let date = date.ok_or_else(|| {
            LoaderError::InvalidData(format!("Row {}: missing or malformed date", row))
        })?;
        let close = close
            .filter(|c| c.is_finite() && *c > 0.0)
            .and_then(Decimal::from_f64)
            .ok_or_else(|| {
                LoaderError::InvalidData(format!("Row {} ({}): invalid close", row, date))
            })?;
        candles.push(Candle::new(date, close));
    }

    candles.sort_by_key(|c| c.date);
    if let Some(pair) = candles.windows(2).find(|w| w[0].date == w[1].date) {
        return Err(LoaderError::InvalidData(format!(
            "Duplicate candle date {}",
            pair[0].date
        )));
    }

    Ok(candles)
}

/// Polars stores dates as days since the Unix epoch.
fn date_from_days(days: i32) -> NaiveDate {
    NaiveDate::from_num_days_from_ce_opt(days + 719163).unwrap_or_default()
}

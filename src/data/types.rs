//! Core data types for regime analysis.
//!
//! Candles are the only raw input. Everything downstream joins on the
//! candle's position in the full series (`idx`), never on its date string.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single daily close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub close: Decimal,
}

impl Candle {
    pub fn new(date: NaiveDate, close: Decimal) -> Self {
        Self { date, close }
    }

    /// Close as a float for the statistical routines.
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }
}

/// Extract the close series of a candle slice.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(Candle::close_f64).collect()
}

/// Index of the first candle on or after `date`.
pub fn first_index_on_or_after(candles: &[Candle], date: NaiveDate) -> Option<usize> {
    let idx = candles.partition_point(|c| c.date < date);
    (idx < candles.len()).then_some(idx)
}

/// Index of the last candle on or before `date`.
pub fn last_index_on_or_before(candles: &[Candle], date: NaiveDate) -> Option<usize> {
    candles.partition_point(|c| c.date <= date).checked_sub(1)
}

/// One historical era bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortBoundary {
    /// Label stored on regime records.
    pub label: String,
    /// First calendar year that is no longer part of this cohort.
    pub end_year_exclusive: i32,
}

/// Calendar-year cohort assignment.
///
/// Boundaries are checked in order; a year past every boundary gets
/// `live_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub boundaries: Vec<CohortBoundary>,
    pub live_label: String,
}

impl Default for CohortConfig {
    fn default() -> Self {
        let boundary = |label: &str, end_year_exclusive| CohortBoundary {
            label: label.to_string(),
            end_year_exclusive,
        };
        Self {
            boundaries: vec![
                boundary("PRE_1990", 1990),
                boundary("1990_2008", 2008),
                boundary("2008_2020", 2020),
                boundary("2020_2025", 2026),
            ],
            live_label: "LIVE".to_string(),
        }
    }
}

impl CohortConfig {
    /// Cohort label for a date.
    pub fn cohort_for(&self, date: NaiveDate) -> &str {
        let year = date.year();
        self.boundaries
            .iter()
            .find(|b| year < b.end_year_exclusive)
            .map(|b| b.label.as_str())
            .unwrap_or(self.live_label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_cohort_boundaries() {
        let config = CohortConfig::default();
        assert_eq!(config.cohort_for(d(1987, 10, 19)), "PRE_1990");
        assert_eq!(config.cohort_for(d(1990, 1, 2)), "1990_2008");
        assert_eq!(config.cohort_for(d(2008, 9, 15)), "2008_2020");
        assert_eq!(config.cohort_for(d(2020, 3, 16)), "2020_2025");
        assert_eq!(config.cohort_for(d(2025, 12, 31)), "2020_2025");
        assert_eq!(config.cohort_for(d(2026, 1, 2)), "LIVE");
    }

    #[test]
    fn test_index_lookup() {
        let candles = vec![
            Candle::new(d(2024, 1, 2), dec!(100)),
            Candle::new(d(2024, 1, 3), dec!(101)),
            Candle::new(d(2024, 1, 5), dec!(102)),
        ];
        assert_eq!(first_index_on_or_after(&candles, d(2024, 1, 4)), Some(2));
        assert_eq!(last_index_on_or_before(&candles, d(2024, 1, 4)), Some(1));
        assert_eq!(last_index_on_or_before(&candles, d(2023, 12, 31)), None);
        assert_eq!(first_index_on_or_after(&candles, d(2024, 2, 1)), None);
    }

    #[test]
    fn test_close_conversion() {
        let candle = Candle::new(d(2024, 1, 2), dec!(450.25));
        assert!((candle.close_f64() - 450.25).abs() < 1e-9);
    }
}

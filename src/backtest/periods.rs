//! Historical stress periods for the full backtest suite.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A named historical window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressPeriod {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StressPeriod {
    pub fn new(name: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    /// Get period length in calendar days.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

/// 1987 crash, dot-com bust, global financial crisis, COVID crash, 2022 bear.
pub fn default_stress_periods() -> Vec<StressPeriod> {
    vec![
        StressPeriod::new("1987_CRASH", ymd(1987, 8, 1), ymd(1987, 12, 31)),
        StressPeriod::new("DOTCOM_BUST", ymd(2000, 3, 1), ymd(2002, 10, 31)),
        StressPeriod::new("GFC", ymd(2007, 10, 1), ymd(2009, 3, 31)),
        StressPeriod::new("COVID_CRASH", ymd(2020, 2, 1), ymd(2020, 6, 30)),
        StressPeriod::new("BEAR_2022", ymd(2022, 1, 1), ymd(2022, 10, 31)),
    ]
}

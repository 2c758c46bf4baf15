//! Persistence port trait: bars in, fills and reports out.

use crate::domain::bar::Bar;
use crate::domain::error::SigtraderError;
use crate::domain::fill::{Fill, Report};
use chrono::NaiveDate;

pub trait StorePort {
    /// Upsert price bars; returns the number of rows written.
    fn insert_bars(&self, bars: &[Bar]) -> Result<usize, SigtraderError>;

    /// Bars for `ticker` in `[start, end]`, ascending by date.
    fn fetch_bars(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, SigtraderError>;

    /// The most recent `limit` bars for `ticker`, ascending by date.
    fn latest_bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, SigtraderError>;

    /// Full fill history for `ticker`, ascending by fill date then id.
    fn fetch_fills(&self, ticker: &str) -> Result<Vec<Fill>, SigtraderError>;

    /// Append fills in one transaction; returns their row ids in input
    /// order. All-or-nothing.
    fn insert_fills(&self, fills: &[Fill]) -> Result<Vec<i64>, SigtraderError>;

    /// Append explanation reports in one transaction; returns their row
    /// ids in input order.
    fn insert_reports(&self, reports: &[Report]) -> Result<Vec<i64>, SigtraderError>;

    /// Cash balance for the named account, if one has been recorded.
    fn get_cash(&self, account_id: &str) -> Result<Option<f64>, SigtraderError>;

    fn set_cash(&self, account_id: &str, cash: f64) -> Result<(), SigtraderError>;
}

//! Trade fill and explanation report records.

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// One executed (or simulated) trade with post-trade account state.
/// Append-only once written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub id: Option<i64>,
    pub run_id: String,
    pub xai_report_id: Option<i64>,
    pub ticker: String,
    pub signal_date: NaiveDate,
    pub signal_price: f64,
    /// Composite score that triggered the order, formatted to 4 decimals.
    pub signal: String,
    pub fill_date: NaiveDate,
    pub fill_price: f64,
    pub qty: i64,
    pub side: Side,
    pub value: f64,
    pub commission: f64,
    pub cash_after: f64,
    pub position_qty: i64,
    pub avg_price: f64,
    pub pnl_realized: f64,
    pub pnl_unrealized: f64,
}

/// Model-produced trade explanation, optionally linked 1:1 to a fill.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: Option<i64>,
    pub ticker: String,
    pub signal: String,
    pub price: f64,
    pub date: String,
    pub text: String,
}

pub fn format_signal(score: f64) -> String {
    format!("{:.4}", score)
}

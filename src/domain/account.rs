//! Account ledger: cash, long positions, realized P&L.
//!
//! Shorting is disallowed; quantities are non-negative integers and
//! avg_price > 0 iff qty > 0.

use crate::domain::error::SigtraderError;
use crate::domain::fill::{Fill, Side};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_COMMISSION_RATE: f64 = 0.0015;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionState {
    pub qty: i64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellOutcome {
    pub proceeds: f64,
    pub commission: f64,
    pub realized: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub cash: f64,
    pub positions: BTreeMap<String, PositionState>,
    pub realized_pnl: f64,
    pub commission_rate: f64,
}

impl Account {
    pub fn new(cash: f64, commission_rate: f64) -> Self {
        Account {
            cash,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            commission_rate,
        }
    }

    pub fn position(&self, ticker: &str) -> PositionState {
        self.positions.get(ticker).copied().unwrap_or_default()
    }

    /// Buy `qty` shares at `price`. Cost includes commission.
    /// Returns the commission charged.
    pub fn buy(&mut self, ticker: &str, price: f64, qty: i64) -> Result<f64, SigtraderError> {
        let gross = price * qty as f64;
        let commission = gross * self.commission_rate;
        let cost = gross + commission;
        if cost > self.cash {
            return Err(SigtraderError::InsufficientFunds {
                needed: cost,
                cash: self.cash,
            });
        }
        self.cash -= cost;

        let pos = self.positions.entry(ticker.to_string()).or_default();
        let new_qty = pos.qty + qty;
        pos.avg_price = (pos.qty as f64 * pos.avg_price + gross) / new_qty as f64;
        pos.qty = new_qty;
        Ok(commission)
    }

    /// Sell `qty` shares at `price`; `qty` must not exceed the held quantity.
    pub fn sell(
        &mut self,
        ticker: &str,
        price: f64,
        qty: i64,
    ) -> Result<SellOutcome, SigtraderError> {
        let pos = self.position(ticker);
        if qty > pos.qty {
            return Err(SigtraderError::InsufficientPosition {
                ticker: ticker.to_string(),
                have: pos.qty,
                want: qty,
            });
        }

        let gross = price * qty as f64;
        let commission = gross * self.commission_rate;
        let proceeds = gross - commission;
        let realized = proceeds - pos.avg_price * qty as f64;

        self.cash += proceeds;
        self.realized_pnl += realized;

        let entry = self.positions.entry(ticker.to_string()).or_default();
        entry.qty -= qty;
        if entry.qty == 0 {
            entry.avg_price = 0.0;
        }

        Ok(SellOutcome {
            proceeds,
            commission,
            realized,
        })
    }

    /// cash + sum of qty * price; absent prices fall back to avg_price.
    pub fn total_asset(&self, prices: &HashMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .iter()
            .map(|(ticker, pos)| {
                let price = prices.get(ticker).copied().unwrap_or(pos.avg_price);
                pos.qty as f64 * price
            })
            .sum();
        self.cash + position_value
    }

    /// Replay an ordered fill stream onto a fresh account.
    pub fn reconstruct(
        initial_cash: f64,
        commission_rate: f64,
        fills: &[Fill],
    ) -> Result<Account, SigtraderError> {
        let mut account = Account::new(initial_cash, commission_rate);
        for fill in fills {
            match fill.side {
                Side::Buy => {
                    account.buy(&fill.ticker, fill.fill_price, fill.qty)?;
                }
                Side::Sell => {
                    account.sell(&fill.ticker, fill.fill_price, fill.qty)?;
                }
            }
        }
        Ok(account)
    }
}

//! Single-ticker walk-forward backtest.
//!
//! At each bar t the scaler is fitted on rows up to and including t,
//! the trailing window is scaled and scored, the policy decides, and
//! orders fill at that bar's close. The scaler advances incrementally,
//! so no row ever sees statistics from its future.

use crate::domain::account::Account;
use crate::domain::error::SigtraderError;
use crate::domain::features::{FEATURE_COLUMNS, FeatureFrame};
use crate::domain::fill::{Fill, Side, format_signal};
use crate::domain::model::SignalModel;
use crate::domain::policy::{Decision, PolicyConfig, Thresholds, decide};
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::CompositeRule;
use chrono::NaiveDate;
use std::collections::HashMap;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub seq_len: usize,
    pub initial_cash: f64,
    pub commission_rate: f64,
    pub risk_frac: f64,
    pub max_positions_per_ticker: u32,
    pub composite: CompositeRule,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            seq_len: 20,
            initial_cash: 1_000_000.0,
            commission_rate: 0.0015,
            risk_frac: 0.9,
            max_positions_per_ticker: 1,
            composite: CompositeRule::default(),
        }
    }
}

impl BacktestConfig {
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            risk_frac: self.risk_frac,
            max_positions_per_ticker: self.max_positions_per_ticker,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub total_asset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestReport {
    pub final_asset: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub n_trades: usize,
}

#[derive(Debug)]
pub struct BacktestResult {
    pub ticker: String,
    pub fills: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
    pub account: Account,
    pub report: BacktestReport,
}

/// Largest buy quantity whose cost including commission fits in cash.
pub(crate) fn affordable_qty(qty: i64, price: f64, cash: f64, commission_rate: f64) -> i64 {
    let unit_cost = price * (1.0 + commission_rate);
    qty.min((cash / unit_cost).floor() as i64)
}

pub(crate) fn fill_from_trade(
    run_id: &str,
    ticker: &str,
    date: NaiveDate,
    price: f64,
    qty: i64,
    side: Side,
    score: f64,
    commission: f64,
    realized: f64,
    account: &Account,
) -> Fill {
    let pos = account.position(ticker);
    Fill {
        id: None,
        run_id: run_id.to_string(),
        xai_report_id: None,
        ticker: ticker.to_string(),
        signal_date: date,
        signal_price: price,
        signal: format_signal(score),
        fill_date: date,
        fill_price: price,
        qty,
        side,
        value: price * qty as f64,
        commission,
        cash_after: account.cash,
        position_qty: pos.qty,
        avg_price: pos.avg_price,
        pnl_realized: realized,
        pnl_unrealized: (price - pos.avg_price) * pos.qty as f64,
    }
}

pub fn run_walk_forward(
    frame: &FeatureFrame,
    model: &dyn SignalModel,
    cfg: &BacktestConfig,
    thresholds: &Thresholds,
    run_id: &str,
) -> Result<BacktestResult, SigtraderError> {
    let n = frame.len();
    let first_t = frame.valid_from + cfg.seq_len - 1;
    if cfg.seq_len == 0 || first_t >= n {
        return Err(SigtraderError::InsufficientHistory {
            ticker: frame.ticker.clone(),
            bars: n,
            needed: frame.valid_from + cfg.seq_len,
        });
    }

    let columns: Vec<&str> = frame_columns(frame);
    let policy_cfg = cfg.policy();
    let mut account = Account::new(cfg.initial_cash, cfg.commission_rate);
    let mut fills = Vec::new();
    let mut equity_curve = Vec::with_capacity(n - first_t);
    let mut prices = HashMap::new();

    let mut scaler = MinMaxScaler::fit(
        frame.data.slice(ndarray::s![frame.valid_from..=first_t, ..]),
        &columns,
    );

    for t in first_t..n {
        if t > first_t {
            scaler.extend_row(frame.data.row(t));
        }
        let window = scaler.transform(frame.window(t, cfg.seq_len), &columns)?;
        let score = cfg.composite.reduce(&model.predict(window.view())?);
        let price = frame.closes[t];
        let date = frame.dates[t];
        let held = account.position(&frame.ticker).qty;

        match decide(score, price, account.cash, held, thresholds, &policy_cfg) {
            Decision::Buy { qty, .. } => {
                let qty = affordable_qty(qty, price, account.cash, cfg.commission_rate);
                if qty > 0 {
                    let commission = account.buy(&frame.ticker, price, qty)?;
                    fills.push(fill_from_trade(
                        run_id,
                        &frame.ticker,
                        date,
                        price,
                        qty,
                        Side::Buy,
                        score,
                        commission,
                        0.0,
                        &account,
                    ));
                }
            }
            Decision::Sell { qty, .. } => {
                let outcome = account.sell(&frame.ticker, price, qty)?;
                fills.push(fill_from_trade(
                    run_id,
                    &frame.ticker,
                    date,
                    price,
                    qty,
                    Side::Sell,
                    score,
                    outcome.commission,
                    outcome.realized,
                    &account,
                ));
            }
            Decision::Hold { .. } => {}
        }

        prices.insert(frame.ticker.clone(), price);
        equity_curve.push(EquityPoint {
            date,
            total_asset: account.total_asset(&prices),
        });
    }

    let report = summarize(cfg.initial_cash, &equity_curve, fills.len());
    Ok(BacktestResult {
        ticker: frame.ticker.clone(),
        fills,
        equity_curve,
        account,
        report,
    })
}

pub(crate) fn frame_columns(frame: &FeatureFrame) -> Vec<&'static str> {
    FEATURE_COLUMNS
        .iter()
        .take(frame.n_features())
        .copied()
        .collect()
}

pub fn summarize(
    initial_cash: f64,
    equity_curve: &[EquityPoint],
    n_trades: usize,
) -> BacktestReport {
    let final_asset = equity_curve
        .last()
        .map_or(initial_cash, |p| p.total_asset);
    let total_return = if initial_cash > 0.0 {
        final_asset / initial_cash - 1.0
    } else {
        0.0
    };
    BacktestReport {
        final_asset,
        total_return,
        max_drawdown: compute_max_drawdown(equity_curve),
        sharpe: compute_sharpe(equity_curve),
        n_trades,
    }
}

/// Largest peak-to-trough decline as a fraction of the peak.
pub fn compute_max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for point in equity_curve {
        if point.total_asset > peak {
            peak = point.total_asset;
        }
        if peak > 0.0 {
            let dd = (peak - point.total_asset) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Annualized sharpe over daily equity returns, zero risk-free rate.
/// Flat curves report 0.
pub fn compute_sharpe(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].total_asset > 0.0)
        .map(|w| w[1].total_asset / w[0].total_asset - 1.0)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < f64::EPSILON {
        return 0.0;
    }
    mean / std * TRADING_DAYS_PER_YEAR.sqrt()
}

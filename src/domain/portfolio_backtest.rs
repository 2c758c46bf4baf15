//! Multi-ticker portfolio backtest over the union of trading dates.
//!
//! Each bar: score every ticker trading that day, rank candidates whose
//! score clears their buy threshold (score descending, ticker ascending
//! on ties), keep the top K as targets, and rebalance toward equal
//! weights of total assets. Exits and trims execute before buys so the
//! freed cash funds the same bar's purchases. Orders smaller than the
//! rebalance band are skipped.

use crate::domain::account::Account;
use crate::domain::backtest::{
    BacktestReport, EquityPoint, affordable_qty, fill_from_trade, frame_columns, summarize,
};
use crate::domain::error::SigtraderError;
use crate::domain::features::FeatureFrame;
use crate::domain::fill::{Fill, Side};
use crate::domain::model::SignalModel;
use crate::domain::policy::ThresholdGrid;
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::CompositeRule;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    pub seq_len: usize,
    pub initial_cash: f64,
    pub commission_rate: f64,
    /// Number of equal-weight slots.
    pub top_k: usize,
    /// Orders below this fraction of total assets are skipped.
    pub rebalance_band: f64,
    pub composite: CompositeRule,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        PortfolioConfig {
            seq_len: 20,
            initial_cash: 1_000_000.0,
            commission_rate: 0.0015,
            top_k: 5,
            rebalance_band: 0.01,
            composite: CompositeRule::default(),
        }
    }
}

#[derive(Debug)]
pub struct PortfolioResult {
    pub fills: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
    pub account: Account,
    pub report: BacktestReport,
    /// Per-ticker scoring failures; the bar continued without them.
    pub errors: Vec<(String, NaiveDate, String)>,
}

struct TickerState<'a> {
    frame: &'a FeatureFrame,
    columns: Vec<&'static str>,
    scaler: Option<MinMaxScaler>,
    /// First row with a full window of valid feature rows.
    first_t: usize,
    /// Next row to consume from the frame.
    next_row: usize,
}

impl<'a> TickerState<'a> {
    fn new(frame: &'a FeatureFrame, seq_len: usize) -> Self {
        TickerState {
            columns: frame_columns(frame),
            scaler: None,
            first_t: frame.valid_from + seq_len - 1,
            next_row: 0,
            frame,
        }
    }

    /// Row index for `date` if this ticker trades that day.
    fn row_for(&mut self, date: NaiveDate) -> Option<usize> {
        let t = self.next_row;
        if t < self.frame.len() && self.frame.dates[t] == date {
            self.next_row += 1;
            Some(t)
        } else {
            None
        }
    }

    fn score(
        &mut self,
        t: usize,
        seq_len: usize,
        model: &dyn SignalModel,
        composite: &CompositeRule,
    ) -> Result<Option<f64>, SigtraderError> {
        if t < self.first_t {
            return Ok(None);
        }
        match self.scaler.as_mut() {
            None => {
                self.scaler = Some(MinMaxScaler::fit(
                    self.frame
                        .data
                        .slice(ndarray::s![self.frame.valid_from..=t, ..]),
                    &self.columns,
                ));
            }
            Some(scaler) => scaler.extend_row(self.frame.data.row(t)),
        }
        let scaler = self.scaler.as_ref().ok_or(SigtraderError::Store {
            reason: "scaler state missing".into(),
        })?;
        let window = scaler.transform(self.frame.window(t, seq_len), &self.columns)?;
        let score = composite.reduce(&model.predict(window.view())?);
        Ok(Some(score))
    }
}

pub fn run_portfolio(
    frames: &[FeatureFrame],
    model: &dyn SignalModel,
    cfg: &PortfolioConfig,
    thresholds: &ThresholdGrid,
    run_id: &str,
) -> Result<PortfolioResult, SigtraderError> {
    if cfg.seq_len == 0 || cfg.top_k == 0 {
        return Err(SigtraderError::ConfigInvalid {
            section: "portfolio".into(),
            key: "seq_len/top_k".into(),
            reason: "must be positive".into(),
        });
    }

    // Sorted, unique tickers; duplicate frames are a caller bug.
    let mut states: BTreeMap<&str, TickerState<'_>> = BTreeMap::new();
    for frame in frames {
        if states
            .insert(frame.ticker.as_str(), TickerState::new(frame, cfg.seq_len))
            .is_some()
        {
            return Err(SigtraderError::ConfigInvalid {
                section: "portfolio".into(),
                key: "tickers".into(),
                reason: format!("duplicate frame for {}", frame.ticker),
            });
        }
    }

    let timeline: BTreeSet<NaiveDate> = frames
        .iter()
        .flat_map(|f| f.dates.iter().copied())
        .collect();

    let mut account = Account::new(cfg.initial_cash, cfg.commission_rate);
    let mut fills = Vec::new();
    let mut equity_curve = Vec::new();
    let mut errors = Vec::new();
    let mut last_price: HashMap<String, f64> = HashMap::new();

    for date in timeline {
        // (ticker, today's price, score if available)
        let mut today: BTreeMap<&str, (f64, Option<f64>)> = BTreeMap::new();
        for (ticker, state) in states.iter_mut() {
            let Some(t) = state.row_for(date) else {
                continue;
            };
            let price = state.frame.closes[t];
            last_price.insert(ticker.to_string(), price);
            match state.score(t, cfg.seq_len, model, &cfg.composite) {
                Ok(score) => {
                    today.insert(ticker, (price, score));
                }
                Err(e) => {
                    errors.push((ticker.to_string(), date, e.to_string()));
                    today.insert(ticker, (price, None));
                }
            }
        }
        if today.is_empty() {
            continue;
        }

        // Candidates above their buy threshold, best score first,
        // ticker ascending on ties.
        let mut candidates: Vec<(&str, f64)> = today
            .iter()
            .filter_map(|(ticker, (_, score))| {
                score
                    .filter(|s| *s >= thresholds.get(ticker).buy)
                    .map(|s| (*ticker, s))
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let targets: BTreeSet<&str> =
            candidates.iter().take(cfg.top_k).map(|(t, _)| *t).collect();

        let total = account.total_asset(&last_price);
        let slot = total / cfg.top_k as f64;
        let band = cfg.rebalance_band * total;

        // Sells first: full exits for held tickers out of the target
        // set, trims for targets above their slot.
        let held: Vec<String> = account
            .positions
            .iter()
            .filter(|(_, pos)| pos.qty > 0)
            .map(|(t, _)| t.clone())
            .collect();
        for ticker in held {
            let Some((price, score)) = today.get(ticker.as_str()).copied() else {
                continue;
            };
            let pos = account.position(&ticker);
            let sell_qty = if !targets.contains(ticker.as_str()) {
                pos.qty
            } else {
                let excess = pos.qty as f64 * price - slot;
                if excess < band {
                    0
                } else {
                    ((excess / price).floor() as i64).min(pos.qty)
                }
            };
            if sell_qty <= 0 {
                continue;
            }
            let outcome = account.sell(&ticker, price, sell_qty)?;
            fills.push(fill_from_trade(
                run_id,
                &ticker,
                date,
                price,
                sell_qty,
                Side::Sell,
                score.unwrap_or(0.0),
                outcome.commission,
                outcome.realized,
                &account,
            ));
        }

        // Buys fill remaining slot capacity, best candidates first.
        for (ticker, score) in candidates.iter().take(cfg.top_k) {
            let (price, _) = today[ticker];
            let pos = account.position(ticker);
            let shortfall = slot - pos.qty as f64 * price;
            if shortfall < band {
                continue;
            }
            let want = (shortfall / price).floor() as i64;
            let qty = affordable_qty(want, price, account.cash, cfg.commission_rate);
            if qty <= 0 {
                continue;
            }
            let commission = account.buy(ticker, price, qty)?;
            fills.push(fill_from_trade(
                run_id,
                ticker,
                date,
                price,
                qty,
                Side::Buy,
                *score,
                commission,
                0.0,
                &account,
            ));
        }

        equity_curve.push(EquityPoint {
            date,
            total_asset: account.total_asset(&last_price),
        });
    }

    let report = summarize(cfg.initial_cash, &equity_curve, fills.len());
    Ok(PortfolioResult {
        fills,
        equity_curve,
        account,
        report,
        errors,
    })
}

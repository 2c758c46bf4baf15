//! Daily decision run: score each configured ticker on its latest bar,
//! decide, and persist fills plus optional explanation reports.
//!
//! Store failures abort the run; per-ticker pipeline failures only lose
//! that ticker. Each ticker's position is replayed from its full fill
//! stream rather than trusted from the last fill's snapshot. Reports
//! are written before fills so each fill can carry its report's row id.
//! Account cash is read once at the start and written back once at the
//! end.

use crate::domain::account::{Account, PositionState};
use crate::domain::backtest::affordable_qty;
use crate::domain::error::SigtraderError;
use crate::domain::features::{FEATURE_COLUMNS, build_features};
use crate::domain::fill::{Fill, Report, Side, format_signal};
use crate::domain::model::SignalModel;
use crate::domain::policy::{Decision, PolicyConfig, ThresholdGrid, decide};
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::CompositeRule;
use crate::ports::explain_port::ExplainPort;
use crate::ports::store_port::StorePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Decisions are recorded but no broker is contacted.
    Simulation,
    /// Reserved for a broker hookup; currently records exactly like
    /// simulation.
    Live,
}

#[derive(Debug, Clone)]
pub struct DailyConfig {
    pub tickers: Vec<String>,
    /// Bars fetched per ticker; must cover feature warmup plus seq_len.
    pub lookback: usize,
    pub seq_len: usize,
    pub commission_rate: f64,
    pub risk_frac: f64,
    pub max_positions_per_ticker: u32,
    /// Generate explanation reports for non-hold decisions.
    pub xai: bool,
    pub run_id: String,
    pub mode: Mode,
    pub account_id: String,
    /// Seed cash when the store has no balance for `account_id` yet.
    pub initial_cash: f64,
    pub composite: CompositeRule,
}

impl Default for DailyConfig {
    fn default() -> Self {
        DailyConfig {
            tickers: Vec::new(),
            lookback: 300,
            seq_len: 20,
            commission_rate: 0.0015,
            risk_frac: 0.9,
            max_positions_per_ticker: 1,
            xai: true,
            run_id: "daily".into(),
            mode: Mode::Simulation,
            account_id: "default".into(),
            initial_cash: 1_000_000.0,
            composite: CompositeRule::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailySummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fills_written: usize,
    pub reports_written: usize,
}

/// Position replayed from the ticker's full ordered fill stream.
/// The bankroll covers every recorded buy (plus rounding headroom) so
/// the replay cannot fail on funds; authoritative cash lives in the
/// store, keyed by account, not in the per-ticker fill stream.
fn position_from_fills(fills: &[Fill]) -> Result<PositionState, SigtraderError> {
    let Some(first) = fills.first() else {
        return Ok(PositionState::default());
    };
    let bankroll: f64 = fills
        .iter()
        .filter(|f| f.side == Side::Buy)
        .map(|f| f.value)
        .sum::<f64>()
        + 1.0;
    let replayed = Account::reconstruct(bankroll, 0.0, fills)?;
    Ok(replayed.position(&first.ticker))
}

pub fn run_daily(
    store: &dyn StorePort,
    explain: Option<&dyn ExplainPort>,
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    cfg: &DailyConfig,
    thresholds: &ThresholdGrid,
) -> Result<DailySummary, SigtraderError> {
    let policy_cfg = PolicyConfig {
        risk_frac: cfg.risk_frac,
        max_positions_per_ticker: cfg.max_positions_per_ticker,
    };
    let cash = store
        .get_cash(&cfg.account_id)?
        .unwrap_or(cfg.initial_cash);
    let mut account = Account::new(cash, cfg.commission_rate);
    let mut summary = DailySummary::default();
    let mut pending_fills: Vec<Fill> = Vec::new();
    // Index into pending_fills for each pending report.
    let mut pending_reports: Vec<(usize, Report)> = Vec::new();

    for ticker in &cfg.tickers {
        let bars = store.latest_bars(ticker, cfg.lookback)?;
        let past_fills = store.fetch_fills(ticker)?;
        let held = match position_from_fills(&past_fills) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("[daily] {ticker} FAIL: inconsistent fill history: {e}");
                summary.failed += 1;
                continue;
            }
        };
        account.positions.insert(ticker.clone(), held);

        let scored = score_latest(&bars, model, scaler, cfg);
        let (frame_row, score) = match scored {
            Ok(v) => v,
            Err(e @ SigtraderError::InsufficientHistory { .. }) => {
                eprintln!("[daily] {ticker} SKIP: {e}");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                eprintln!("[daily] {ticker} FAIL: {e}");
                summary.failed += 1;
                continue;
            }
        };
        let (date, price, features_row) = frame_row;

        let decision = decide(
            score,
            price,
            account.cash,
            held.qty,
            &thresholds.get(ticker),
            &policy_cfg,
        );
        eprintln!(
            "[daily] {ticker} OK score={score:.4} price={price:.2} -> {}",
            decision.reason().tag()
        );
        summary.processed += 1;

        let (side, qty, commission, realized) = match decision {
            Decision::Buy { qty, .. } => {
                let qty = affordable_qty(qty, price, account.cash, cfg.commission_rate);
                if qty <= 0 {
                    continue;
                }
                let commission = account.buy(ticker, price, qty)?;
                (Side::Buy, qty, commission, 0.0)
            }
            Decision::Sell { qty, .. } => {
                let outcome = account.sell(ticker, price, qty)?;
                (Side::Sell, qty, outcome.commission, outcome.realized)
            }
            Decision::Hold { .. } => continue,
        };

        let pos = account.position(ticker);
        let signal = format_signal(score);
        let fill = Fill {
            id: None,
            run_id: cfg.run_id.clone(),
            xai_report_id: None,
            ticker: ticker.clone(),
            signal_date: date,
            signal_price: price,
            signal: signal.clone(),
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
        };
        let fill_index = pending_fills.len();
        pending_fills.push(fill);

        if cfg.xai {
            if let Some(xai) = explain {
                match xai.explain(ticker, &signal, price, date, &features_row) {
                    Ok(text) => pending_reports.push((
                        fill_index,
                        Report {
                            id: None,
                            ticker: ticker.clone(),
                            signal,
                            price,
                            date: date.to_string(),
                            text,
                        },
                    )),
                    Err(e) => eprintln!("[daily] {ticker} explanation unavailable: {e}"),
                }
            }
        }
    }

    // Reports first so fills can reference them.
    if !pending_reports.is_empty() {
        let reports: Vec<Report> = pending_reports.iter().map(|(_, r)| r.clone()).collect();
        let ids = store.insert_reports(&reports)?;
        for ((fill_index, _), id) in pending_reports.iter().zip(ids) {
            pending_fills[*fill_index].xai_report_id = Some(id);
        }
        summary.reports_written = pending_reports.len();
    }
    if !pending_fills.is_empty() {
        store.insert_fills(&pending_fills)?;
        summary.fills_written = pending_fills.len();
    }
    store.set_cash(&cfg.account_id, account.cash)?;
    Ok(summary)
}

type LatestRow = (chrono::NaiveDate, f64, Vec<(&'static str, f64)>);

/// Build features from the fetched bars and score the final row.
fn score_latest(
    bars: &[crate::domain::bar::Bar],
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    cfg: &DailyConfig,
) -> Result<(LatestRow, f64), SigtraderError> {
    let frame = build_features(bars)?;
    let t = frame.len() - 1;
    if t < frame.valid_from + cfg.seq_len - 1 {
        return Err(SigtraderError::InsufficientHistory {
            ticker: frame.ticker.clone(),
            bars: frame.len(),
            needed: frame.valid_from + cfg.seq_len,
        });
    }
    let columns: Vec<&str> = FEATURE_COLUMNS.to_vec();
    let window = scaler.transform(frame.window(t, cfg.seq_len), &columns)?;
    let score = cfg.composite.reduce(&model.predict(window.view())?);

    let features_row: Vec<(&'static str, f64)> = FEATURE_COLUMNS
        .iter()
        .enumerate()
        .map(|(c, name)| (*name, frame.data[[t, c]]))
        .collect();
    Ok(((frame.dates[t], frame.closes[t], features_row), score))
}

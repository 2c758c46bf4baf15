//! Per-ticker threshold grid search.
//!
//! Exhaustively backtests every valid (buy, sell) pair from the grids
//! and keeps the pair with the highest total return. Ties keep the
//! first pair in grid order (buy ascending, then sell ascending), so a
//! run is reproducible.

use crate::domain::backtest::{BacktestConfig, run_walk_forward};
use crate::domain::error::SigtraderError;
use crate::domain::features::FeatureFrame;
use crate::domain::model::SignalModel;
use crate::domain::policy::{ThresholdGrid, Thresholds};

#[derive(Debug, Clone)]
pub struct TuneConfig {
    pub buy_grid: Vec<f64>,
    pub sell_grid: Vec<f64>,
    pub backtest: BacktestConfig,
}

impl Default for TuneConfig {
    fn default() -> Self {
        TuneConfig {
            buy_grid: vec![0.55, 0.6, 0.65, 0.7, 0.75],
            sell_grid: vec![0.25, 0.3, 0.35, 0.4, 0.45],
            backtest: BacktestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuneOutcome {
    pub ticker: String,
    pub thresholds: Thresholds,
    pub total_return: f64,
    /// Number of (buy, sell) pairs actually backtested.
    pub evaluated: usize,
}

pub fn tune_ticker(
    frame: &FeatureFrame,
    model: &dyn SignalModel,
    cfg: &TuneConfig,
) -> Result<TuneOutcome, SigtraderError> {
    let mut best: Option<(Thresholds, f64)> = None;
    let mut evaluated = 0usize;

    for &buy in &cfg.buy_grid {
        for &sell in &cfg.sell_grid {
            let Ok(thresholds) = Thresholds::new(buy, sell) else {
                continue;
            };
            let result =
                run_walk_forward(frame, model, &cfg.backtest, &thresholds, "tune")?;
            evaluated += 1;
            let ret = result.report.total_return;
            // Strict comparison keeps the earliest pair on ties.
            if best.as_ref().is_none_or(|(_, b)| ret > *b) {
                best = Some((thresholds, ret));
            }
        }
    }

    let (thresholds, total_return) = best.ok_or(SigtraderError::ConfigInvalid {
        section: "tune".into(),
        key: "buy_grid/sell_grid".into(),
        reason: "no valid (buy, sell) pair in the grids".into(),
    })?;
    Ok(TuneOutcome {
        ticker: frame.ticker.clone(),
        thresholds,
        total_return,
        evaluated,
    })
}

/// Tune every frame and assemble a per-ticker grid over the defaults.
pub fn tune_grid(
    frames: &[FeatureFrame],
    model: &dyn SignalModel,
    cfg: &TuneConfig,
) -> Result<(ThresholdGrid, Vec<TuneOutcome>), SigtraderError> {
    let mut grid = ThresholdGrid::uniform(Thresholds::default());
    let mut outcomes = Vec::with_capacity(frames.len());
    for frame in frames {
        let outcome = tune_ticker(frame, model, cfg)?;
        grid.set(&outcome.ticker, outcome.thresholds);
        outcomes.push(outcome);
    }
    Ok((grid, outcomes))
}

//! Feature pipeline: raw OHLCV bars to a fixed-shape numeric frame.
//!
//! Every feature at row t is computed from rows with date <= t only. Rolling
//! columns are NaN until their warmup is satisfied; `valid_from` marks the
//! first row where the whole row is finite. After all columns are computed,
//! remaining NaN/inf cells are replaced with 0.

use crate::domain::bar::{is_sorted_unique, Bar};
use crate::domain::error::SigtraderError;
use chrono::{Datelike, NaiveDate};
use ndarray::{s, Array2, ArrayView2};

/// Guard for divisions by near-zero denominators.
pub const EPS: f64 = 1e-9;

/// Ordered feature schema. The order is part of the model/scaler contract.
pub const FEATURE_COLUMNS: [&str; 18] = [
    "log_return",
    "ma5",
    "ma20",
    "ma60",
    "rsi14",
    "macd",
    "macd_signal",
    "upper_band",
    "lower_band",
    "bb_position",
    "atr14",
    "vol_change",
    "weekly_ma5",
    "weekly_rsi14",
    "weekly_bb_position",
    "monthly_ma3",
    "monthly_rsi6",
    "monthly_bb_position",
];

/// Minimum daily rows before the builder even attempts the frame
/// (longest daily window, MA60, plus one return row).
pub const MIN_DAILY_ROWS: usize = 61;

/// Approximate full warmup including monthly resampled columns; used for
/// the `needed` hint in `InsufficientHistory`.
pub const WARMUP_HINT: usize = 220;

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub ticker: String,
    pub dates: Vec<NaiveDate>,
    pub closes: Vec<f64>,
    /// rows x FEATURE_COLUMNS.len(), NaN-free after finalize.
    pub data: Array2<f64>,
    /// Index of the first row where every feature had a real value.
    pub valid_from: usize,
}

impl FeatureFrame {
    pub fn from_parts(
        ticker: String,
        dates: Vec<NaiveDate>,
        closes: Vec<f64>,
        data: Array2<f64>,
        valid_from: usize,
    ) -> Self {
        FeatureFrame {
            ticker,
            dates,
            closes,
            data,
            valid_from,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Window of `seq_len` rows ending at (and including) row `t`.
    pub fn window(&self, t: usize, seq_len: usize) -> ArrayView2<'_, f64> {
        self.data.slice(s![t + 1 - seq_len..=t, ..])
    }

    /// Rows up to and including `t` (the walk-forward scaling prefix).
    pub fn prefix(&self, t: usize) -> ArrayView2<'_, f64> {
        self.data.slice(s![..=t, ..])
    }
}

/// Build the full feature frame for one ticker.
pub fn build_features(bars: &[Bar]) -> Result<FeatureFrame, SigtraderError> {
    let ticker = bars.first().map(|b| b.ticker.clone()).unwrap_or_default();
    if bars.len() < MIN_DAILY_ROWS {
        return Err(SigtraderError::InsufficientHistory {
            ticker,
            bars: bars.len(),
            needed: MIN_DAILY_ROWS,
        });
    }
    if !is_sorted_unique(bars) {
        return Err(SigtraderError::StoreQuery {
            reason: format!("bars for {} are not strictly ascending by date", ticker),
        });
    }

    let n = bars.len();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();
    let mut data = Array2::<f64>::from_elem((n, FEATURE_COLUMNS.len()), f64::NAN);

    fill_log_return(&closes, &mut data, 0);
    fill_sma(&closes, 5, &mut data, 1);
    fill_sma(&closes, 20, &mut data, 2);
    fill_sma(&closes, 60, &mut data, 3);
    fill_rsi(&closes, 14, &mut data, 4);
    fill_macd(&closes, 12, 26, 9, &mut data, 5, 6);
    fill_bollinger(&closes, 20, 2.0, &mut data, 7, 8, 9);
    fill_atr(bars, 14, &mut data, 10);
    fill_pct_change(&volumes, &mut data, 11);
    fill_period_features(bars, &closes, &mut data);

    let valid_from = match first_valid_row(&data) {
        Some(i) => i,
        None => {
            return Err(SigtraderError::InsufficientHistory {
                ticker,
                bars: n,
                needed: WARMUP_HINT,
            });
        }
    };

    // Final pass: dead warmup cells become 0 once nothing depends on them.
    data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });

    Ok(FeatureFrame {
        ticker,
        dates: bars.iter().map(|b| b.date).collect(),
        closes,
        data,
        valid_from,
    })
}

fn first_valid_row(data: &Array2<f64>) -> Option<usize> {
    (0..data.nrows()).find(|&i| data.row(i).iter().all(|v| v.is_finite()))
}

fn fill_log_return(closes: &[f64], data: &mut Array2<f64>, col: usize) {
    for t in 1..closes.len() {
        data[[t, col]] = (closes[t] / (closes[t - 1] + EPS)).ln();
    }
}

fn fill_pct_change(values: &[f64], data: &mut Array2<f64>, col: usize) {
    for t in 1..values.len() {
        data[[t, col]] = values[t] / (values[t - 1] + EPS) - 1.0;
    }
}

fn fill_sma(closes: &[f64], period: usize, data: &mut Array2<f64>, col: usize) {
    let mut sum = 0.0;
    for t in 0..closes.len() {
        sum += closes[t];
        if t >= period {
            sum -= closes[t - period];
        }
        if t + 1 >= period {
            data[[t, col]] = sum / period as f64;
        }
    }
}

/// Wilder RSI over the full daily series.
fn fill_rsi(closes: &[f64], period: usize, data: &mut Array2<f64>, col: usize) {
    if closes.len() <= period {
        return;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for t in 1..=period {
        let diff = closes[t] - closes[t - 1];
        if diff > 0.0 {
            avg_gain += diff;
        } else {
            avg_loss += -diff;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    data[[period, col]] = rsi_value(avg_gain, avg_loss);

    for t in period + 1..closes.len() {
        let diff = closes[t] - closes[t - 1];
        let (gain, loss) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        data[[t, col]] = rsi_value(avg_gain, avg_loss);
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = avg_gain / (avg_loss + EPS);
    100.0 - 100.0 / (1.0 + rs)
}

fn fill_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
    data: &mut Array2<f64>,
    macd_col: usize,
    signal_col: usize,
) {
    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    let macd_from = slow - 1;
    if closes.len() <= macd_from {
        return;
    }

    let macd: Vec<f64> = (0..closes.len()).map(|t| ema_fast[t] - ema_slow[t]).collect();
    for (t, &v) in macd.iter().enumerate().skip(macd_from) {
        data[[t, macd_col]] = v;
    }

    // Signal line: EMA(signal) of the MACD line, seeded at the first valid MACD.
    let k = 2.0 / (signal as f64 + 1.0);
    let mut sig = macd[macd_from];
    for (t, &v) in macd.iter().enumerate().skip(macd_from + 1) {
        sig = v * k + sig * (1.0 - k);
        if t >= macd_from + signal - 1 {
            data[[t, signal_col]] = sig;
        }
    }
}

/// Recursive EMA seeded on the first close.
fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    let mut ema = closes[0];
    out.push(ema);
    for &c in &closes[1..] {
        ema = c * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

fn fill_bollinger(
    closes: &[f64],
    period: usize,
    mult: f64,
    data: &mut Array2<f64>,
    upper_col: usize,
    lower_col: usize,
    pos_col: usize,
) {
    for t in period - 1..closes.len() {
        let window = &closes[t + 1 - period..=t];
        let (upper, lower) = bollinger_bands(window, mult);
        data[[t, upper_col]] = upper;
        data[[t, lower_col]] = lower;
        data[[t, pos_col]] = (closes[t] - lower) / (upper - lower + EPS);
    }
}

fn bollinger_bands(window: &[f64], mult: f64) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    (mean + mult * sd, mean - mult * sd)
}

/// Wilder ATR, seeded with the mean of the first `period` true ranges.
fn fill_atr(bars: &[Bar], period: usize, data: &mut Array2<f64>, col: usize) {
    if bars.len() < period {
        return;
    }
    let mut tr = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let v = if i == 0 {
            bar.high - bar.low
        } else {
            bar.true_range(bars[i - 1].close)
        };
        tr.push(v);
    }

    let mut atr = tr[..period].iter().sum::<f64>() / period as f64;
    data[[period - 1, col]] = atr;
    for t in period..bars.len() {
        atr = (atr * (period - 1) as f64 + tr[t]) / period as f64;
        data[[t, col]] = atr;
    }
}

/// Weekly and monthly resampled columns.
///
/// The period series at row t is the last close of each completed period
/// up to t plus the current period's running last close (row t itself), so
/// no value ever depends on a later row. This matches resample-last +
/// forward-fill onto the daily index.
fn fill_period_features(bars: &[Bar], closes: &[f64], data: &mut Array2<f64>) {
    let mut weekly: Vec<f64> = Vec::new();
    let mut monthly: Vec<f64> = Vec::new();
    let mut week_id: Option<(i32, u32)> = None;
    let mut month_id: Option<(i32, u32)> = None;

    for t in 0..bars.len() {
        let date = bars[t].date;
        let iso = date.iso_week();
        let wid = (iso.year(), iso.week());
        let mid = (date.year(), date.month());

        if week_id == Some(wid) {
            *weekly.last_mut().unwrap() = closes[t];
        } else {
            weekly.push(closes[t]);
            week_id = Some(wid);
        }
        if month_id == Some(mid) {
            *monthly.last_mut().unwrap() = closes[t];
        } else {
            monthly.push(closes[t]);
            month_id = Some(mid);
        }

        data[[t, 12]] = sma_last(&weekly, 5);
        data[[t, 13]] = rsi_last(&weekly, 14);
        data[[t, 14]] = bb_position_last(&weekly, 10, 2.0);
        data[[t, 15]] = sma_last(&monthly, 3);
        data[[t, 16]] = rsi_last(&monthly, 6);
        data[[t, 17]] = bb_position_last(&monthly, 6, 2.0);
    }
}

fn sma_last(values: &[f64], period: usize) -> f64 {
    if values.len() < period {
        return f64::NAN;
    }
    values[values.len() - period..].iter().sum::<f64>() / period as f64
}

/// Wilder RSI of the final element of a (short) period series.
fn rsi_last(values: &[f64], period: usize) -> f64 {
    if values.len() <= period {
        return f64::NAN;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for t in 1..=period {
        let diff = values[t] - values[t - 1];
        if diff > 0.0 {
            avg_gain += diff;
        } else {
            avg_loss += -diff;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    for t in period + 1..values.len() {
        let diff = values[t] - values[t - 1];
        let (gain, loss) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }
    rsi_value(avg_gain, avg_loss)
}

fn bb_position_last(values: &[f64], period: usize, mult: f64) -> f64 {
    if values.len() < period {
        return f64::NAN;
    }
    let window = &values[values.len() - period..];
    let (upper, lower) = bollinger_bands(window, mult);
    let last = *values.last().unwrap();
    (last - lower) / (upper - lower + EPS)
}

//! Offline signal quality evaluation against realized forward returns.
//!
//! Uses the persisted scaler as-is (no refitting): the point is to
//! measure the artifact that would trade, not a freshly fitted one.
//! A sample at bar t is labelled positive when the close `horizon` bars
//! later exceeds close[t] by more than `theta`. An optional
//! [start, end] window restricts which bars are scored; bars before
//! `start` still feed feature warmup and sequence history.

use crate::domain::backtest::frame_columns;
use crate::domain::error::SigtraderError;
use crate::domain::features::FeatureFrame;
use crate::domain::model::SignalModel;
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::CompositeRule;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub seq_len: usize,
    /// Forward-return horizon in trading days.
    pub horizon: usize,
    /// Return threshold separating positive from negative labels.
    pub theta: f64,
    /// Scores at or above this count as a predicted BUY.
    pub buy_threshold: f64,
    pub composite: CompositeRule,
    /// First scored date (inclusive); earlier bars remain warmup history.
    pub start: Option<NaiveDate>,
    /// Last scored date (inclusive).
    pub end: Option<NaiveDate>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            seq_len: 20,
            horizon: 5,
            theta: 0.0,
            buy_threshold: 0.6,
            composite: CompositeRule::default(),
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl Confusion {
    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.tp + self.tn) as f64 / total as f64
    }

    /// Fraction of predicted buys that were right.
    pub fn hit_rate(&self) -> f64 {
        let buys = self.tp + self.fp;
        if buys == 0 {
            return 0.0;
        }
        self.tp as f64 / buys as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Single ticker, or comma-joined tickers for an aggregate.
    pub ticker: String,
    pub samples: usize,
    pub confusion: Confusion,
    pub accuracy: f64,
    pub hit_rate: f64,
    /// Mean forward return over bars the model flagged as BUY.
    pub avg_return_on_buy: f64,
    /// Mean forward return over every evaluated bar.
    pub avg_return_all: f64,
    /// Gross gains over gross losses on flagged bars; infinite when
    /// there were gains and no losses.
    pub profit_factor: f64,
}

/// Raw per-frame accumulators, mergeable across tickers.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    confusion: Confusion,
    sum_return_all: f64,
    sum_return_buy: f64,
    gains: f64,
    losses: f64,
    samples: usize,
}

impl Tally {
    fn merge(&mut self, other: &Tally) {
        self.confusion.tp += other.confusion.tp;
        self.confusion.fp += other.confusion.fp;
        self.confusion.tn += other.confusion.tn;
        self.confusion.fn_ += other.confusion.fn_;
        self.sum_return_all += other.sum_return_all;
        self.sum_return_buy += other.sum_return_buy;
        self.gains += other.gains;
        self.losses += other.losses;
        self.samples += other.samples;
    }
}

fn tally_frame(
    frame: &FeatureFrame,
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    cfg: &EvalConfig,
) -> Result<Tally, SigtraderError> {
    let n = frame.len();
    let first_t = frame.valid_from + cfg.seq_len - 1;
    if cfg.seq_len == 0 || cfg.horizon == 0 || first_t + cfg.horizon >= n {
        return Err(SigtraderError::InsufficientHistory {
            ticker: frame.ticker.clone(),
            bars: n,
            needed: frame.valid_from + cfg.seq_len + cfg.horizon,
        });
    }

    let columns = frame_columns(frame);
    let mut tally = Tally::default();

    for t in first_t..n - cfg.horizon {
        let date = frame.dates[t];
        if cfg.start.is_some_and(|s| date < s) || cfg.end.is_some_and(|e| date > e) {
            continue;
        }
        let window = scaler.transform(frame.window(t, cfg.seq_len), &columns)?;
        let score = cfg.composite.reduce(&model.predict(window.view())?);
        let predicted_buy = score >= cfg.buy_threshold;

        let fwd = frame.closes[t + cfg.horizon] / frame.closes[t] - 1.0;
        let label_up = fwd > cfg.theta;

        match (predicted_buy, label_up) {
            (true, true) => tally.confusion.tp += 1,
            (true, false) => tally.confusion.fp += 1,
            (false, false) => tally.confusion.tn += 1,
            (false, true) => tally.confusion.fn_ += 1,
        }
        tally.sum_return_all += fwd;
        if predicted_buy {
            tally.sum_return_buy += fwd;
            if fwd >= 0.0 {
                tally.gains += fwd;
            } else {
                tally.losses += -fwd;
            }
        }
        tally.samples += 1;
    }
    Ok(tally)
}

fn finalize(ticker: String, tally: Tally) -> Evaluation {
    let buys = tally.confusion.tp + tally.confusion.fp;
    let profit_factor = if tally.losses > 0.0 {
        tally.gains / tally.losses
    } else if tally.gains > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Evaluation {
        ticker,
        samples: tally.samples,
        confusion: tally.confusion,
        accuracy: tally.confusion.accuracy(),
        hit_rate: tally.confusion.hit_rate(),
        avg_return_on_buy: if buys > 0 {
            tally.sum_return_buy / buys as f64
        } else {
            0.0
        },
        avg_return_all: if tally.samples > 0 {
            tally.sum_return_all / tally.samples as f64
        } else {
            0.0
        },
        profit_factor,
    }
}

pub fn evaluate(
    frame: &FeatureFrame,
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    cfg: &EvalConfig,
) -> Result<Evaluation, SigtraderError> {
    let tally = tally_frame(frame, model, scaler, cfg)?;
    if tally.samples == 0 {
        return Err(SigtraderError::InsufficientHistory {
            ticker: frame.ticker.clone(),
            bars: frame.len(),
            needed: frame.valid_from + cfg.seq_len + cfg.horizon,
        });
    }
    Ok(finalize(frame.ticker.clone(), tally))
}

/// Evaluate each frame independently and pool one global confusion
/// matrix and return metrics across tickers. Frames too short for the
/// window are skipped, not fatal.
pub fn evaluate_many(
    frames: &[FeatureFrame],
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    cfg: &EvalConfig,
) -> Result<Evaluation, SigtraderError> {
    let mut total = Tally::default();
    let mut names = Vec::new();
    for frame in frames {
        match tally_frame(frame, model, scaler, cfg) {
            Ok(tally) => {
                total.merge(&tally);
                names.push(frame.ticker.clone());
            }
            Err(e @ SigtraderError::InsufficientHistory { .. }) => {
                eprintln!("[evaluate] {} SKIP: {e}", frame.ticker);
            }
            Err(e) => return Err(e),
        }
    }
    if total.samples == 0 {
        return Err(SigtraderError::InvalidInput {
            reason: "no bars to evaluate in the requested window".into(),
        });
    }
    Ok(finalize(names.join(","), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{InputShape, ModelSpec, TrainReport};
    use crate::domain::score::Score;
    use ndarray::{Array2, Array3, ArrayView2};

    struct LastCellModel {
        spec: ModelSpec,
    }

    impl SignalModel for LastCellModel {
        fn name(&self) -> &'static str {
            "last-cell"
        }
        fn spec(&self) -> &ModelSpec {
            &self.spec
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn shape(&self) -> Option<InputShape> {
            None
        }
        fn build(&mut self, _shape: InputShape) -> Result<(), SigtraderError> {
            Ok(())
        }
        fn train(
            &mut self,
            _x: &Array3<f64>,
            _y: &Array2<f64>,
        ) -> Result<TrainReport, SigtraderError> {
            Ok(TrainReport {
                epochs: 0,
                samples: 0,
                final_loss: 0.0,
            })
        }
        fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
            Ok(Score::Scalar(window[[window.nrows() - 1, 0]]))
        }
        fn save(&self, _dir: &std::path::Path) -> Result<(), SigtraderError> {
            Ok(())
        }
    }

    fn frame(ticker: &str, scores: &[f64], closes: &[f64]) -> FeatureFrame {
        assert_eq!(scores.len(), closes.len());
        let n = scores.len();
        let dates = (0..n)
            .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64))
            .collect();
        let mut data = Array2::zeros((n, 1));
        for (i, s) in scores.iter().enumerate() {
            data[[i, 0]] = *s;
        }
        FeatureFrame::from_parts(ticker.into(), dates, closes.to_vec(), data, 0)
    }

    fn identity_scaler() -> MinMaxScaler {
        let anchor = ndarray::array![[0.0], [1.0]];
        MinMaxScaler::fit(anchor.view(), &["log_return"])
    }

    fn cfg() -> EvalConfig {
        EvalConfig {
            seq_len: 2,
            horizon: 1,
            theta: 0.0,
            buy_threshold: 0.6,
            composite: CompositeRule::default(),
            start: None,
            end: None,
        }
    }

    fn model() -> LastCellModel {
        LastCellModel {
            spec: ModelSpec::default(),
        }
    }

    const PERFECT_SCORES: [f64; 6] = [0.0, 0.9, 0.1, 0.9, 0.1, 0.0];
    const INVERTED_SCORES: [f64; 6] = [0.0, 0.1, 0.9, 0.1, 0.9, 0.0];
    const WAVE_CLOSES: [f64; 6] = [100.0, 100.0, 110.0, 100.0, 110.0, 100.0];

    #[test]
    fn perfect_model_fills_the_diagonal() {
        // Score 0.9 right before every up move, 0.1 before every down move.
        let eval = evaluate(
            &frame("EVAL", &PERFECT_SCORES, &WAVE_CLOSES),
            &model(),
            &identity_scaler(),
            &cfg(),
        )
        .unwrap();

        // t = 1..=4 evaluated.
        assert_eq!(eval.samples, 4);
        assert_eq!(eval.confusion.tp, 2);
        assert_eq!(eval.confusion.tn, 2);
        assert_eq!(eval.confusion.fp, 0);
        assert_eq!(eval.confusion.fn_, 0);
        assert!((eval.accuracy - 1.0).abs() < 1e-12);
        assert!((eval.hit_rate - 1.0).abs() < 1e-12);
        assert!((eval.avg_return_on_buy - 0.1).abs() < 1e-12);
        assert!(eval.profit_factor.is_infinite());
    }

    #[test]
    fn inverted_model_fills_the_off_diagonal() {
        let eval = evaluate(
            &frame("EVAL", &INVERTED_SCORES, &WAVE_CLOSES),
            &model(),
            &identity_scaler(),
            &cfg(),
        )
        .unwrap();
        assert_eq!(eval.confusion.fp, 2);
        assert_eq!(eval.confusion.fn_, 2);
        assert!((eval.accuracy - 0.0).abs() < 1e-12);
        assert!((eval.hit_rate - 0.0).abs() < 1e-12);
        assert!(eval.avg_return_on_buy < 0.0);
    }

    #[test]
    fn theta_moves_the_label_boundary() {
        // +1% move: positive under theta=0, negative under theta=0.05.
        let scores = [0.0, 0.9, 0.0];
        let closes = [100.0, 100.0, 101.0];
        let mut config = cfg();
        let eval = evaluate(
            &frame("EVAL", &scores, &closes),
            &model(),
            &identity_scaler(),
            &config,
        )
        .unwrap();
        assert_eq!(eval.confusion.tp, 1);

        config.theta = 0.05;
        let eval = evaluate(
            &frame("EVAL", &scores, &closes),
            &model(),
            &identity_scaler(),
            &config,
        )
        .unwrap();
        assert_eq!(eval.confusion.fp, 1);
    }

    #[test]
    fn never_buys_yields_zero_hit_rate_not_nan() {
        let scores = [0.0, 0.1, 0.1, 0.1, 0.1];
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0];
        let eval = evaluate(
            &frame("EVAL", &scores, &closes),
            &model(),
            &identity_scaler(),
            &cfg(),
        )
        .unwrap();
        assert!((eval.hit_rate - 0.0).abs() < 1e-12);
        assert!((eval.avg_return_on_buy - 0.0).abs() < 1e-12);
        assert!((eval.profit_factor - 0.0).abs() < 1e-12);
        assert!(eval.avg_return_all > 0.0);
    }

    #[test]
    fn too_short_history_is_rejected() {
        let scores = [0.0, 0.5];
        let closes = [100.0, 100.0];
        let result = evaluate(
            &frame("EVAL", &scores, &closes),
            &model(),
            &identity_scaler(),
            &cfg(),
        );
        assert!(matches!(
            result,
            Err(SigtraderError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn window_bounds_restrict_scored_bars() {
        // Dates run 2024-01-01..=01-06; unbounded the loop scores t=1..=4.
        let f = frame("EVAL", &PERFECT_SCORES, &WAVE_CLOSES);
        let full = evaluate(&f, &model(), &identity_scaler(), &cfg()).unwrap();
        assert_eq!(full.samples, 4);

        let mut config = cfg();
        config.start = NaiveDate::from_ymd_opt(2024, 1, 4);
        config.end = NaiveDate::from_ymd_opt(2024, 1, 4);
        let windowed = evaluate(&f, &model(), &identity_scaler(), &config).unwrap();

        // Only t=3 (score 0.9 before an up move) is inside the window,
        // scored with a sequence reaching back before the window start.
        assert_eq!(windowed.samples, 1);
        assert_eq!(windowed.confusion.tp, 1);
        assert_eq!(windowed.confusion.total(), 1);
    }

    #[test]
    fn empty_window_is_rejected() {
        let f = frame("EVAL", &PERFECT_SCORES, &WAVE_CLOSES);
        let mut config = cfg();
        config.start = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert!(matches!(
            evaluate(&f, &model(), &identity_scaler(), &config),
            Err(SigtraderError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn aggregate_pools_the_confusion_matrix_across_tickers() {
        let frames = vec![
            frame("UP", &PERFECT_SCORES, &WAVE_CLOSES),
            frame("DOWN", &INVERTED_SCORES, &WAVE_CLOSES),
        ];
        let eval = evaluate_many(&frames, &model(), &identity_scaler(), &cfg()).unwrap();

        assert_eq!(eval.ticker, "UP,DOWN");
        assert_eq!(eval.samples, 8);
        assert_eq!(eval.confusion.tp, 2);
        assert_eq!(eval.confusion.fp, 2);
        assert_eq!(eval.confusion.tn, 2);
        assert_eq!(eval.confusion.fn_, 2);
        assert!((eval.accuracy - 0.5).abs() < 1e-12);
        assert!((eval.hit_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn aggregate_skips_short_frames() {
        let frames = vec![
            frame("EVAL", &PERFECT_SCORES, &WAVE_CLOSES),
            frame("TINY", &[0.0, 0.5], &[100.0, 100.0]),
        ];
        let eval = evaluate_many(&frames, &model(), &identity_scaler(), &cfg()).unwrap();
        assert_eq!(eval.ticker, "EVAL");
        assert_eq!(eval.samples, 4);
    }

    #[test]
    fn aggregate_with_no_evaluable_frames_is_an_error() {
        let frames = vec![frame("TINY", &[0.0, 0.5], &[100.0, 100.0])];
        assert!(matches!(
            evaluate_many(&frames, &model(), &identity_scaler(), &cfg()),
            Err(SigtraderError::InvalidInput { .. })
        ));
    }
}

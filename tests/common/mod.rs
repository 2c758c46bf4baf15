#![allow(dead_code)]

use chrono::NaiveDate;
use ndarray::{Array2, Array3, ArrayView2};
use sigtrader::domain::bar::Bar;
use sigtrader::domain::error::SigtraderError;
use sigtrader::domain::features::{FEATURE_COLUMNS, FeatureFrame, build_features};
use sigtrader::domain::model::{InputShape, ModelSpec, SignalModel, TrainReport};
use sigtrader::domain::scaler::MinMaxScaler;
use sigtrader::domain::score::Score;
use sigtrader::ports::explain_port::ExplainPort;
use std::cell::Cell;
use std::path::Path;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(ticker: &str, date: NaiveDate, close: f64, volume: i64) -> Bar {
    Bar {
        ticker: ticker.to_string(),
        date,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume,
        adj_close: close,
    }
}

/// Deterministic wavy price series, long enough for the monthly feature
/// warmup (which dominates `valid_from`).
pub fn sample_bars(ticker: &str, n: usize) -> Vec<Bar> {
    let start = date(2023, 1, 2);
    (0..n)
        .map(|i| {
            let d = start + chrono::Duration::days(i as i64);
            let close = 100.0 + 10.0 * ((i as f64) * 0.11).sin() + 0.02 * i as f64;
            make_bar(ticker, d, close, 10_000 + (i as i64 % 7) * 500)
        })
        .collect()
}

pub fn sample_frame(ticker: &str, n: usize) -> FeatureFrame {
    build_features(&sample_bars(ticker, n)).unwrap()
}

/// Scaler fitted on the frame's valid rows, as `init-model` would do.
pub fn fitted_scaler(frame: &FeatureFrame) -> MinMaxScaler {
    let columns: Vec<&str> = FEATURE_COLUMNS.to_vec();
    MinMaxScaler::fit(
        frame.data.slice(ndarray::s![frame.valid_from.., ..]),
        &columns,
    )
}

/// Model returning the same score for every window.
pub struct ConstModel {
    spec: ModelSpec,
    pub score: f64,
}

impl ConstModel {
    pub fn new(score: f64) -> Self {
        ConstModel {
            spec: ModelSpec::default(),
            score,
        }
    }
}

impl SignalModel for ConstModel {
    fn name(&self) -> &'static str {
        "const_model"
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn shape(&self) -> Option<InputShape> {
        Some(InputShape {
            seq_len: 20,
            n_features: FEATURE_COLUMNS.len(),
        })
    }

    fn build(&mut self, _shape: InputShape) -> Result<(), SigtraderError> {
        Ok(())
    }

    fn train(
        &mut self,
        x: &Array3<f64>,
        _y: &Array2<f64>,
    ) -> Result<TrainReport, SigtraderError> {
        Ok(TrainReport {
            epochs: 0,
            samples: x.shape()[0],
            final_loss: 0.0,
        })
    }

    fn predict(&self, _window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        Ok(Score::Scalar(self.score))
    }

    fn save(&self, _dir: &Path) -> Result<(), SigtraderError> {
        Ok(())
    }
}

/// Model playing back a fixed score sequence, one per `predict` call,
/// repeating the last entry once exhausted.
pub struct ScriptedModel {
    spec: ModelSpec,
    scores: Vec<f64>,
    cursor: Cell<usize>,
}

impl ScriptedModel {
    pub fn new(scores: Vec<f64>) -> Self {
        assert!(!scores.is_empty());
        ScriptedModel {
            spec: ModelSpec::default(),
            scores,
            cursor: Cell::new(0),
        }
    }
}

impl SignalModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted_model"
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn shape(&self) -> Option<InputShape> {
        Some(InputShape {
            seq_len: 20,
            n_features: FEATURE_COLUMNS.len(),
        })
    }

    fn build(&mut self, _shape: InputShape) -> Result<(), SigtraderError> {
        Ok(())
    }

    fn train(
        &mut self,
        x: &Array3<f64>,
        _y: &Array2<f64>,
    ) -> Result<TrainReport, SigtraderError> {
        Ok(TrainReport {
            epochs: 0,
            samples: x.shape()[0],
            final_loss: 0.0,
        })
    }

    fn predict(&self, _window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        let i = self.cursor.get();
        let score = self.scores[i.min(self.scores.len() - 1)];
        self.cursor.set(i + 1);
        Ok(Score::Scalar(score))
    }

    fn save(&self, _dir: &Path) -> Result<(), SigtraderError> {
        Ok(())
    }
}

/// Explain adapter that always fails, for non-fatal error-path tests.
pub struct FailingExplain;

impl ExplainPort for FailingExplain {
    fn explain(
        &self,
        _ticker: &str,
        _signal: &str,
        _price: f64,
        _date: NaiveDate,
        _features: &[(&str, f64)],
    ) -> Result<String, SigtraderError> {
        Err(SigtraderError::ExternalService {
            service: "explain".into(),
            reason: "simulated outage".into(),
        })
    }
}

//! Signal model variants and the artifact format they share.
//!
//! Every variant follows the same recipe: a deterministic encoder whose
//! weights are drawn once from a seeded rng and frozen, plus a trainable
//! logistic head mapping the pooled encoding to per-horizon scores.
//! Artifacts are a directory holding `model.json` (weights + metadata)
//! and `scaler.json` (the feature scaler fitted alongside).

pub mod itransformer;
pub mod nn;
pub mod patch_transformer;
pub mod seq_transformer;
pub mod tcn;

use crate::domain::error::SigtraderError;
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::{CompositeRule, HORIZONS, Score};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use itransformer::ITransformer;
pub use patch_transformer::PatchTransformer;
pub use seq_transformer::SeqTransformer;
pub use tcn::Tcn;

pub const MODEL_FILE: &str = "model.json";

pub const MODEL_NAMES: [&str; 4] = ["seq_transformer", "patch_transformer", "tcn", "itransformer"];

/// Window geometry fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub seq_len: usize,
    pub n_features: usize,
}

/// Hyper-parameters shared by all variants; serialized into the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub d_model: usize,
    pub seed: u64,
    /// One output per entry of [`HORIZONS`] when set, else a single score.
    pub multi_horizon: bool,
    #[serde(default)]
    pub composite: CompositeRule,
    /// Ticker embedding vocabulary; 0 disables the table. Id 0 is the
    /// unknown row.
    #[serde(default)]
    pub ticker_vocab: usize,
    #[serde(default)]
    pub sector_vocab: usize,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_lr")]
    pub lr: f64,
}

fn default_embed_dim() -> usize {
    8
}

fn default_epochs() -> usize {
    300
}

fn default_lr() -> f64 {
    0.1
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec {
            d_model: 32,
            seed: 42,
            multi_horizon: true,
            composite: CompositeRule::default(),
            ticker_vocab: 0,
            sector_vocab: 0,
            embed_dim: default_embed_dim(),
            epochs: default_epochs(),
            lr: default_lr(),
        }
    }
}

impl ModelSpec {
    pub fn n_out(&self) -> usize {
        if self.multi_horizon { HORIZONS.len() } else { 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    pub samples: usize,
    pub final_loss: f64,
}

/// A sequence model scoring one scaled feature window at a time.
pub trait SignalModel {
    fn name(&self) -> &'static str;

    fn spec(&self) -> &ModelSpec;

    fn is_ready(&self) -> bool;

    fn shape(&self) -> Option<InputShape>;

    /// Initialize encoder weights for the given window geometry.
    /// Deterministic: the same spec and shape produce the same weights.
    fn build(&mut self, shape: InputShape) -> Result<(), SigtraderError>;

    /// Fit the logistic head on `x` (`n x seq_len x n_features`, already
    /// scaled) against labels `y` (`n x n_out`, entries in {0,1}).
    fn train(&mut self, x: &Array3<f64>, y: &Array2<f64>)
    -> Result<TrainReport, SigtraderError>;

    /// Score one scaled window of shape `seq_len x n_features`.
    fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError>;

    /// Variant hook for models carrying ticker/sector embedding tables;
    /// id 0 (or an out-of-vocabulary id) means unknown.
    fn predict_with_ids(
        &self,
        window: ArrayView2<f64>,
        _ticker_id: usize,
        _sector_id: usize,
    ) -> Result<Score, SigtraderError> {
        self.predict(window)
    }

    /// Write `model.json` into `dir`.
    fn save(&self, dir: &Path) -> Result<(), SigtraderError>;
}

/// Construct an untrained model by registry name.
pub fn model_from_name(
    name: &str,
    spec: ModelSpec,
) -> Result<Box<dyn SignalModel>, SigtraderError> {
    match name {
        "seq_transformer" => Ok(Box::new(SeqTransformer::new(spec))),
        "patch_transformer" => Ok(Box::new(PatchTransformer::new(spec))),
        "tcn" => Ok(Box::new(Tcn::new(spec))),
        "itransformer" => Ok(Box::new(ITransformer::new(spec))),
        other => Err(SigtraderError::UnknownModel { name: other.into() }),
    }
}

/// Load a model from `dir/model.json`, dispatching on its `name` field.
pub fn load_model(dir: &Path) -> Result<Box<dyn SignalModel>, SigtraderError> {
    let path = dir.join(MODEL_FILE);
    let text = std::fs::read_to_string(&path).map_err(|e| SigtraderError::Artifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: "missing name field".into(),
        })?
        .to_string();

    let artifact = |reason: String| SigtraderError::Artifact {
        path: path.display().to_string(),
        reason,
    };
    match name.as_str() {
        "seq_transformer" => Ok(Box::new(
            SeqTransformer::from_json(value).map_err(artifact)?,
        )),
        "patch_transformer" => Ok(Box::new(
            PatchTransformer::from_json(value).map_err(artifact)?,
        )),
        "tcn" => Ok(Box::new(Tcn::from_json(value).map_err(artifact)?)),
        "itransformer" => Ok(Box::new(
            ITransformer::from_json(value).map_err(artifact)?,
        )),
        other => Err(SigtraderError::UnknownModel { name: other.into() }),
    }
}

/// Load model and scaler together; fails when either file is missing.
pub fn load_artifact(
    dir: &Path,
) -> Result<(Box<dyn SignalModel>, MinMaxScaler), SigtraderError> {
    let model = load_model(dir)?;
    let scaler = MinMaxScaler::load(dir)?;
    Ok((model, scaler))
}

pub fn save_artifact(
    model: &dyn SignalModel,
    scaler: &MinMaxScaler,
    dir: &Path,
) -> Result<(), SigtraderError> {
    std::fs::create_dir_all(dir)?;
    model.save(dir)?;
    scaler.save(dir)
}

pub(crate) fn write_model_json<T: Serialize>(
    model: &T,
    dir: &Path,
) -> Result<(), SigtraderError> {
    let path = dir.join(MODEL_FILE);
    let text = serde_json::to_string_pretty(model).map_err(|e| SigtraderError::Artifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(&path, text)?;
    Ok(())
}

pub(crate) fn check_window(
    name: &str,
    shape: Option<InputShape>,
    window: ArrayView2<f64>,
) -> Result<InputShape, SigtraderError> {
    let shape = shape.ok_or_else(|| SigtraderError::ModelNotReady { name: name.into() })?;
    if window.nrows() != shape.seq_len || window.ncols() != shape.n_features {
        return Err(SigtraderError::InvalidInput {
            reason: format!(
                "window is {}x{}, model expects {}x{}",
                window.nrows(),
                window.ncols(),
                shape.seq_len,
                shape.n_features
            ),
        });
    }
    Ok(shape)
}

pub(crate) fn check_labels(
    n_samples: usize,
    n_out: usize,
    y: &Array2<f64>,
) -> Result<(), SigtraderError> {
    if y.nrows() != n_samples || y.ncols() != n_out {
        return Err(SigtraderError::InvalidInput {
            reason: format!(
                "labels are {}x{}, expected {}x{}",
                y.nrows(),
                y.ncols(),
                n_samples,
                n_out
            ),
        });
    }
    Ok(())
}

/// Encode every window of a batch, fit the head, report the loss.
pub(crate) fn fit_head_on_batch<F>(
    head: &mut nn::LogisticHead,
    x: &Array3<f64>,
    y: &Array2<f64>,
    epochs: usize,
    lr: f64,
    encode: F,
) -> TrainReport
where
    F: Fn(ArrayView2<f64>) -> Array1<f64>,
{
    let n = x.shape()[0];
    let d = head.w.nrows();
    let mut z = Array2::zeros((n, d));
    for (i, window) in x.axis_iter(Axis(0)).enumerate() {
        z.row_mut(i).assign(&encode(window));
    }
    let final_loss = head.fit(z.view(), y.view(), epochs, lr);
    TrainReport {
        epochs,
        samples: n,
        final_loss,
    }
}

pub(crate) fn score_from_outputs(out: &Array1<f64>, multi_horizon: bool) -> Score {
    if multi_horizon {
        let mut h = [0.0; 4];
        for (slot, v) in h.iter_mut().zip(out.iter()) {
            *slot = *v;
        }
        Score::Horizons(h)
    } else {
        Score::Scalar(out[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::FEATURE_COLUMNS;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn shape() -> InputShape {
        InputShape {
            seq_len: 8,
            n_features: 4,
        }
    }

    fn spec() -> ModelSpec {
        ModelSpec {
            d_model: 8,
            ..ModelSpec::default()
        }
    }

    fn window(shape: InputShape, fill: f64) -> Array2<f64> {
        Array2::from_elem((shape.seq_len, shape.n_features), fill)
    }

    #[test]
    fn registry_knows_all_variants() {
        for name in MODEL_NAMES {
            let model = model_from_name(name, spec()).unwrap();
            assert_eq!(model.name(), name);
            assert!(!model.is_ready());
        }
        assert!(matches!(
            model_from_name("lstm", spec()),
            Err(SigtraderError::UnknownModel { .. })
        ));
    }

    #[test]
    fn predict_before_build_fails() {
        for name in MODEL_NAMES {
            let model = model_from_name(name, spec()).unwrap();
            let result = model.predict(window(shape(), 0.5).view());
            assert!(
                matches!(result, Err(SigtraderError::ModelNotReady { .. })),
                "{name} should refuse to predict unbuilt"
            );
        }
    }

    #[test]
    fn build_is_deterministic_per_seed() {
        for name in MODEL_NAMES {
            let mut a = model_from_name(name, spec()).unwrap();
            let mut b = model_from_name(name, spec()).unwrap();
            a.build(shape()).unwrap();
            b.build(shape()).unwrap();
            let w = window(shape(), 0.3);
            let sa = a.spec().composite.reduce(&a.predict(w.view()).unwrap());
            let sb = b.spec().composite.reduce(&b.predict(w.view()).unwrap());
            assert!((sa - sb).abs() < 1e-12, "{name} not deterministic");
        }
    }

    #[test]
    fn wrong_window_shape_is_rejected() {
        let mut model = model_from_name("tcn", spec()).unwrap();
        model.build(shape()).unwrap();
        let bad = Array2::zeros((3, 4));
        assert!(matches!(
            model.predict(bad.view()),
            Err(SigtraderError::InvalidInput { .. })
        ));
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        for name in MODEL_NAMES {
            let mut model = model_from_name(name, spec()).unwrap();
            model.build(shape()).unwrap();
            for fill in [-5.0, 0.0, 0.5, 5.0] {
                match model.predict(window(shape(), fill).view()).unwrap() {
                    Score::Horizons(h) => {
                        assert!(h.iter().all(|v| (0.0..=1.0).contains(v)), "{name}")
                    }
                    Score::Scalar(v) => assert!((0.0..=1.0).contains(&v), "{name}"),
                }
            }
        }
    }

    #[test]
    fn save_load_round_trip_preserves_predictions() {
        for name in MODEL_NAMES {
            let dir = TempDir::new().unwrap();
            let mut model = model_from_name(name, spec()).unwrap();
            model.build(shape()).unwrap();
            model.save(dir.path()).unwrap();

            let loaded = load_model(dir.path()).unwrap();
            assert_eq!(loaded.name(), name);
            assert!(loaded.is_ready());

            let w = window(shape(), 0.7);
            let before = model.predict(w.view()).unwrap();
            let after = loaded.predict(w.view()).unwrap();
            assert_eq!(before, after, "{name} changed through persistence");
        }
    }

    #[test]
    fn load_artifact_requires_both_files() {
        let dir = TempDir::new().unwrap();
        let mut model = model_from_name("itransformer", spec()).unwrap();
        model.build(shape()).unwrap();
        model.save(dir.path()).unwrap();
        // Scaler missing.
        assert!(load_artifact(dir.path()).is_err());

        let cols: Vec<&str> = FEATURE_COLUMNS[..4].to_vec();
        let data = Array2::from_shape_fn((10, 4), |(i, j)| i as f64 + j as f64);
        let scaler = MinMaxScaler::fit(data.view(), &cols);
        scaler.save(dir.path()).unwrap();
        assert!(load_artifact(dir.path()).is_ok());
    }

    #[test]
    fn load_from_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_model(dir.path()),
            Err(SigtraderError::Artifact { .. })
        ));
    }

    #[test]
    fn training_moves_scores_toward_labels() {
        let shape = InputShape {
            seq_len: 6,
            n_features: 3,
        };
        let mut model = model_from_name("seq_transformer", spec()).unwrap();
        model.build(shape).unwrap();

        // Rising windows labelled 1, falling labelled 0.
        let n = 40;
        let mut x = ndarray::Array3::zeros((n, shape.seq_len, shape.n_features));
        let mut y = Array2::zeros((n, 4));
        for i in 0..n {
            let up = i % 2 == 0;
            for t in 0..shape.seq_len {
                let v = if up {
                    t as f64 / shape.seq_len as f64
                } else {
                    1.0 - t as f64 / shape.seq_len as f64
                };
                for f in 0..shape.n_features {
                    x[[i, t, f]] = v;
                }
            }
            if up {
                y.row_mut(i).fill(1.0);
            }
        }
        let report = model.train(&x, &y).unwrap();
        assert_eq!(report.samples, n);
        assert!(report.final_loss.is_finite());

        let up_score = model
            .spec()
            .composite
            .reduce(&model.predict(x.index_axis(Axis(0), 0)).unwrap());
        let down_score = model
            .spec()
            .composite
            .reduce(&model.predict(x.index_axis(Axis(0), 1)).unwrap());
        assert!(
            up_score > down_score,
            "up {up_score} should beat down {down_score}"
        );
    }
}

//! Patch transformer: the window is cut into non-overlapping patches of
//! consecutive rows, each patch flattened and projected to a token, then
//! one attention block runs over the patch tokens.
//!
//! Patch length is `seq_len / 4` rounded down (minimum 1); when the
//! window does not divide evenly the oldest rows are dropped so the
//! most recent bars are always covered.

use super::nn::{
    self, HeadData, LogisticHead, MatrixData, layer_norm_rows, mean_pool_rows,
    positional_encoding, self_attention,
};
use super::{
    InputShape, ModelSpec, SignalModel, TrainReport, check_labels, check_window,
    fit_head_on_batch, score_from_outputs, write_model_json,
};
use crate::domain::error::SigtraderError;
use crate::domain::score::Score;
use ndarray::{Array1, Array2, Array3, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::path::Path;

const NAME: &str = "patch_transformer";

pub(crate) fn patch_len(seq_len: usize) -> usize {
    (seq_len / 4).max(1)
}

#[derive(Debug, Clone)]
struct Weights {
    w_patch: Array2<f64>,
    wq: Array2<f64>,
    wk: Array2<f64>,
    wv: Array2<f64>,
    pos: Array2<f64>,
    head: LogisticHead,
}

#[derive(Debug, Clone)]
pub struct PatchTransformer {
    spec: ModelSpec,
    shape: Option<InputShape>,
    weights: Option<Weights>,
}

#[derive(Serialize, Deserialize)]
struct WeightsData {
    w_patch: MatrixData,
    wq: MatrixData,
    wk: MatrixData,
    wv: MatrixData,
    head: HeadData,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    name: String,
    spec: ModelSpec,
    shape: InputShape,
    weights: WeightsData,
}

fn encode(
    w_patch: &Array2<f64>,
    wq: &Array2<f64>,
    wk: &Array2<f64>,
    wv: &Array2<f64>,
    pos: &Array2<f64>,
    shape: InputShape,
    window: ArrayView2<f64>,
) -> Array1<f64> {
    let plen = patch_len(shape.seq_len);
    let n_patches = shape.seq_len / plen;
    let start = shape.seq_len - n_patches * plen;

    let mut tokens = Array2::zeros((n_patches, plen * shape.n_features));
    for p in 0..n_patches {
        let rows = window.slice(s![start + p * plen..start + (p + 1) * plen, ..]);
        for (j, v) in rows.iter().enumerate() {
            tokens[[p, j]] = *v;
        }
    }

    let mut z = tokens.dot(w_patch) + pos;
    layer_norm_rows(&mut z);
    let mut z = &z + &self_attention(&z, wq, wk, wv);
    layer_norm_rows(&mut z);
    mean_pool_rows(&z)
}

impl PatchTransformer {
    pub fn new(spec: ModelSpec) -> Self {
        PatchTransformer {
            spec,
            shape: None,
            weights: None,
        }
    }

    pub(crate) fn from_json(value: serde_json::Value) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        let n_patches = file.shape.seq_len / patch_len(file.shape.seq_len);
        let w = &file.weights;
        let weights = Weights {
            w_patch: w.w_patch.to_array()?,
            wq: w.wq.to_array()?,
            wk: w.wk.to_array()?,
            wv: w.wv.to_array()?,
            pos: positional_encoding(n_patches, file.spec.d_model),
            head: LogisticHead::from_data(&w.head)?,
        };
        Ok(PatchTransformer {
            spec: file.spec,
            shape: Some(file.shape),
            weights: Some(weights),
        })
    }
}

impl SignalModel for PatchTransformer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn is_ready(&self) -> bool {
        self.weights.is_some()
    }

    fn shape(&self) -> Option<InputShape> {
        self.shape
    }

    fn build(&mut self, shape: InputShape) -> Result<(), SigtraderError> {
        let d = self.spec.d_model;
        let plen = patch_len(shape.seq_len);
        let n_patches = shape.seq_len / plen;
        let mut rng = nn::seeded_rng(self.spec.seed);
        self.weights = Some(Weights {
            w_patch: nn::glorot(&mut rng, plen * shape.n_features, d),
            wq: nn::glorot(&mut rng, d, d),
            wk: nn::glorot(&mut rng, d, d),
            wv: nn::glorot(&mut rng, d, d),
            pos: positional_encoding(n_patches, d),
            head: LogisticHead::init(&mut rng, d, self.spec.n_out()),
        });
        self.shape = Some(shape);
        Ok(())
    }

    fn train(
        &mut self,
        x: &Array3<f64>,
        y: &Array2<f64>,
    ) -> Result<TrainReport, SigtraderError> {
        check_labels(x.shape()[0], self.spec.n_out(), y)?;
        let epochs = self.spec.epochs;
        let lr = self.spec.lr;
        let shape = self
            .shape
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let w = self
            .weights
            .as_mut()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let Weights {
            w_patch,
            wq,
            wk,
            wv,
            pos,
            head,
        } = w;
        Ok(fit_head_on_batch(head, x, y, epochs, lr, |window| {
            encode(w_patch, wq, wk, wv, pos, shape, window)
        }))
    }

    fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        let shape = check_window(NAME, self.shape, window)?;
        let w = self
            .weights
            .as_ref()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let z = encode(&w.w_patch, &w.wq, &w.wk, &w.wv, &w.pos, shape, window);
        let out = w.head.forward(z.view());
        Ok(score_from_outputs(&out, self.spec.multi_horizon))
    }

    fn save(&self, dir: &Path) -> Result<(), SigtraderError> {
        let (shape, w) = match (self.shape, self.weights.as_ref()) {
            (Some(shape), Some(w)) => (shape, w),
            _ => return Err(SigtraderError::ModelNotReady { name: NAME.into() }),
        };
        let file = ModelFile {
            name: NAME.into(),
            spec: self.spec.clone(),
            shape,
            weights: WeightsData {
                w_patch: MatrixData::from(&w.w_patch),
                wq: MatrixData::from(&w.wq),
                wk: MatrixData::from(&w.wk),
                wv: MatrixData::from(&w.wv),
                head: w.head.to_data(),
            },
        };
        write_model_json(&file, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_length_rule() {
        assert_eq!(patch_len(20), 5);
        assert_eq!(patch_len(7), 1);
        assert_eq!(patch_len(3), 1);
        assert_eq!(patch_len(60), 15);
    }

    #[test]
    fn uneven_window_drops_oldest_rows() {
        // seq_len 10 -> patch_len 2, 5 patches, no remainder; seq_len 11
        // keeps 10 trailing rows. Perturbing the dropped oldest row must
        // not change the score.
        let mut model = PatchTransformer::new(ModelSpec {
            d_model: 8,
            ..ModelSpec::default()
        });
        let shape = InputShape {
            seq_len: 11,
            n_features: 2,
        };
        model.build(shape).unwrap();

        let mut a = Array2::from_elem((11, 2), 0.5);
        let mut b = a.clone();
        a[[0, 0]] = -9.0;
        b[[0, 0]] = 9.0;
        assert_eq!(
            model.predict(a.view()).unwrap(),
            model.predict(b.view()).unwrap()
        );
    }

    #[test]
    fn recent_rows_do_affect_the_score() {
        let mut model = PatchTransformer::new(ModelSpec {
            d_model: 8,
            ..ModelSpec::default()
        });
        let shape = InputShape {
            seq_len: 8,
            n_features: 2,
        };
        model.build(shape).unwrap();

        let a = Array2::from_elem((8, 2), 0.5);
        let mut b = a.clone();
        b[[7, 1]] = 0.9;
        assert_ne!(
            model.predict(a.view()).unwrap(),
            model.predict(b.view()).unwrap()
        );
    }
}

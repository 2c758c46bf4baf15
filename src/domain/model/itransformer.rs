//! Inverted transformer: each feature channel's full history becomes
//! one token, and attention runs across the feature channels instead of
//! across time. No positional encoding; channel identity comes from the
//! per-channel projection input.

use super::nn::{
    self, HeadData, LogisticHead, MatrixData, layer_norm_rows, mean_pool_rows, self_attention,
};
use super::{
    InputShape, ModelSpec, SignalModel, TrainReport, check_labels, check_window,
    fit_head_on_batch, score_from_outputs, write_model_json,
};
use crate::domain::error::SigtraderError;
use crate::domain::score::Score;
use ndarray::{Array1, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

const NAME: &str = "itransformer";

#[derive(Debug, Clone)]
struct Weights {
    /// `seq_len x d_model`: projects one channel's history to a token.
    w_in: Array2<f64>,
    wq: Array2<f64>,
    wk: Array2<f64>,
    wv: Array2<f64>,
    head: LogisticHead,
}

#[derive(Debug, Clone)]
pub struct ITransformer {
    spec: ModelSpec,
    shape: Option<InputShape>,
    weights: Option<Weights>,
}

#[derive(Serialize, Deserialize)]
struct WeightsData {
    w_in: MatrixData,
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
    w_in: &Array2<f64>,
    wq: &Array2<f64>,
    wk: &Array2<f64>,
    wv: &Array2<f64>,
    window: ArrayView2<f64>,
) -> Array1<f64> {
    // n_features x seq_len, then project each channel to a token.
    let channels = window.t().to_owned();
    let mut z = channels.dot(w_in);
    layer_norm_rows(&mut z);
    let mut z = &z + &self_attention(&z, wq, wk, wv);
    layer_norm_rows(&mut z);
    mean_pool_rows(&z)
}

impl ITransformer {
    pub fn new(spec: ModelSpec) -> Self {
        ITransformer {
            spec,
            shape: None,
            weights: None,
        }
    }

    pub(crate) fn from_json(value: serde_json::Value) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        let w = &file.weights;
        Ok(ITransformer {
            spec: file.spec,
            shape: Some(file.shape),
            weights: Some(Weights {
                w_in: w.w_in.to_array()?,
                wq: w.wq.to_array()?,
                wk: w.wk.to_array()?,
                wv: w.wv.to_array()?,
                head: LogisticHead::from_data(&w.head)?,
            }),
        })
    }
}

impl SignalModel for ITransformer {
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
        let mut rng = nn::seeded_rng(self.spec.seed);
        self.weights = Some(Weights {
            w_in: nn::glorot(&mut rng, shape.seq_len, d),
            wq: nn::glorot(&mut rng, d, d),
            wk: nn::glorot(&mut rng, d, d),
            wv: nn::glorot(&mut rng, d, d),
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
        let w = self
            .weights
            .as_mut()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let Weights {
            w_in,
            wq,
            wk,
            wv,
            head,
        } = w;
        Ok(fit_head_on_batch(head, x, y, epochs, lr, |window| {
            encode(w_in, wq, wk, wv, window)
        }))
    }

    fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        check_window(NAME, self.shape, window)?;
        let w = self
            .weights
            .as_ref()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let z = encode(&w.w_in, &w.wq, &w.wk, &w.wv, window);
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
                w_in: MatrixData::from(&w.w_in),
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
    fn channel_order_matters() {
        // Swapping two feature channels must change the encoding: each
        // channel row meets a different slice of the attention weights.
        let mut model = ITransformer::new(ModelSpec {
            d_model: 8,
            ..ModelSpec::default()
        });
        let shape = InputShape {
            seq_len: 6,
            n_features: 3,
        };
        model.build(shape).unwrap();

        let mut a = Array2::zeros((6, 3));
        for t in 0..6 {
            a[[t, 0]] = t as f64 / 6.0;
            a[[t, 1]] = 1.0 - t as f64 / 6.0;
            a[[t, 2]] = 0.5;
        }
        let mut b = a.clone();
        for t in 0..6 {
            b.swap([t, 0], [t, 1]);
        }
        assert_ne!(model.predict(a.view()).unwrap(), model.predict(b.view()).unwrap());
    }

    #[test]
    fn every_timestep_reaches_the_score() {
        let mut model = ITransformer::new(ModelSpec {
            d_model: 8,
            ..ModelSpec::default()
        });
        let shape = InputShape {
            seq_len: 6,
            n_features: 3,
        };
        model.build(shape).unwrap();

        let a = Array2::from_elem((6, 3), 0.5);
        for t in 0..6 {
            let mut b = a.clone();
            b[[t, 0]] = 0.9;
            assert_ne!(
                model.predict(a.view()).unwrap(),
                model.predict(b.view()).unwrap(),
                "timestep {t} had no effect"
            );
        }
    }
}

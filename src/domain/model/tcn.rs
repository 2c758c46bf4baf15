//! Temporal convolutional network: a stack of causal dilated
//! convolutions (kernel 3, dilations 1/2/4) with relu, read out at the
//! last timestep. Positions before the window start are zero-padded, so
//! output at time t only sees rows <= t.

use super::nn::{self, HeadData, LogisticHead, MatrixData, relu};
use super::{
    InputShape, ModelSpec, SignalModel, TrainReport, check_labels, check_window,
    fit_head_on_batch, score_from_outputs, write_model_json,
};
use crate::domain::error::SigtraderError;
use crate::domain::score::Score;
use ndarray::{Array1, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

const NAME: &str = "tcn";
const KERNEL: usize = 3;
const DILATIONS: [usize; 3] = [1, 2, 4];

#[derive(Debug, Clone)]
struct Weights {
    /// One `(KERNEL * c_in) x c_out` matrix per dilation level; tap
    /// order within a matrix is current row first, then older taps.
    layers: Vec<Array2<f64>>,
    head: LogisticHead,
}

#[derive(Debug, Clone)]
pub struct Tcn {
    spec: ModelSpec,
    shape: Option<InputShape>,
    weights: Option<Weights>,
}

#[derive(Serialize, Deserialize)]
struct WeightsData {
    layers: Vec<MatrixData>,
    head: HeadData,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    name: String,
    spec: ModelSpec,
    shape: InputShape,
    weights: WeightsData,
}

/// One causal dilated conv layer over `x` (`seq x c_in`).
fn conv_layer(x: &Array2<f64>, w: &Array2<f64>, dilation: usize) -> Array2<f64> {
    let seq = x.nrows();
    let c_in = x.ncols();
    let c_out = w.ncols();
    let mut tap = Array1::zeros(KERNEL * c_in);
    let mut out = Array2::zeros((seq, c_out));
    for t in 0..seq {
        tap.fill(0.0);
        for k in 0..KERNEL {
            let offset = k * dilation;
            if offset > t {
                continue;
            }
            let src = x.row(t - offset);
            for c in 0..c_in {
                tap[k * c_in + c] = src[c];
            }
        }
        let row = tap.dot(w).mapv(relu);
        out.row_mut(t).assign(&row);
    }
    out
}

fn encode(layers: &[Array2<f64>], window: ArrayView2<f64>) -> Array1<f64> {
    let mut x = window.to_owned();
    for (w, dilation) in layers.iter().zip(DILATIONS) {
        x = conv_layer(&x, w, dilation);
    }
    x.row(x.nrows() - 1).to_owned()
}

impl Tcn {
    pub fn new(spec: ModelSpec) -> Self {
        Tcn {
            spec,
            shape: None,
            weights: None,
        }
    }

    pub(crate) fn from_json(value: serde_json::Value) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        let layers = file
            .weights
            .layers
            .iter()
            .map(|m| m.to_array())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tcn {
            spec: file.spec,
            shape: Some(file.shape),
            weights: Some(Weights {
                layers,
                head: LogisticHead::from_data(&file.weights.head)?,
            }),
        })
    }
}

impl SignalModel for Tcn {
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
        let mut layers = Vec::with_capacity(DILATIONS.len());
        let mut c_in = shape.n_features;
        for _ in DILATIONS {
            layers.push(nn::glorot(&mut rng, KERNEL * c_in, d));
            c_in = d;
        }
        self.weights = Some(Weights {
            layers,
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
        let Weights { layers, head } = w;
        Ok(fit_head_on_batch(head, x, y, epochs, lr, |window| {
            encode(layers, window)
        }))
    }

    fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        check_window(NAME, self.shape, window)?;
        let w = self
            .weights
            .as_ref()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let z = encode(&w.layers, window);
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
                layers: w.layers.iter().map(MatrixData::from).collect(),
                head: w.head.to_data(),
            },
        };
        write_model_json(&file, dir)
    }
}

//! Time-step transformer: one self-attention block over the window's
//! rows with sinusoidal positions, mean-pooled into the logistic head.
//! Optionally concatenates ticker/sector embeddings to the pooled
//! vector before the head.

use super::nn::{
    self, HeadData, LogisticHead, MatrixData, layer_norm_rows, mean_pool_rows,
    positional_encoding, relu, self_attention,
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

const NAME: &str = "seq_transformer";

#[derive(Debug, Clone)]
struct Weights {
    w_in: Array2<f64>,
    wq: Array2<f64>,
    wk: Array2<f64>,
    wv: Array2<f64>,
    w_ff: Array2<f64>,
    /// Recomputed from the shape, never persisted.
    pos: Array2<f64>,
    ticker_embed: Option<Array2<f64>>,
    sector_embed: Option<Array2<f64>>,
    head: LogisticHead,
}

#[derive(Debug, Clone)]
pub struct SeqTransformer {
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
    w_ff: MatrixData,
    ticker_embed: Option<MatrixData>,
    sector_embed: Option<MatrixData>,
    head: HeadData,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    name: String,
    spec: ModelSpec,
    shape: InputShape,
    weights: WeightsData,
}

fn embed_row(table: &Array2<f64>, id: usize) -> Array1<f64> {
    let row = if id < table.nrows() { id } else { 0 };
    table.row(row).to_owned()
}

#[allow(clippy::too_many_arguments)]
fn encode(
    w_in: &Array2<f64>,
    wq: &Array2<f64>,
    wk: &Array2<f64>,
    wv: &Array2<f64>,
    w_ff: &Array2<f64>,
    pos: &Array2<f64>,
    ticker_embed: Option<&Array2<f64>>,
    sector_embed: Option<&Array2<f64>>,
    window: ArrayView2<f64>,
    ticker_id: usize,
    sector_id: usize,
) -> Array1<f64> {
    let mut z = window.dot(w_in) + pos;
    layer_norm_rows(&mut z);
    let mut z = &z + &self_attention(&z, wq, wk, wv);
    layer_norm_rows(&mut z);
    let ff = z.dot(w_ff).mapv(relu);
    let z = &z + &ff;

    let mut pooled = mean_pool_rows(&z).to_vec();
    if let Some(table) = ticker_embed {
        pooled.extend(embed_row(table, ticker_id).iter());
    }
    if let Some(table) = sector_embed {
        pooled.extend(embed_row(table, sector_id).iter());
    }
    Array1::from_vec(pooled)
}

impl SeqTransformer {
    pub fn new(spec: ModelSpec) -> Self {
        SeqTransformer {
            spec,
            shape: None,
            weights: None,
        }
    }

    pub(crate) fn from_json(value: serde_json::Value) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        let w = &file.weights;
        let weights = Weights {
            w_in: w.w_in.to_array()?,
            wq: w.wq.to_array()?,
            wk: w.wk.to_array()?,
            wv: w.wv.to_array()?,
            w_ff: w.w_ff.to_array()?,
            pos: positional_encoding(file.shape.seq_len, file.spec.d_model),
            ticker_embed: w.ticker_embed.as_ref().map(|m| m.to_array()).transpose()?,
            sector_embed: w.sector_embed.as_ref().map(|m| m.to_array()).transpose()?,
            head: LogisticHead::from_data(&w.head)?,
        };
        Ok(SeqTransformer {
            spec: file.spec,
            shape: Some(file.shape),
            weights: Some(weights),
        })
    }

    fn predict_inner(
        &self,
        window: ArrayView2<f64>,
        ticker_id: usize,
        sector_id: usize,
    ) -> Result<Score, SigtraderError> {
        check_window(NAME, self.shape, window)?;
        let w = self
            .weights
            .as_ref()
            .ok_or_else(|| SigtraderError::ModelNotReady { name: NAME.into() })?;
        let z = encode(
            &w.w_in,
            &w.wq,
            &w.wk,
            &w.wv,
            &w.w_ff,
            &w.pos,
            w.ticker_embed.as_ref(),
            w.sector_embed.as_ref(),
            window,
            ticker_id,
            sector_id,
        );
        let out = w.head.forward(z.view());
        Ok(score_from_outputs(&out, self.spec.multi_horizon))
    }
}

impl SignalModel for SeqTransformer {
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
        let w_in = nn::glorot(&mut rng, shape.n_features, d);
        let wq = nn::glorot(&mut rng, d, d);
        let wk = nn::glorot(&mut rng, d, d);
        let wv = nn::glorot(&mut rng, d, d);
        let w_ff = nn::glorot(&mut rng, d, d);
        let ticker_embed = (self.spec.ticker_vocab > 0)
            .then(|| nn::glorot(&mut rng, self.spec.ticker_vocab, self.spec.embed_dim));
        let sector_embed = (self.spec.sector_vocab > 0)
            .then(|| nn::glorot(&mut rng, self.spec.sector_vocab, self.spec.embed_dim));

        let head_in = d
            + ticker_embed.as_ref().map_or(0, |_| self.spec.embed_dim)
            + sector_embed.as_ref().map_or(0, |_| self.spec.embed_dim);
        let head = LogisticHead::init(&mut rng, head_in, self.spec.n_out());

        self.weights = Some(Weights {
            w_in,
            wq,
            wk,
            wv,
            w_ff,
            pos: positional_encoding(shape.seq_len, d),
            ticker_embed,
            sector_embed,
            head,
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
            w_ff,
            pos,
            ticker_embed,
            sector_embed,
            head,
        } = w;
        Ok(fit_head_on_batch(head, x, y, epochs, lr, |window| {
            encode(
                w_in,
                wq,
                wk,
                wv,
                w_ff,
                pos,
                ticker_embed.as_ref(),
                sector_embed.as_ref(),
                window,
                0,
                0,
            )
        }))
    }

    fn predict(&self, window: ArrayView2<f64>) -> Result<Score, SigtraderError> {
        self.predict_inner(window, 0, 0)
    }

    fn predict_with_ids(
        &self,
        window: ArrayView2<f64>,
        ticker_id: usize,
        sector_id: usize,
    ) -> Result<Score, SigtraderError> {
        self.predict_inner(window, ticker_id, sector_id)
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
                w_ff: MatrixData::from(&w.w_ff),
                ticker_embed: w.ticker_embed.as_ref().map(MatrixData::from),
                sector_embed: w.sector_embed.as_ref().map(MatrixData::from),
                head: w.head.to_data(),
            },
        };
        write_model_json(&file, dir)
    }
}

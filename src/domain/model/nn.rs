//! Shared building blocks for the signal models: seeded weight
//! initialization, attention, normalization, and the trainable
//! logistic read-out head.
//!
//! Encoders built from these pieces are frozen after construction;
//! only [`LogisticHead`] has trainable parameters.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Glorot-uniform matrix, deterministic for a given rng state.
pub fn glorot(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Row-wise softmax in place.
pub fn softmax_rows(m: &mut Array2<f64>) {
    for mut row in m.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}

/// Row-wise layer normalization (zero mean, unit variance per row).
pub fn layer_norm_rows(m: &mut Array2<f64>) {
    let eps = 1e-6;
    for mut row in m.rows_mut() {
        let n = row.len() as f64;
        let mean = row.sum() / n;
        let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let denom = (var + eps).sqrt();
        row.mapv_inplace(|v| (v - mean) / denom);
    }
}

/// Single-head scaled dot-product self-attention over the rows of `x`.
pub fn self_attention(
    x: &Array2<f64>,
    wq: &Array2<f64>,
    wk: &Array2<f64>,
    wv: &Array2<f64>,
) -> Array2<f64> {
    let q = x.dot(wq);
    let k = x.dot(wk);
    let v = x.dot(wv);
    let scale = (wq.ncols() as f64).sqrt();
    let mut scores = q.dot(&k.t()) / scale;
    softmax_rows(&mut scores);
    scores.dot(&v)
}

/// Sinusoidal positional encoding, `seq_len x d_model`.
pub fn positional_encoding(seq_len: usize, d_model: usize) -> Array2<f64> {
    Array2::from_shape_fn((seq_len, d_model), |(pos, i)| {
        let angle = pos as f64 / 10_000f64.powf((2 * (i / 2)) as f64 / d_model as f64);
        if i % 2 == 0 { angle.sin() } else { angle.cos() }
    })
}

pub fn mean_pool_rows(m: &Array2<f64>) -> Array1<f64> {
    let n = m.nrows().max(1) as f64;
    m.sum_axis(Axis(0)) / n
}

/// Serializable dense matrix; row-major `data` of length `rows * cols`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl From<&Array2<f64>> for MatrixData {
    fn from(m: &Array2<f64>) -> Self {
        MatrixData {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.iter().copied().collect(),
        }
    }
}

impl MatrixData {
    pub fn to_array(&self) -> Result<Array2<f64>, String> {
        Array2::from_shape_vec((self.rows, self.cols), self.data.clone())
            .map_err(|e| e.to_string())
    }
}

/// Logistic regression head over pooled encoder features. The only
/// trainable part of every model variant.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticHead {
    /// `d_in x n_out`
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

/// Serialized form of [`LogisticHead`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadData {
    pub w: MatrixData,
    pub b: Vec<f64>,
}

impl LogisticHead {
    pub fn init(rng: &mut StdRng, d_in: usize, n_out: usize) -> Self {
        LogisticHead {
            w: glorot(rng, d_in, n_out) * 0.1,
            b: Array1::zeros(n_out),
        }
    }

    pub fn n_out(&self) -> usize {
        self.b.len()
    }

    /// Sigmoid outputs for one pooled feature vector.
    pub fn forward(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let mut out = z.dot(&self.w) + &self.b;
        out.mapv_inplace(sigmoid);
        out
    }

    /// Full-batch gradient descent on binary cross-entropy. `z` is
    /// `n x d_in`, `y` is `n x n_out` with entries in {0,1}. Returns
    /// the final epoch's mean loss.
    pub fn fit(&mut self, z: ArrayView2<f64>, y: ArrayView2<f64>, epochs: usize, lr: f64) -> f64 {
        let n = z.nrows() as f64;
        let mut loss = f64::NAN;
        for _ in 0..epochs {
            let mut p = z.dot(&self.w) + &self.b;
            p.mapv_inplace(sigmoid);

            let eps = 1e-12;
            loss = ndarray::Zip::from(&p)
                .and(y)
                .fold(0.0, |acc, &pi, &yi| {
                    acc - yi * (pi + eps).ln() - (1.0 - yi) * (1.0 - pi + eps).ln()
                })
                / (n * self.n_out() as f64);

            let diff = &p - &y;
            let grad_w = z.t().dot(&diff) / n;
            let grad_b = diff.sum_axis(Axis(0)) / n;
            self.w = &self.w - &(grad_w * lr);
            self.b = &self.b - &(grad_b * lr);
        }
        loss
    }

    pub fn to_data(&self) -> HeadData {
        HeadData {
            w: MatrixData::from(&self.w),
            b: self.b.to_vec(),
        }
    }

    pub fn from_data(data: &HeadData) -> Result<Self, String> {
        Ok(LogisticHead {
            w: data.w.to_array()?,
            b: Array1::from_vec(data.b.clone()),
        })
    }
}

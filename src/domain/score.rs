//! Model scores and the composite reducer consumed by the order policy.

use serde::{Deserialize, Serialize};

/// Forward-return horizons (trading days) for multi-horizon models.
pub const HORIZONS: [usize; 4] = [1, 3, 5, 7];

/// Output of a signal model for one (ticker, asof-date) sample.
/// Values are ordinal bullishness scores in [0,1], not calibrated
/// probabilities.
#[derive(Debug, Clone, PartialEq)]
pub enum Score {
    Scalar(f64),
    /// One score per entry of [`HORIZONS`].
    Horizons([f64; 4]),
}

/// How a horizon vector collapses to the scalar the policy consumes.
/// Part of the model artifact metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "weights", rename_all = "snake_case")]
pub enum CompositeRule {
    /// Mean of the mid/long horizons p3, p5, p7 (the default).
    MidLongMean,
    /// Mean over all horizons.
    Mean,
    /// Explicit per-horizon weights, normalized by their sum.
    Weighted(Vec<f64>),
}

impl Default for CompositeRule {
    fn default() -> Self {
        CompositeRule::MidLongMean
    }
}

impl CompositeRule {
    pub fn reduce(&self, score: &Score) -> f64 {
        match score {
            Score::Scalar(v) => *v,
            Score::Horizons(h) => match self {
                CompositeRule::MidLongMean => (h[1] + h[2] + h[3]) / 3.0,
                CompositeRule::Mean => h.iter().sum::<f64>() / h.len() as f64,
                CompositeRule::Weighted(w) => {
                    let total: f64 = w.iter().take(h.len()).sum();
                    if total <= 0.0 {
                        return 0.0;
                    }
                    h.iter()
                        .zip(w.iter())
                        .map(|(v, wt)| v * wt)
                        .sum::<f64>()
                        / total
                }
            },
        }
    }
}

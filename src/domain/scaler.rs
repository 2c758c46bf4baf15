//! Min/max feature scaler with a fixed column schema.
//!
//! Fit once, transform many. `transform` refuses frames whose column names
//! or order differ from fit time. Walk-forward refits use `extend_row`,
//! which advances the fit by one row and matches a full refit on the same
//! prefix.

use crate::domain::error::SigtraderError;
use crate::domain::features::EPS;
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCALER_FILE: &str = "scaler.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinMaxScaler {
    columns: Vec<String>,
    min: Vec<f64>,
    max: Vec<f64>,
    n_rows: usize,
}

impl MinMaxScaler {
    /// Fit on a rows x columns matrix.
    pub fn fit(data: ArrayView2<'_, f64>, columns: &[&str]) -> Self {
        let ncols = columns.len();
        debug_assert_eq!(data.ncols(), ncols);
        let mut min = vec![f64::INFINITY; ncols];
        let mut max = vec![f64::NEG_INFINITY; ncols];
        for row in data.rows() {
            for (c, &v) in row.iter().enumerate() {
                if v < min[c] {
                    min[c] = v;
                }
                if v > max[c] {
                    max[c] = v;
                }
            }
        }
        MinMaxScaler {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            min,
            max,
            n_rows: data.nrows(),
        }
    }

    /// Advance the fit by one appended row.
    pub fn extend_row(&mut self, row: ArrayView1<'_, f64>) {
        for (c, &v) in row.iter().enumerate() {
            if v < self.min[c] {
                self.min[c] = v;
            }
            if v > self.max[c] {
                self.max[c] = v;
            }
        }
        self.n_rows += 1;
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn check_columns(&self, columns: &[&str]) -> Result<(), SigtraderError> {
        if self.columns.len() != columns.len()
            || self.columns.iter().zip(columns).any(|(a, b)| a != b)
        {
            return Err(SigtraderError::SchemaMismatch {
                expected: self.columns.clone(),
                got: columns.iter().map(|s| s.to_string()).collect(),
            });
        }
        Ok(())
    }

    /// Scale a matrix into [0,1] per column. Constant columns map to 0.
    pub fn transform(
        &self,
        data: ArrayView2<'_, f64>,
        columns: &[&str],
    ) -> Result<Array2<f64>, SigtraderError> {
        self.check_columns(columns)?;
        let mut out = data.to_owned();
        for mut row in out.rows_mut() {
            for (c, v) in row.iter_mut().enumerate() {
                let range = self.max[c] - self.min[c];
                *v = if range > EPS {
                    (*v - self.min[c]) / range
                } else {
                    0.0
                };
            }
        }
        Ok(out)
    }

    pub fn save(&self, dir: &Path) -> Result<(), SigtraderError> {
        let path = dir.join(SCALER_FILE);
        let json =
            serde_json::to_string_pretty(self).map_err(|e| SigtraderError::Artifact {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, SigtraderError> {
        let path = dir.join(SCALER_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

//! Feature transforms applied before clustering
//!
//! Frequency and monetary value are `log1p`-compressed to tame their right
//! skew; recency is kept as-is. All three columns are then standardized with
//! the population mean and standard deviation.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rfm::RfmRow;

/// Names of the feature columns, in matrix order
pub const FEATURE_NAMES: [&str; 3] = ["recency", "log1p_frequency", "log1p_monetary"];

/// Per-feature mean and standard deviation fitted on the clustered population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl StandardScaler {
    /// Fit on the rows of `features`; a zero standard deviation is replaced by 1
    pub fn fit(features: &Array2<f64>) -> Self {
        let n = features.nrows().max(1) as f64;
        let mean: Vec<f64> = features
            .axis_iter(Axis(1))
            .map(|column| column.sum() / n)
            .collect();
        let std = features
            .axis_iter(Axis(1))
            .zip(&mean)
            .map(|(column, &m)| {
                let var = column.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > 0.0 && std.is_finite() {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { mean, std }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if features.ncols() != self.mean.len() {
            return Err(Error::InvalidFeatures(format!(
                "expected {} feature columns, got {}",
                self.mean.len(),
                features.ncols()
            )));
        }
        let mut scaled = features.clone();
        for (mut column, (m, s)) in scaled
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.std))
        {
            column.mapv_inplace(|x| (x - m) / s);
        }
        Ok(scaled)
    }

    /// Scale a single feature vector
    pub fn transform_one(&self, features: &[f64]) -> Result<Array1<f64>> {
        let input = Array2::from_shape_vec((1, features.len()), features.to_vec())?;
        Ok(self.transform(&input)?.row(0).to_owned())
    }
}

/// Map raw R/F/M values to the unscaled feature vector
pub fn rfm_features(recency: f64, frequency: f64, monetary: f64) -> [f64; 3] {
    [recency, frequency.ln_1p(), monetary.ln_1p()]
}

/// Unscaled feature matrix, one row per customer
pub fn feature_matrix(rows: &[RfmRow]) -> Result<Array2<f64>> {
    let mut data = Vec::with_capacity(rows.len() * 3);
    for row in rows {
        data.extend_from_slice(&rfm_features(
            row.recency as f64,
            row.frequency as f64,
            row.monetary,
        ));
    }
    Ok(Array2::from_shape_vec((rows.len(), 3), data)?)
}

/// Build the feature matrix, fit the scaler on it and return the scaled matrix
pub fn prepare_features(rows: &[RfmRow]) -> Result<(Array2<f64>, StandardScaler)> {
    let raw = feature_matrix(rows)?;
    let scaler = StandardScaler::fit(&raw);
    let scaled = scaler.transform(&raw)?;
    Ok((scaled, scaler))
}

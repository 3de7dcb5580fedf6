//! Pipeline configuration for the feature builder and the segmenter

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options for cleaning transactions and computing the snapshot date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Days added to the latest transaction timestamp to form the snapshot date
    pub snapshot_offset_days: i64,
    /// Invoice prefix marking a cancellation
    pub cancellation_prefix: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            snapshot_offset_days: 1,
            cancellation_prefix: "C".to_string(),
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_offset_days < 0 {
            return Err(Error::InvalidConfig(format!(
                "snapshot offset must be non-negative, got {} days",
                self.snapshot_offset_days
            )));
        }
        if self.cancellation_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "cancellation prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for feature scaling, cluster count selection and K-Means
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Candidate cluster counts evaluated by silhouette score
    pub k_candidates: Vec<usize>,
    /// Cluster count used when no candidate yields a defined silhouette
    pub fallback_k: usize,
    /// Seed for every K-Means run
    pub seed: u64,
    /// Maximum iterations per K-Means run
    pub max_iterations: u64,
    /// Convergence tolerance for K-Means
    pub tolerance: f64,
    /// Number of K-Means initializations; the best inertia wins
    pub n_runs: usize,
    /// Evaluate the silhouette on the first N customers only
    pub silhouette_sample: Option<usize>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            k_candidates: (2..=10).collect(),
            fallback_k: 4,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
            silhouette_sample: None,
        }
    }
}

impl SegmenterConfig {
    /// Config evaluating every k in `k_min..=k_max`
    pub fn with_k_range(k_min: usize, k_max: usize) -> Self {
        Self {
            k_candidates: (k_min..=k_max).collect(),
            ..Self::default()
        }
    }

    /// Smallest candidate k, if any
    pub fn min_k(&self) -> Option<usize> {
        self.k_candidates.iter().copied().min()
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_candidates.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one candidate cluster count is required".to_string(),
            ));
        }
        if let Some(k) = self.k_candidates.iter().find(|&&k| k < 2) {
            return Err(Error::InvalidConfig(format!(
                "candidate cluster counts must be at least 2, got {}",
                k
            )));
        }
        if self.fallback_k < 2 {
            return Err(Error::InvalidConfig(format!(
                "fallback cluster count must be at least 2, got {}",
                self.fallback_k
            )));
        }
        if self.max_iterations == 0 || self.n_runs == 0 {
            return Err(Error::InvalidConfig(
                "max iterations and number of runs must be positive".to_string(),
            ));
        }
        if !(self.tolerance > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.silhouette_sample == Some(0) {
            return Err(Error::InvalidConfig(
                "silhouette sample size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

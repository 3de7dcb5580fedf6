//! K-Means clustering, silhouette scoring and cluster count selection

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SegmenterConfig;
use crate::error::{Error, Result};

/// A fitted K-Means partition of the scaled feature matrix
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment of every row
    pub labels: Array1<usize>,
    /// Cluster centroids in scaled feature space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

/// Fit K-Means with a freshly seeded generator so identical input gives identical labels
pub fn fit_kmeans(features: &Array2<f64>, n_clusters: usize, config: &SegmenterConfig) -> Result<KMeansModel> {
    if n_clusters < 2 {
        return Err(Error::InvalidConfig(format!(
            "cluster count must be at least 2, got {}",
            n_clusters
        )));
    }
    if features.nrows() < n_clusters {
        return Err(Error::InsufficientCustomers {
            customers: features.nrows(),
            required: n_clusters,
        });
    }

    let dataset = DatasetBase::from(features.clone());
    let rng = Xoshiro256Plus::seed_from_u64(config.seed);

    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .n_runs(config.n_runs)
        .fit(&dataset)?;

    let labels = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Index of the centroid nearest to `point` by Euclidean distance
pub fn nearest_centroid(centroids: &Array2<f64>, point: &ArrayView1<f64>) -> Result<usize> {
    if point.len() != centroids.ncols() {
        return Err(Error::InvalidFeatures(format!(
            "feature vector must have {} dimensions, got {}",
            centroids.ncols(),
            point.len()
        )));
    }

    let mut min_distance = f64::INFINITY;
    let mut closest = 0;
    for (idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = euclidean_distance(point, &centroid);
        if distance < min_distance {
            min_distance = distance;
            closest = idx;
        }
    }
    Ok(closest)
}

/// Mean silhouette coefficient of a partition
///
/// Only the first `sample_size` rows are scored (all rows when `None`).
/// Returns `None` when the score is undefined: fewer than two non-empty
/// clusters, or as many clusters as scored points.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, sample_size: Option<usize>) -> Option<f64> {
    let n = sample_size.map_or(features.nrows(), |s| s.min(features.nrows()));
    if n < 2 {
        return None;
    }

    let n_labels = labels.iter().take(n).copied().max()? + 1;
    let mut sizes = vec![0usize; n_labels];
    for &label in labels.iter().take(n) {
        sizes[label] += 1;
    }
    let non_empty = sizes.iter().filter(|&&s| s > 0).count();
    if non_empty < 2 || non_empty >= n {
        return None;
    }

    let mut total = 0.0;
    let mut distance_sums = vec![0.0; n_labels];
    for i in 0..n {
        let own = labels[i];
        if sizes[own] == 1 {
            continue;
        }

        distance_sums.iter_mut().for_each(|d| *d = 0.0);
        let point = features.row(i);
        for j in 0..n {
            if i != j {
                distance_sums[labels[j]] += euclidean_distance(&point, &features.row(j));
            }
        }

        let a = distance_sums[own] / (sizes[own] - 1) as f64;
        let b = (0..n_labels)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| distance_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Some(total / n as f64)
}

/// Why a cluster count was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    BestSilhouette,
    Fallback,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionReason::BestSilhouette => write!(f, "best silhouette"),
            SelectionReason::Fallback => write!(f, "fallback"),
        }
    }
}

/// Evaluation of one candidate cluster count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub k: usize,
    pub silhouette: Option<f64>,
    pub inertia: Option<f64>,
    /// Not evaluated because there are fewer customers than clusters
    pub skipped: bool,
}

/// The chosen partition and how it was chosen
#[derive(Debug, Clone)]
pub struct KSelection {
    pub model: KMeansModel,
    pub reason: SelectionReason,
    pub silhouette: Option<f64>,
    pub candidates: Vec<CandidateScore>,
}

/// Fit every candidate k and keep the one with the best silhouette
///
/// The smallest k wins a tie. When no candidate produces a defined silhouette
/// the configured fallback k is used, clamped to the number of rows.
pub fn select_k(features: &Array2<f64>, config: &SegmenterConfig) -> Result<KSelection> {
    config.validate()?;
    let n = features.nrows();
    let min_k = config.min_k().unwrap_or(2);
    if n < min_k {
        return Err(Error::InsufficientCustomers {
            customers: n,
            required: min_k,
        });
    }

    let mut k_values = config.k_candidates.clone();
    k_values.sort_unstable();
    k_values.dedup();

    let mut candidates = Vec::with_capacity(k_values.len());
    let mut best: Option<(KMeansModel, f64)> = None;

    for k in k_values {
        if k > n {
            warn!(k, customers = n, "skipping candidate k larger than the customer count");
            candidates.push(CandidateScore {
                k,
                silhouette: None,
                inertia: None,
                skipped: true,
            });
            continue;
        }

        let model = fit_kmeans(features, k, config)?;
        let silhouette = silhouette_score(features, &model.labels, config.silhouette_sample);
        debug!(k, inertia = model.inertia, silhouette = ?silhouette, "evaluated candidate");

        candidates.push(CandidateScore {
            k,
            silhouette,
            inertia: Some(model.inertia),
            skipped: false,
        });

        if let Some(score) = silhouette {
            if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
                best = Some((model, score));
            }
        }
    }

    match best {
        Some((model, score)) => {
            info!(k = model.n_clusters, silhouette = score, "selected cluster count");
            Ok(KSelection {
                model,
                reason: SelectionReason::BestSilhouette,
                silhouette: Some(score),
                candidates,
            })
        }
        None => {
            let k = config.fallback_k.min(n).max(2);
            warn!(k, "silhouette undefined for every candidate, using fallback cluster count");
            let model = fit_kmeans(features, k, config)?;
            let silhouette = silhouette_score(features, &model.labels, config.silhouette_sample);
            Ok(KSelection {
                model,
                reason: SelectionReason::Fallback,
                silhouette,
                candidates,
            })
        }
    }
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| euclidean_distance(&features.row(i), &centroids.row(cluster)).powi(2))
        .sum()
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

//! Customer segmentation: scaling, cluster selection, ranking and naming
//!
//! Segment names come from ranking per-cluster medians of the original RFM
//! values, never from the raw cluster index, so a name keeps its meaning even
//! when K-Means numbers the clusters differently.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SegmenterConfig;
use crate::error::{Error, Result};
use crate::model::{nearest_centroid, select_k, CandidateScore, SelectionReason};
use crate::rfm::RfmRow;
use crate::scaling::{prepare_features, rfm_features, StandardScaler};

/// Segment tiers from best to worst
pub const SEGMENT_PALETTE: [&str; 5] = ["Champions", "Loyal", "Potential", "At Risk", "Hibernating"];

/// An RFM row with its cluster assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCustomer {
    #[serde(flatten)]
    pub rfm: RfmRow,
    pub cluster_id: usize,
    pub segment_name: String,
}

/// Size, medians and rank of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub segment_name: String,
    /// Position in the best-to-worst ordering, starting at 0
    pub rank: usize,
    pub size: usize,
    pub share: f64,
    /// Medians of the untransformed values; `None` for an empty cluster
    pub median_recency: Option<f64>,
    pub median_frequency: Option<f64>,
    pub median_monetary: Option<f64>,
    /// Sum of the per-dimension dense ranks; lower is better
    pub composite_score: Option<usize>,
}

/// Summary of a segmentation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub customers: usize,
    pub k: usize,
    pub selection_reason: SelectionReason,
    pub silhouette: Option<f64>,
    pub inertia: f64,
    pub candidates: Vec<CandidateScore>,
    /// Cluster profiles in rank order
    pub clusters: Vec<ClusterProfile>,
    pub scaler: StandardScaler,
    pub config: SegmenterConfig,
}

/// Cluster and segment of a newly scored customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub cluster_id: usize,
    pub segment_name: String,
}

/// Everything needed to score a new customer the same way as the training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationModel {
    pub scaler: StandardScaler,
    /// Centroids in scaled feature space, indexed by cluster id
    pub centroids: Vec<Vec<f64>>,
    /// Segment name of each cluster id
    pub segment_names: Vec<String>,
}

impl SegmentationModel {
    /// Scale raw R/F/M values and return the nearest cluster and its segment
    pub fn assign(&self, recency: f64, frequency: f64, monetary: f64) -> Result<Assignment> {
        if [recency, frequency, monetary]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(Error::InvalidFeatures(format!(
                "R/F/M values must be finite and non-negative, got {}, {}, {}",
                recency, frequency, monetary
            )));
        }

        let scaled = self
            .scaler
            .transform_one(&rfm_features(recency, frequency, monetary))?;
        let centroids = self.centroid_matrix()?;
        let cluster_id = nearest_centroid(&centroids, &scaled.view())?;
        let segment_name = self
            .segment_names
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| Error::InvalidFeatures(format!("no segment name for cluster {}", cluster_id)))?;

        Ok(Assignment {
            cluster_id,
            segment_name,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn centroid_matrix(&self) -> Result<Array2<f64>> {
        let dims = self.scaler.mean.len();
        let flat: Vec<f64> = self.centroids.iter().flatten().copied().collect();
        if flat.len() != self.centroids.len() * dims {
            return Err(Error::InvalidFeatures(format!(
                "centroids must all have {} dimensions",
                dims
            )));
        }
        Ok(Array2::from_shape_vec((self.centroids.len(), dims), flat)?)
    }
}

/// Result of [`segment`]
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub scored: Vec<ScoredCustomer>,
    pub report: ModelReport,
    pub model: SegmentationModel,
}

/// Scale RFM rows, pick a cluster count, cluster, and name the clusters
pub fn segment(rows: &[RfmRow], config: &SegmenterConfig) -> Result<Segmentation> {
    config.validate()?;
    let min_k = config.min_k().unwrap_or(2);
    if rows.len() < min_k {
        return Err(Error::InsufficientCustomers {
            customers: rows.len(),
            required: min_k,
        });
    }

    let (features, scaler) = prepare_features(rows)?;
    let selection = select_k(&features, config)?;
    let model = selection.model;
    let labels: Vec<usize> = model.labels.to_vec();

    let clusters = rank_clusters(rows, &labels, model.n_clusters);

    let mut names_by_cluster = vec![String::new(); model.n_clusters];
    for profile in &clusters {
        names_by_cluster[profile.cluster_id] = profile.segment_name.clone();
    }

    let scored: Vec<ScoredCustomer> = rows
        .iter()
        .zip(&labels)
        .map(|(row, &cluster_id)| ScoredCustomer {
            rfm: row.clone(),
            cluster_id,
            segment_name: names_by_cluster[cluster_id].clone(),
        })
        .collect();

    for profile in &clusters {
        info!(
            cluster = profile.cluster_id,
            segment = %profile.segment_name,
            size = profile.size,
            "named cluster"
        );
    }

    let report = ModelReport {
        customers: rows.len(),
        k: model.n_clusters,
        selection_reason: selection.reason,
        silhouette: selection.silhouette,
        inertia: model.inertia,
        candidates: selection.candidates,
        clusters,
        scaler: scaler.clone(),
        config: config.clone(),
    };

    let segmentation_model = SegmentationModel {
        scaler,
        centroids: model
            .centroids
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        segment_names: names_by_cluster,
    };

    Ok(Segmentation {
        scored,
        report,
        model: segmentation_model,
    })
}

/// Profile every cluster, order them best to worst and assign segment names
///
/// Each dimension is dense-ranked across clusters (recency ascending,
/// frequency and monetary descending) and the ranks are summed. Ties on the
/// sum fall back to higher median monetary, then lower median recency, then
/// lower cluster id. Empty clusters rank last.
pub fn rank_clusters(rows: &[RfmRow], labels: &[usize], n_clusters: usize) -> Vec<ClusterProfile> {
    let total = rows.len().max(1) as f64;
    let mut members: Vec<Vec<&RfmRow>> = vec![Vec::new(); n_clusters];
    for (row, &label) in rows.iter().zip(labels) {
        if label < n_clusters {
            members[label].push(row);
        }
    }

    let mut profiles: Vec<ClusterProfile> = members
        .iter()
        .enumerate()
        .map(|(cluster_id, group)| ClusterProfile {
            cluster_id,
            segment_name: String::new(),
            rank: 0,
            size: group.len(),
            share: group.len() as f64 / total,
            median_recency: median(group.iter().map(|r| r.recency as f64).collect()),
            median_frequency: median(group.iter().map(|r| r.frequency as f64).collect()),
            median_monetary: median(group.iter().map(|r| r.monetary).collect()),
            composite_score: None,
        })
        .collect();

    let recency_ranks = dense_ranks(&profiles, |p| p.median_recency, false);
    let frequency_ranks = dense_ranks(&profiles, |p| p.median_frequency, true);
    let monetary_ranks = dense_ranks(&profiles, |p| p.median_monetary, true);
    for (i, profile) in profiles.iter_mut().enumerate() {
        profile.composite_score = match (recency_ranks[i], frequency_ranks[i], monetary_ranks[i]) {
            (Some(r), Some(f), Some(m)) => Some(r + f + m),
            _ => None,
        };
    }

    profiles.sort_by(compare_profiles);

    let names = segment_names(profiles.len());
    for (rank, (profile, name)) in profiles.iter_mut().zip(names).enumerate() {
        profile.rank = rank;
        profile.segment_name = name;
    }
    profiles
}

/// Distinct display labels for `k` clusters already sorted best to worst
///
/// Up to the palette length, ranks are spread over the palette so the best
/// cluster is always the first tier and the worst the last. Beyond it,
/// consecutive ranks share a tier and later ones get a numeric suffix.
pub fn segment_names(k: usize) -> Vec<String> {
    let tiers = SEGMENT_PALETTE.len();
    let mut seen = [0usize; SEGMENT_PALETTE.len()];

    (0..k)
        .map(|i| {
            let tier = if k <= 1 {
                0
            } else if k <= tiers {
                ((i * (tiers - 1)) as f64 / (k - 1) as f64).round() as usize
            } else {
                i * tiers / k
            };
            seen[tier] += 1;
            match seen[tier] {
                1 => SEGMENT_PALETTE[tier].to_string(),
                n => format!("{} ({})", SEGMENT_PALETTE[tier], n),
            }
        })
        .collect()
}

fn compare_profiles(a: &ClusterProfile, b: &ClusterProfile) -> Ordering {
    let by_score = match (a.composite_score, b.composite_score) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score
        .then_with(|| {
            let monetary_a = a.median_monetary.unwrap_or(f64::NEG_INFINITY);
            let monetary_b = b.median_monetary.unwrap_or(f64::NEG_INFINITY);
            monetary_b.total_cmp(&monetary_a)
        })
        .then_with(|| {
            let recency_a = a.median_recency.unwrap_or(f64::INFINITY);
            let recency_b = b.median_recency.unwrap_or(f64::INFINITY);
            recency_a.total_cmp(&recency_b)
        })
        .then_with(|| a.cluster_id.cmp(&b.cluster_id))
}

/// 1-based dense rank of each profile's value; `None` values stay unranked
fn dense_ranks<F>(profiles: &[ClusterProfile], value: F, descending: bool) -> Vec<Option<usize>>
where
    F: Fn(&ClusterProfile) -> Option<f64>,
{
    let mut distinct: Vec<f64> = profiles.iter().filter_map(&value).collect();
    distinct.sort_by(|a, b| if descending { b.total_cmp(a) } else { a.total_cmp(b) });
    distinct.dedup();

    profiles
        .iter()
        .map(|p| {
            let v = value(p)?;
            distinct.iter().position(|d| *d == v).map(|idx| idx + 1)
        })
        .collect()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

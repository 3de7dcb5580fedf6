//! RfmForge: customer segmentation from retail transactions
//!
//! The pipeline cleans transaction records, derives per-customer Recency,
//! Frequency and Monetary (RFM) features, clusters customers with K-Means and
//! names the clusters by ranking their median RFM values.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod rfm;
pub mod scaling;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{BuilderConfig, SegmenterConfig};
pub use data::{load_rfm_table, load_transactions, Transaction};
pub use error::{Error, Result};
pub use model::{fit_kmeans, select_k, silhouette_score, KMeansModel, SelectionReason};
pub use pipeline::{run_pipeline, PipelineInput, PipelineOptions, PipelineOutcome};
pub use rfm::{build_rfm, compute_rfm, CleanedTransaction, CleaningRule, QualityReport, RfmRow, RfmTable};
pub use scaling::StandardScaler;
pub use segment::{segment, ModelReport, ScoredCustomer, Segmentation, SegmentationModel};

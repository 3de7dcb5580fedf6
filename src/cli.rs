//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::{BuilderConfig, SegmenterConfig};
use crate::error::{Error, Result};
use crate::pipeline::{PipelineInput, PipelineOptions, MODEL_FILE};

/// Customer segmentation CLI: RFM features and K-Means segments from retail transactions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transaction CSV file
    #[arg(short, long, default_value = "data.csv", conflicts_with = "rfm")]
    pub input: PathBuf,

    /// Segment an existing RFM table instead of building one from transactions
    #[arg(long)]
    pub rfm: Option<PathBuf>,

    /// Directory receiving the output tables, reports and charts
    #[arg(short, long, default_value = "output")]
    pub outdir: PathBuf,

    /// Smallest candidate cluster count
    #[arg(long, default_value = "2")]
    pub k_min: usize,

    /// Largest candidate cluster count
    #[arg(long, default_value = "10")]
    pub k_max: usize,

    /// Use exactly this cluster count instead of searching k-min..=k-max
    #[arg(short = 'k', long)]
    pub fixed_k: Option<usize>,

    /// Cluster count used when no candidate has a defined silhouette score
    #[arg(long, default_value = "4")]
    pub fallback_k: usize,

    /// Seed for K-Means initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Days added to the latest transaction to form the snapshot date
    #[arg(long, default_value = "1")]
    pub snapshot_offset_days: i64,

    /// Maximum iterations for the K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Number of K-Means initializations per candidate
    #[arg(long, default_value = "10")]
    pub n_runs: usize,

    /// Score the silhouette on the first N customers only
    #[arg(long)]
    pub silhouette_sample: Option<usize>,

    /// Skip rendering PNG charts
    #[arg(long)]
    pub no_plots: bool,

    /// Prediction mode: provide R,F,M values as comma-separated string
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10, Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Saved segmentation model used by prediction mode (default: <outdir>/segmentation_model.json)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary"
    pub fn parse_rfm_values(&self) -> Result<Option<(f64, f64, f64)>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidFeatures(
                "predict values must be in format 'recency,frequency,monetary'".to_string(),
            ));
        }

        let parse = |name: &str, raw: &str| -> Result<f64> {
            raw.trim()
                .parse()
                .map_err(|_| Error::InvalidFeatures(format!("invalid {} value: {}", name, raw)))
        };

        Ok(Some((
            parse("recency", parts[0])?,
            parse("frequency", parts[1])?,
            parse("monetary", parts[2])?,
        )))
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            snapshot_offset_days: self.snapshot_offset_days,
            ..BuilderConfig::default()
        }
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        let k_candidates = match self.fixed_k {
            Some(k) => vec![k],
            None => (self.k_min..=self.k_max).collect(),
        };
        SegmenterConfig {
            k_candidates,
            fallback_k: self.fallback_k,
            seed: self.seed,
            max_iterations: self.max_iters,
            tolerance: self.tolerance,
            n_runs: self.n_runs,
            silhouette_sample: self.silhouette_sample,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let input = match &self.rfm {
            Some(path) => PipelineInput::Rfm(path.clone()),
            None => PipelineInput::Transactions(self.input.clone()),
        };
        PipelineOptions {
            input,
            outdir: self.outdir.clone(),
            builder: self.builder_config(),
            segmenter: self.segmenter_config(),
            plots: !self.no_plots,
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model
            .clone()
            .unwrap_or_else(|| self.outdir.join(MODEL_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfm_values() {
        let mut args = Args::parse_from(["rfmforge", "--predict", "30,10,500.0"]);

        let result = args.parse_rfm_values().unwrap();
        assert_eq!(result, Some((30.0, 10.0, 500.0)));

        args.predict = None;
        let result = args.parse_rfm_values().unwrap();
        assert_eq!(result, None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_rfm_values().is_err());

        args.predict = Some("1,two,3".to_string());
        assert!(args.parse_rfm_values().is_err());
    }

    #[test]
    fn test_default_configs() {
        let args = Args::parse_from(["rfmforge"]);
        assert_eq!(args.segmenter_config(), SegmenterConfig::default());
        assert_eq!(args.builder_config(), BuilderConfig::default());
        assert_eq!(args.model_path(), PathBuf::from("output").join(MODEL_FILE));
        assert!(matches!(args.pipeline_options().input, PipelineInput::Transactions(_)));
    }

    #[test]
    fn test_fixed_k_and_rfm_input() {
        let args = Args::parse_from(["rfmforge", "--rfm", "customers_rfm.csv", "-k", "4", "--no-plots"]);
        let options = args.pipeline_options();
        assert_eq!(options.segmenter.k_candidates, vec![4]);
        assert!(!options.plots);
        assert!(matches!(options.input, PipelineInput::Rfm(_)));
    }
}

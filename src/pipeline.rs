//! End-to-end run: load, build features, segment, and write every artifact
//!
//! Output files are overwritten wholesale on every run.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::{BuilderConfig, SegmenterConfig};
use crate::data::{load_rfm_table, load_transactions, write_clean_transactions, write_rfm_table, write_scored_table};
use crate::error::Result;
use crate::report::{model_report_markdown, quality_report_markdown, write_json, write_markdown};
use crate::rfm::{build_rfm, QualityReport, RfmRow};
use crate::segment::{segment, Segmentation};
use crate::viz::generate_segment_charts;

pub const CLEAN_TRANSACTIONS_FILE: &str = "transactions_clean.csv";
pub const RFM_FILE: &str = "customers_rfm.csv";
pub const SCORED_FILE: &str = "customers_rfm_scored.csv";
pub const QUALITY_REPORT_MD: &str = "data_quality_report.md";
pub const QUALITY_REPORT_JSON: &str = "data_quality_report.json";
pub const MODEL_REPORT_MD: &str = "model_report.md";
pub const MODEL_REPORT_JSON: &str = "model_report.json";
pub const MODEL_FILE: &str = "segmentation_model.json";
pub const SEGMENT_PLOT: &str = "segments.png";

/// Where the customers to segment come from
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Raw transactions; the feature builder runs first
    Transactions(PathBuf),
    /// A previously written RFM table; the feature builder is skipped
    Rfm(PathBuf),
}

/// Options for a full pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input: PipelineInput,
    pub outdir: PathBuf,
    pub builder: BuilderConfig,
    pub segmenter: SegmenterConfig,
    pub plots: bool,
}

/// What a run produced
#[derive(Debug)]
pub struct PipelineOutcome {
    pub quality: Option<QualityReport>,
    pub snapshot_date: Option<NaiveDateTime>,
    pub segmentation: Segmentation,
    pub written: Vec<PathBuf>,
}

/// Run the whole pipeline and write its artifacts into `options.outdir`
///
/// Nothing is written until feature building and segmentation have both
/// succeeded, so a failed run leaves a previous run's outputs untouched.
pub fn run_pipeline(options: &PipelineOptions) -> Result<PipelineOutcome> {
    options.builder.validate()?;
    options.segmenter.validate()?;

    let (rows, built): (Vec<RfmRow>, _) = match &options.input {
        PipelineInput::Transactions(path) => {
            let transactions = load_transactions(path)?;
            let built = build_rfm(&transactions, &options.builder)?;
            (built.0.rows.clone(), Some(built))
        }
        PipelineInput::Rfm(path) => (load_rfm_table(path)?, None),
    };

    let segmentation = segment(&rows, &options.segmenter)?;

    std::fs::create_dir_all(&options.outdir)?;
    let outdir = options.outdir.as_path();
    let mut written = Vec::new();

    let (quality, snapshot_date) = match built {
        Some((table, quality, cleaned)) => {
            write_clean_transactions(track(&mut written, outdir, CLEAN_TRANSACTIONS_FILE), &cleaned)?;
            write_rfm_table(track(&mut written, outdir, RFM_FILE), &table)?;
            write_markdown(
                track(&mut written, outdir, QUALITY_REPORT_MD),
                &quality_report_markdown(&quality),
            )?;
            write_json(track(&mut written, outdir, QUALITY_REPORT_JSON), &quality)?;
            (Some(quality), Some(table.snapshot_date))
        }
        None => (None, None),
    };

    write_scored_table(track(&mut written, outdir, SCORED_FILE), &segmentation.scored)?;
    write_markdown(
        track(&mut written, outdir, MODEL_REPORT_MD),
        &model_report_markdown(&segmentation.report),
    )?;
    write_json(track(&mut written, outdir, MODEL_REPORT_JSON), &segmentation.report)?;
    segmentation.model.save(track(&mut written, outdir, MODEL_FILE))?;

    if options.plots {
        let plot_path = track(&mut written, outdir, SEGMENT_PLOT);
        let sizes_path = generate_segment_charts(&segmentation, &plot_path)?;
        written.push(sizes_path);
    }

    info!(
        customers = segmentation.report.customers,
        k = segmentation.report.k,
        files = written.len(),
        outdir = %outdir.display(),
        "pipeline complete"
    );

    Ok(PipelineOutcome {
        quality,
        snapshot_date,
        segmentation,
        written,
    })
}

fn track(written: &mut Vec<PathBuf>, outdir: &Path, file: &str) -> PathBuf {
    let path = outdir.join(file);
    written.push(path.clone());
    path
}

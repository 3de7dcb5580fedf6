//! RfmForge: customer segmentation CLI
//!
//! Runs the full pipeline (transactions → RFM → segments → artifacts) or, with
//! `--predict`, scores one customer against a saved segmentation model.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rfmforge::{run_pipeline, Args, SegmentationModel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Some(rfm_values) = args.parse_rfm_values()? {
        run_prediction_mode(&args, rfm_values)
    } else {
        run_full_pipeline(&args)
    }
}

/// Initialize tracing from `RFMFORGE_LOG`, defaulting to info (debug when verbose)
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("RFMFORGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Score a single customer with a previously saved model
fn run_prediction_mode(args: &Args, rfm_values: (f64, f64, f64)) -> Result<()> {
    let (recency, frequency, monetary) = rfm_values;
    let model_path = args.model_path();
    let model = SegmentationModel::load(&model_path)
        .with_context(|| format!("loading segmentation model from {}", model_path.display()))?;

    let assignment = model.assign(recency, frequency, monetary)?;

    println!("=== Prediction Mode ===");
    println!("Input RFM values: R={}, F={}, M={}", recency, frequency, monetary);
    println!("Predicted cluster: {}", assignment.cluster_id);
    println!("Segment: {}", assignment.segment_name);
    Ok(())
}

/// Run the full segmentation pipeline
fn run_full_pipeline(args: &Args) -> Result<()> {
    let start_time = Instant::now();
    let options = args.pipeline_options();

    let outcome = run_pipeline(&options).context("segmentation pipeline failed")?;
    let report = &outcome.segmentation.report;

    println!("=== Segmentation Complete ===\n");
    if let Some(quality) = &outcome.quality {
        println!(
            "Transactions: {} raw, {} clean ({} removed)",
            quality.raw_rows,
            quality.cleaned_rows,
            quality.removed_rows()
        );
    }
    if let Some(snapshot) = outcome.snapshot_date {
        println!("Snapshot date: {}", snapshot.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Customers: {}", report.customers);
    match report.silhouette {
        Some(score) => println!(
            "Clusters: {} ({}, silhouette {:.3})",
            report.k, report.selection_reason, score
        ),
        None => println!("Clusters: {} ({})", report.k, report.selection_reason),
    }

    println!("\nSegments:");
    for cluster in &report.clusters {
        println!(
            "  {:<16} {:>6} customers ({:.1}%)",
            cluster.segment_name,
            cluster.size,
            cluster.share * 100.0
        );
    }

    println!("\nWrote:");
    for path in &outcome.written {
        println!("  {}", path.display());
    }
    println!(
        "\nTotal processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

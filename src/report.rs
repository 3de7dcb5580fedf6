//! Markdown and JSON rendering of the data-quality and model reports

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::rfm::QualityReport;
use crate::scaling::FEATURE_NAMES;
use crate::segment::ModelReport;

/// Markdown view of a [`QualityReport`]
pub struct QualityMarkdown<'a>(pub &'a QualityReport);

impl fmt::Display for QualityMarkdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "# Data Quality Report\n")?;
        writeln!(f, "**Raw rows:** {}\n", report.raw_rows)?;

        writeln!(f, "## Raw missing values\n")?;
        let missing = &report.missing;
        writeln!(f, "- InvoiceNo missing: {}", missing.invoice_no)?;
        writeln!(f, "- InvoiceDate missing: {}", missing.invoice_date)?;
        writeln!(f, "- CustomerID missing: {}", missing.customer_id)?;
        writeln!(f, "- Quantity missing: {}", missing.quantity)?;
        writeln!(f, "- UnitPrice missing: {}", missing.unit_price)?;
        writeln!(f, "- Country missing: {}\n", missing.country)?;

        writeln!(f, "## Rows removed\n")?;
        writeln!(f, "Rules are applied in order; a row counts against the first rule it fails.\n")?;
        writeln!(f, "| # | Rule | Description | Rows removed |")?;
        writeln!(f, "|---|------|-------------|-------------:|")?;
        for (i, count) in report.removed_by_rule.iter().enumerate() {
            writeln!(
                f,
                "| {} | `{}` | {} | {} |",
                i + 1,
                count.rule.name(),
                count.rule.description(),
                count.removed
            )?;
        }
        writeln!(f, "\n- Total removed: {}", report.removed_rows())?;
        writeln!(
            f,
            "- Rows with a cancellation invoice number: {}\n",
            report.cancellation_rows
        )?;

        writeln!(f, "## Final curated datasets\n")?;
        writeln!(f, "- Clean transactions: {} rows", report.cleaned_rows)?;
        writeln!(f, "- RFM customers: {} customers\n", report.customers)?;

        writeln!(f, "## Snapshot date\n")?;
        writeln!(
            f,
            "- {} (latest transaction + {} day(s))",
            report.snapshot_date.format("%Y-%m-%d %H:%M:%S"),
            report.snapshot_offset_days
        )?;
        Ok(())
    }
}

/// Markdown view of a [`ModelReport`]
pub struct ModelMarkdown<'a>(pub &'a ModelReport);

impl fmt::Display for ModelMarkdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f, "# Customer Segmentation Model Report\n")?;
        writeln!(f, "- Customers: {}", report.customers)?;
        writeln!(f, "- Clusters (k): {} ({})", report.k, report.selection_reason)?;
        match report.silhouette {
            Some(score) => writeln!(f, "- Silhouette score: {:.3}", score)?,
            None => writeln!(f, "- Silhouette score: undefined")?,
        }
        writeln!(f, "- Inertia: {:.3}", report.inertia)?;
        writeln!(f, "- Seed: {}\n", report.config.seed)?;

        writeln!(f, "## Candidate cluster counts\n")?;
        writeln!(f, "| k | Silhouette | Inertia |")?;
        writeln!(f, "|--:|-----------:|--------:|")?;
        for candidate in &report.candidates {
            let silhouette = match (candidate.skipped, candidate.silhouette) {
                (true, _) => "skipped".to_string(),
                (false, Some(s)) => format!("{:.3}", s),
                (false, None) => "undefined".to_string(),
            };
            let inertia = candidate
                .inertia
                .map(|i| format!("{:.3}", i))
                .unwrap_or_else(|| "-".to_string());
            writeln!(f, "| {} | {} | {} |", candidate.k, silhouette, inertia)?;
        }

        writeln!(f, "\n## Segments\n")?;
        writeln!(f, "| Rank | Segment | Cluster | Customers | Share | Recency | Frequency | Monetary |")?;
        writeln!(f, "|-----:|---------|--------:|----------:|------:|--------:|----------:|---------:|")?;
        for cluster in &report.clusters {
            writeln!(
                f,
                "| {} | {} | {} | {} | {:.1}% | {} | {} | {} |",
                cluster.rank + 1,
                cluster.segment_name,
                cluster.cluster_id,
                cluster.size,
                cluster.share * 100.0,
                format_median(cluster.median_recency),
                format_median(cluster.median_frequency),
                format_median(cluster.median_monetary),
            )?;
        }

        writeln!(f, "\n## Feature scaling\n")?;
        writeln!(f, "| Feature | Mean | Std |")?;
        writeln!(f, "|---------|-----:|----:|")?;
        for ((name, mean), std) in FEATURE_NAMES
            .iter()
            .zip(&report.scaler.mean)
            .zip(&report.scaler.std)
        {
            writeln!(f, "| {} | {:.4} | {:.4} |", name, mean, std)?;
        }
        Ok(())
    }
}

/// Render the data-quality report as Markdown
pub fn quality_report_markdown(report: &QualityReport) -> String {
    QualityMarkdown(report).to_string()
}

/// Render the model report as Markdown
pub fn model_report_markdown(report: &ModelReport) -> String {
    ModelMarkdown(report).to_string()
}

/// Write any serializable report as pretty JSON
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write rendered Markdown to `path`
pub fn write_markdown(path: impl AsRef<Path>, markdown: &str) -> Result<()> {
    std::fs::write(path, markdown)?;
    Ok(())
}

fn format_median(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "-".to_string())
}

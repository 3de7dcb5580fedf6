//! Segment charts rendered with Plotters

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::info;

use crate::error::{Error, Result};
use crate::segment::Segmentation;

/// Colors by segment rank, best first
const SEGMENT_COLORS: [RGBColor; 5] = [
    RGBColor(26, 152, 80),
    RGBColor(102, 189, 99),
    RGBColor(66, 146, 198),
    RGBColor(244, 109, 67),
    RGBColor(165, 0, 38),
];

fn plot_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Plot(err.to_string())
}

/// Color of the segment at `rank`; ranks beyond the palette reuse the last color
pub fn segment_color(rank: usize) -> RGBColor {
    SEGMENT_COLORS[rank.min(SEGMENT_COLORS.len() - 1)]
}

/// Padded (min, max) of `values`, or a unit range when empty
pub fn padded_range(values: &[f64], padding: f64) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    (min - padding, max + padding)
}

/// Path of the size chart that accompanies the scatter plot at `path`
pub fn sizes_chart_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segments".to_string());
    path.with_file_name(format!("{}_sizes.png", stem))
}

/// Scatter plot of log frequency against log monetary value, colored by segment
pub fn create_segment_scatter(segmentation: &Segmentation, output_path: &Path) -> Result<()> {
    let points: Vec<(f64, f64, usize)> = segmentation
        .scored
        .iter()
        .map(|s| {
            let rank = segmentation
                .report
                .clusters
                .iter()
                .find(|c| c.cluster_id == s.cluster_id)
                .map_or(0, |c| c.rank);
            (
                (s.rfm.frequency as f64).ln_1p(),
                s.rfm.monetary.ln_1p(),
                rank,
            )
        })
        .collect();

    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let (x_min, x_max) = padded_range(&xs, 0.25);
    let (y_min, y_max) = padded_range(&ys, 0.25);

    let root = BitMapBackend::new(output_path, (900, 650)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer Segments: Frequency vs Monetary", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("log(1 + Frequency)")
        .y_desc("log(1 + Monetary)")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    for cluster in &segmentation.report.clusters {
        let color = segment_color(cluster.rank);
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == cluster.rank)
                    .map(|&(x, y, _)| Circle::new((x, y), 3, color.mix(0.7).filled())),
            )
            .map_err(plot_error)?
            .label(format!("{} ({})", cluster.segment_name, cluster.size))
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    info!(path = %output_path.display(), "segment scatter saved");
    Ok(())
}

/// Bar chart of customers per segment, best segment first
pub fn create_segment_size_chart(segmentation: &Segmentation, output_path: &Path) -> Result<()> {
    let clusters = &segmentation.report.clusters;
    let max_size = clusters.iter().map(|c| c.size).max().unwrap_or(1).max(1) as f64;

    let root = BitMapBackend::new(output_path, (700, 450)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let names: Vec<String> = clusters.iter().map(|c| c.segment_name.clone()).collect();
    let mut chart = ChartBuilder::on(&root)
        .caption("Customers per Segment", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(clusters.len() as f64 - 0.5), 0f64..(max_size * 1.1))
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(clusters.len().max(1))
        .x_label_formatter(&|x| {
            let idx = x.round();
            if idx >= 0.0 && (idx as usize) < names.len() && (x - idx).abs() < 1e-6 {
                names[idx as usize].clone()
            } else {
                String::new()
            }
        })
        .y_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(clusters.iter().enumerate().map(|(i, cluster)| {
            let x = i as f64;
            Rectangle::new(
                [(x - 0.4, 0.0), (x + 0.4, cluster.size as f64)],
                segment_color(cluster.rank).filled(),
            )
        }))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    info!(path = %output_path.display(), "segment size chart saved");
    Ok(())
}

/// Render the scatter plot at `output_path` and the size chart next to it
pub fn generate_segment_charts(segmentation: &Segmentation, output_path: &Path) -> Result<PathBuf> {
    create_segment_scatter(segmentation, output_path)?;
    let sizes_path = sizes_chart_path(output_path);
    create_segment_size_chart(segmentation, &sizes_path)?;
    Ok(sizes_path)
}

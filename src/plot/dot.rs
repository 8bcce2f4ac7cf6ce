use std::path::Path;

use plotters::prelude::*;

use super::{finish, no_data, padded_range, padj_color, padj_log_range, segment_label, DrawResult, FONT};
use crate::enrichment::{GseaRecord, GseaTable};
use crate::error::Result;

/// Top `top_n` sets of the table: NES on x, one row per term, dot area by
/// set size and colour by adjusted p-value
pub fn enrichment_dotplot(path: &Path, table: &GseaTable, top_n: usize) -> Result<()> {
    let mut records: Vec<&GseaRecord> = table.records.iter().filter(|r| r.nes.is_finite()).take(top_n).collect();
    if records.is_empty() {
        return Err(no_data("dotplot", "enriched gene sets"));
    }
    // highest NES at the top
    records.sort_by(|a, b| a.nes.partial_cmp(&b.nes).unwrap_or(std::cmp::Ordering::Equal));
    finish("dotplot", path, draw(path, &records))
}

fn dot_radius(size: usize, max_size: usize) -> i32 {
    let scale = (size as f64 / max_size.max(1) as f64).sqrt();
    (4.0 + 10.0 * scale).round() as i32
}

fn draw(path: &Path, records: &[&GseaRecord]) -> DrawResult {
    let labels: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    let nes: Vec<f64> = records.iter().map(|r| r.nes).collect();
    let x_range = padded_range(nes.iter().chain(std::iter::once(&0.0))).unwrap_or(-1.0..1.0);
    let (min_log, max_log) = padj_log_range(records.iter().map(|r| r.padj));
    let max_size = records.iter().map(|r| r.size).max().unwrap_or(1);
    let n = records.len() as i32;

    let height = (200 + 32 * records.len()).max(500) as u32;
    let root = SVGBackend::new(path, (1100, height)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Gene set enrichment", (FONT, 26))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(300)
        .build_cartesian_2d(x_range.clone(), (0..n).into_segmented())?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(records.len())
        .y_label_formatter(&|v| segment_label(&labels, v))
        .x_desc("Normalized enrichment score")
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(0.0, SegmentValue::Exact(0)), (0.0, SegmentValue::Last)],
        BLACK.mix(0.4).stroke_width(1),
    ))?;
    chart.draw_series(records.iter().enumerate().map(|(i, r)| {
        let color = padj_color(r.padj, min_log, max_log);
        Circle::new(
            (r.nes, SegmentValue::CenterOf(i as i32)),
            dot_radius(r.size, max_size),
            color.filled(),
        )
    }))?;
    root.present()?;
    Ok(())
}

use std::path::Path;

use ndarray::Array1;
use plotters::coord::Shift;
use plotters::prelude::*;

use super::{finish, no_data, segment_label, DrawResult, DOWN, FONT, UP};
use crate::error::{PipelineError, Result};

/// Raw (top) and size-factor normalized (bottom) library sizes per sample
pub fn library_size_bar(path: &Path, sample_ids: &[String], raw: &Array1<f64>, normalized: &Array1<f64>) -> Result<()> {
    if sample_ids.is_empty() {
        return Err(no_data("library_size", "samples"));
    }
    if raw.len() != sample_ids.len() || normalized.len() != sample_ids.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} library sizes", sample_ids.len()),
            got: format!("{} raw, {} normalized", raw.len(), normalized.len()),
        });
    }
    finish("library_size", path, draw(path, sample_ids, raw, normalized))
}

fn draw(path: &Path, sample_ids: &[String], raw: &Array1<f64>, normalized: &Array1<f64>) -> DrawResult {
    let root = SVGBackend::new(path, (1000, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 1));
    draw_panel(&panels[0], "Raw library size", sample_ids, raw, DOWN)?;
    draw_panel(&panels[1], "Normalized library size", sample_ids, normalized, UP)?;
    root.present()?;
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    caption: &str,
    sample_ids: &[String],
    values: &Array1<f64>,
    color: RGBColor,
) -> DrawResult {
    let n = sample_ids.len() as i32;
    let max = values.iter().copied().filter(|v| v.is_finite()).fold(0.0, f64::max);
    let mut chart = ChartBuilder::on(area)
        .caption(caption, (FONT, 22))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(90)
        .build_cartesian_2d((0..n).into_segmented(), 0.0..(max * 1.1).max(1.0))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(sample_ids.len())
        .x_label_formatter(&|v| segment_label(sample_ids, v))
        .y_desc("Total counts")
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &v)| {
        let i = i as i32;
        let mut bar = Rectangle::new(
            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), v.max(0.0))],
            color.mix(0.85).filled(),
        );
        bar.set_margin(0, 0, 6, 6);
        bar
    }))?;
    Ok(())
}

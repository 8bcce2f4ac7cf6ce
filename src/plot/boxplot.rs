use std::path::Path;

use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;

use super::{category_color, finish, no_data, padded_range, segment_label, DrawResult, FONT};
use crate::stats::{quantile_sorted, sorted_finite};
use crate::transform::LogCounts;

/// Five-number summary of one sample; whiskers stop at 1.5 IQR
#[derive(Debug, Clone, Copy, PartialEq)]
struct BoxStats {
    lower: f64,
    q1: f64,
    median: f64,
    q3: f64,
    upper: f64,
}

fn box_stats(values: &[f64]) -> Option<BoxStats> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return None;
    }
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    let reach = 1.5 * (q3 - q1);
    let lower = sorted.iter().copied().find(|&v| v >= q1 - reach).unwrap_or(q1);
    let upper = sorted.iter().rev().copied().find(|&v| v <= q3 + reach).unwrap_or(q3);
    Some(BoxStats {
        lower,
        q1,
        median: quantile_sorted(&sorted, 0.5),
        q3,
        upper,
    })
}

/// Per-sample distribution of log2 counts, raw on the left and normalized on
/// the right. Boxes are coloured by `conditions`.
pub fn log_count_boxplot(path: &Path, logs: &LogCounts, conditions: &[String]) -> crate::error::Result<()> {
    if logs.sample_ids.is_empty() || logs.gene_ids.is_empty() {
        return Err(no_data("boxplot", "log counts"));
    }
    finish("boxplot", path, draw(path, logs, conditions))
}

fn draw(path: &Path, logs: &LogCounts, conditions: &[String]) -> DrawResult {
    let mut levels: Vec<&str> = conditions.iter().map(String::as_str).collect();
    levels.sort_unstable();
    levels.dedup();
    let colors: Vec<RGBColor> = (0..logs.sample_ids.len())
        .map(|s| {
            let level = conditions.get(s).map(String::as_str).unwrap_or("");
            category_color(levels.iter().position(|l| *l == level).unwrap_or(0))
        })
        .collect();

    let root = SVGBackend::new(path, (1400, 700)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));
    let label = format!("log2(count + {})", logs.pseudocount);
    draw_panel(&panels[0], "Raw counts", &label, &logs.sample_ids, &logs.raw, &colors)?;
    draw_panel(&panels[1], "Normalized counts", &label, &logs.sample_ids, &logs.normalized, &colors)?;
    root.present()?;
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    caption: &str,
    y_desc: &str,
    sample_ids: &[String],
    matrix: &Array2<f64>,
    colors: &[RGBColor],
) -> DrawResult {
    let stats: Vec<Option<BoxStats>> = matrix.columns().into_iter().map(|c| box_stats(&c.to_vec())).collect();
    let extremes: Vec<f64> = stats.iter().flatten().flat_map(|b| [b.lower, b.upper]).collect();
    let y_range = padded_range(&extremes).unwrap_or(0.0..1.0);
    let n = sample_ids.len() as i32;

    let mut chart = ChartBuilder::on(area)
        .caption(caption, (FONT, 22))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d((0..n).into_segmented(), y_range)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(sample_ids.len())
        .x_label_formatter(&|v| segment_label(sample_ids, v))
        .y_desc(y_desc)
        .draw()?;

    for (i, b) in stats.iter().enumerate() {
        let Some(b) = b else { continue };
        let i = i as i32;
        let color = colors.get(i as usize).copied().unwrap_or(BLACK);
        let centre = SegmentValue::CenterOf(i);
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(centre.clone(), b.lower), (centre, b.upper)],
            BLACK.stroke_width(1),
        )))?;
        let mut body = Rectangle::new(
            [(SegmentValue::Exact(i), b.q1), (SegmentValue::Exact(i + 1), b.q3)],
            color.mix(0.6).filled(),
        );
        body.set_margin(0, 0, 8, 8);
        chart.draw_series(std::iter::once(body))?;
        let mut outline = Rectangle::new(
            [(SegmentValue::Exact(i), b.q1), (SegmentValue::Exact(i + 1), b.q3)],
            BLACK.stroke_width(1),
        );
        outline.set_margin(0, 0, 8, 8);
        chart.draw_series(std::iter::once(outline))?;
        let mut median = Rectangle::new(
            [(SegmentValue::Exact(i), b.median), (SegmentValue::Exact(i + 1), b.median)],
            BLACK.stroke_width(2),
        );
        median.set_margin(0, 0, 8, 8);
        chart.draw_series(std::iter::once(median))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_box_stats_whiskers_stop_at_fence() {
        let b = box_stats(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(b.median, 3.0);
        assert_eq!((b.q1, b.q3), (2.0, 4.0));
        assert_eq!(b.lower, 1.0);
        assert_eq!(b.upper, 4.0);
        assert!(box_stats(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxplot.svg");
        let logs = LogCounts {
            raw: array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.5]],
            normalized: array![[1.5, 1.8], [3.2, 3.6], [5.1, 6.0]],
            gene_ids: vec!["g1".to_string(), "g2".to_string(), "g3".to_string()],
            sample_ids: vec!["WT_1".to_string(), "KO_1".to_string()],
            pseudocount: 1.0,
        };
        log_count_boxplot(&path, &logs, &["WT".to_string(), "KO".to_string()]).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<svg"));
    }
}

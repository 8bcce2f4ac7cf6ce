use std::path::Path;

use plotters::prelude::*;

use super::{diverging_color, finish, no_data, segment_label, DrawResult, FONT};
use crate::error::Result;
use crate::explore::SampleCorrelation;

/// Sample correlation matrix with rows and columns in dendrogram order
pub fn correlation_heatmap(path: &Path, corr: &SampleCorrelation) -> Result<()> {
    if corr.sample_ids.is_empty() {
        return Err(no_data("heatmap", "samples"));
    }
    finish("heatmap", path, draw(path, corr))
}

/// Colour scale bounds: the smallest off-diagonal correlation up to 1
fn value_range(corr: &SampleCorrelation) -> (f64, f64) {
    let lo = corr
        .correlation
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(1.0_f64, f64::min);
    if lo >= 1.0 {
        (0.0, 1.0)
    } else {
        (lo, 1.0)
    }
}

fn draw(path: &Path, corr: &SampleCorrelation) -> DrawResult {
    let order = &corr.dendrogram.order;
    let labels: Vec<String> = order.iter().map(|&i| corr.sample_ids[i].clone()).collect();
    let n = order.len() as i32;
    let (lo, hi) = value_range(corr);

    let side = (300 + 60 * order.len()).clamp(600, 1600) as u32;
    let root = SVGBackend::new(path, (side + 120, side)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Sample correlation (Pearson)", (FONT, 26))
        .margin(15)
        .x_label_area_size(80)
        .y_label_area_size(120)
        .build_cartesian_2d((0..n).into_segmented(), (0..n).into_segmented())?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(order.len())
        .y_labels(order.len())
        .x_label_formatter(&|v| segment_label(&labels, v))
        .y_label_formatter(&|v| segment_label(&labels, v))
        .draw()?;

    for (x, &i) in order.iter().enumerate() {
        for (y, &j) in order.iter().enumerate() {
            let value = corr.correlation[[i, j]];
            let (x, y) = (x as i32, y as i32);
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                diverging_color(value, lo, hi).filled(),
            )))?;
            if order.len() <= 16 {
                let text = if value.is_finite() { format!("{:.2}", value) } else { "NA".to_string() };
                chart.draw_series(std::iter::once(Text::new(
                    text,
                    (SegmentValue::CenterOf(x), SegmentValue::CenterOf(y)),
                    (FONT, 12).into_font(),
                )))?;
            }
        }
    }
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_writes_svg_in_cluster_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heatmap.svg");
        let m = array![
            [10.0, 11.0, 2.0, 2.5],
            [5.0, 5.5, 9.0, 8.5],
            [1.0, 1.2, 7.0, 7.4],
            [3.0, 2.9, 3.1, 3.0]
        ];
        let ids: Vec<String> = ["WT_1", "WT_2", "KO_1", "KO_2"].iter().map(|s| s.to_string()).collect();
        let corr = SampleCorrelation::compute(m.view(), &ids).unwrap();
        correlation_heatmap(&path, &corr).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("KO_2"));
        let (lo, hi) = value_range(&corr);
        assert!(lo < hi && hi == 1.0);
    }
}

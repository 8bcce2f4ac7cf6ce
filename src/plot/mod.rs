//! SVG figures for QC, differential expression and enrichment
//!
//! Every public function renders a single file with the plotters SVG
//! backend. Drawing errors are reported as [`PipelineError::PlotFailed`].

mod bar;
mod boxplot;
mod dot;
mod heatmap;
mod network;
mod scatter;

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

use plotters::coord::ranged1d::SegmentValue;
use plotters::style::RGBColor;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub use bar::library_size_bar;
pub use boxplot::log_count_boxplot;
pub use dot::enrichment_dotplot;
pub use heatmap::correlation_heatmap;
pub use network::enrichment_network;
pub use scatter::{ma_plot, pca_scatter, sample_scatter, volcano};

/// Result of a plotters drawing routine before it is tied to a plot name
type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

const FONT: &str = "sans-serif";

/// Plot kinds that can be switched on or off in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    LibrarySize,
    Boxplot,
    Pca,
    SampleScatter,
    Heatmap,
    Volcano,
    Ma,
    Dotplot,
    Network,
}

impl PlotKind {
    pub const ALL: [PlotKind; 9] = [
        PlotKind::LibrarySize,
        PlotKind::Boxplot,
        PlotKind::Pca,
        PlotKind::SampleScatter,
        PlotKind::Heatmap,
        PlotKind::Volcano,
        PlotKind::Ma,
        PlotKind::Dotplot,
        PlotKind::Network,
    ];

    /// Quality-control plots drawn before testing
    pub const QC: [PlotKind; 5] = [
        PlotKind::LibrarySize,
        PlotKind::Boxplot,
        PlotKind::Pca,
        PlotKind::SampleScatter,
        PlotKind::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlotKind::LibrarySize => "library_size",
            PlotKind::Boxplot => "boxplot",
            PlotKind::Pca => "pca",
            PlotKind::SampleScatter => "sample_scatter",
            PlotKind::Heatmap => "heatmap",
            PlotKind::Volcano => "volcano",
            PlotKind::Ma => "ma",
            PlotKind::Dotplot => "dotplot",
            PlotKind::Network => "network",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.svg", self.as_str())
    }
}

impl fmt::Display for PlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlotKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        PlotKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.to_lowercase())
            .ok_or_else(|| PipelineError::InvalidConfig {
                reason: format!(
                    "unknown plot kind '{}' (expected one of: {})",
                    s,
                    PlotKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
                ),
            })
    }
}

fn finish(plot: &str, path: &Path, result: DrawResult) -> Result<()> {
    result.map_err(|e| PipelineError::PlotFailed {
        plot: plot.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn no_data(plot: &str, what: &str) -> PipelineError {
    PipelineError::PlotFailed {
        plot: plot.to_string(),
        reason: format!("no {} to draw", what),
    }
}

/// Axis range over the finite values with 5% padding on each side
fn padded_range<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Option<Range<f64>> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    let span = if hi > lo { hi - lo } else { lo.abs().max(1.0) };
    Some((lo - 0.05 * span)..(hi + 0.05 * span))
}

const CATEGORY_COLORS: [RGBColor; 8] = [
    RGBColor(228, 26, 28),
    RGBColor(55, 126, 184),
    RGBColor(77, 175, 74),
    RGBColor(152, 78, 163),
    RGBColor(255, 127, 0),
    RGBColor(166, 86, 40),
    RGBColor(247, 129, 191),
    RGBColor(153, 153, 153),
];

fn category_color(i: usize) -> RGBColor {
    CATEGORY_COLORS[i % CATEGORY_COLORS.len()]
}

const GREY: RGBColor = RGBColor(190, 190, 190);
const UP: RGBColor = RGBColor(200, 30, 40);
const DOWN: RGBColor = RGBColor(40, 80, 200);

fn lerp(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Red for the smallest adjusted p-values, blue for the largest
fn padj_color(padj: f64, min_log: f64, max_log: f64) -> RGBColor {
    if !padj.is_finite() || max_log <= min_log {
        return UP;
    }
    let t = (padj.max(1e-300).log10() - min_log) / (max_log - min_log);
    lerp(UP, DOWN, t)
}

/// log10 range of the finite, positive adjusted p-values
fn padj_log_range<I: IntoIterator<Item = f64>>(padj: I) -> (f64, f64) {
    padj.into_iter()
        .filter(|p| p.is_finite())
        .map(|p| p.max(1e-300).log10())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Diverging blue-white-red scale for values in `[lo, hi]`
fn diverging_color(value: f64, lo: f64, hi: f64) -> RGBColor {
    const WHITE_ISH: RGBColor = RGBColor(250, 250, 250);
    if !value.is_finite() {
        return GREY;
    }
    if hi <= lo {
        return UP;
    }
    let mid = (lo + hi) / 2.0;
    if value >= mid {
        lerp(WHITE_ISH, UP, (value - mid) / (hi - mid))
    } else {
        lerp(DOWN, WHITE_ISH, (value - lo) / (mid - lo))
    }
}

/// Tick label of a segmented category axis
fn segment_label(labels: &[String], value: &SegmentValue<i32>) -> String {
    match value {
        SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => usize::try_from(*i)
            .ok()
            .and_then(|i| labels.get(i))
            .map(|l| truncate_label(l, 18))
            .unwrap_or_default(),
        SegmentValue::Last => String::new(),
    }
}

fn truncate_label(label: &str, max: usize) -> String {
    if label.chars().count() <= max {
        label.to_string()
    } else {
        let mut s: String = label.chars().take(max.saturating_sub(3)).collect();
        s.push_str("...");
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_kind_parse_and_file_name() {
        assert_eq!("volcano".parse::<PlotKind>().unwrap(), PlotKind::Volcano);
        assert_eq!("Sample_Scatter".parse::<PlotKind>().unwrap(), PlotKind::SampleScatter);
        assert_eq!(PlotKind::Ma.file_name(), "ma.svg");
        assert!("pie".parse::<PlotKind>().is_err());
        let json = serde_json::to_string(&PlotKind::LibrarySize).unwrap();
        assert_eq!(json, "\"library_size\"");
    }

    #[test]
    fn test_padded_range_skips_non_finite() {
        let r = padded_range(&[1.0, f64::NAN, 3.0, f64::INFINITY]).unwrap();
        assert!((r.start - 0.9).abs() < 1e-12 && (r.end - 3.1).abs() < 1e-12);
        let flat = padded_range(&[2.0, 2.0]).unwrap();
        assert!(flat.start < 2.0 && flat.end > 2.0);
        assert!(padded_range(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_color_scales_hit_endpoints() {
        assert_eq!(diverging_color(1.0, -1.0, 1.0), UP);
        assert_eq!(diverging_color(-1.0, -1.0, 1.0), DOWN);
        assert_eq!(padj_color(1e-10, -10.0, 0.0), UP);
        assert_eq!(padj_color(1.0, -10.0, 0.0), DOWN);
        assert_eq!(truncate_label("abcdefghij", 6), "abc...");
        let labels = vec!["WT_1".to_string(), "KO_1".to_string()];
        assert_eq!(segment_label(&labels, &SegmentValue::CenterOf(1)), "KO_1");
        assert_eq!(segment_label(&labels, &SegmentValue::Last), "");
        assert_eq!(segment_label(&labels, &SegmentValue::CenterOf(5)), "");
    }
}

use std::path::Path;

use plotters::prelude::*;

use super::{category_color, finish, no_data, padded_range, DrawResult, DOWN, FONT, GREY, UP};
use crate::error::{PipelineError, Result};
use crate::explore::PcaResult;
use crate::io::DeTable;
use crate::transform::LogCounts;

/// One coloured point cloud with a legend entry
struct PointGroup {
    label: String,
    color: RGBColor,
    radius: i32,
    points: Vec<(f64, f64)>,
}

/// Axis-aligned reference line in data coordinates
enum Guide {
    Horizontal(f64),
    Vertical(f64),
    Diagonal,
}

struct ScatterLayout<'a> {
    caption: &'a str,
    x_desc: &'a str,
    y_desc: &'a str,
    groups: Vec<PointGroup>,
    guides: Vec<Guide>,
    /// Text drawn next to points
    annotations: Vec<(String, (f64, f64))>,
}

fn draw_scatter(path: &Path, layout: ScatterLayout<'_>) -> DrawResult {
    let xs: Vec<f64> = layout.groups.iter().flat_map(|g| g.points.iter().map(|p| p.0)).collect();
    let ys: Vec<f64> = layout.groups.iter().flat_map(|g| g.points.iter().map(|p| p.1)).collect();
    let x_range = padded_range(&xs).unwrap_or(0.0..1.0);
    let y_range = padded_range(&ys).unwrap_or(0.0..1.0);

    let root = SVGBackend::new(path, (1000, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(layout.caption, (FONT, 26))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), y_range.clone())?;
    chart
        .configure_mesh()
        .x_desc(layout.x_desc)
        .y_desc(layout.y_desc)
        .draw()?;

    for guide in &layout.guides {
        let line = match *guide {
            Guide::Horizontal(y) => vec![(x_range.start, y), (x_range.end, y)],
            Guide::Vertical(x) => vec![(x, y_range.start), (x, y_range.end)],
            Guide::Diagonal => {
                let lo = x_range.start.max(y_range.start);
                let hi = x_range.end.min(y_range.end);
                vec![(lo, lo), (hi, hi)]
            }
        };
        chart.draw_series(LineSeries::new(line, BLACK.mix(0.5).stroke_width(1)))?;
    }

    for group in &layout.groups {
        let color = group.color;
        let radius = group.radius;
        chart
            .draw_series(
                group
                    .points
                    .iter()
                    .map(move |&p| Circle::new(p, radius, color.mix(0.75).filled())),
            )?
            .label(format!("{} (n={})", group.label, group.points.len()))
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    chart.draw_series(
        layout.annotations
            .iter()
            .map(|(text, (x, y))| Text::new(text.clone(), (*x, *y), (FONT, 13).into_font())),
    )?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// PC1 against PC2, one colour per condition, samples labelled
pub fn pca_scatter(path: &Path, pca: &PcaResult, conditions: &[String]) -> Result<()> {
    if pca.n_components() == 0 {
        return Err(no_data("pca", "principal components"));
    }
    if conditions.len() != pca.sample_ids.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} conditions", pca.sample_ids.len()),
            got: format!("{} conditions", conditions.len()),
        });
    }
    let pc1 = pca.scores.column(0).to_vec();
    let pc2 = pca
        .component(1)
        .unwrap_or_else(|| vec![0.0; pca.sample_ids.len()]);
    let percent = |k: usize| pca.percent_variance.get(k).copied().unwrap_or(0.0);

    let mut levels: Vec<&String> = conditions.iter().collect();
    levels.sort();
    levels.dedup();
    let groups = levels
        .iter()
        .enumerate()
        .map(|(i, level)| PointGroup {
            label: level.to_string(),
            color: category_color(i),
            radius: 7,
            points: (0..conditions.len())
                .filter(|&s| &conditions[s] == *level)
                .map(|s| (pc1[s], pc2[s]))
                .collect(),
        })
        .collect();
    let annotations = pca
        .sample_ids
        .iter()
        .enumerate()
        .map(|(s, id)| (id.clone(), (pc1[s], pc2[s])))
        .collect();

    let x_desc = format!("PC1 ({:.1}% variance)", percent(0));
    let y_desc = format!("PC2 ({:.1}% variance)", percent(1));
    let caption = format!("PCA of the top {} variable genes", pca.genes_used.len());
    let layout = ScatterLayout {
        caption: &caption,
        x_desc: &x_desc,
        y_desc: &y_desc,
        groups,
        guides: vec![Guide::Horizontal(0.0), Guide::Vertical(0.0)],
        annotations,
    };
    finish("pca", path, draw_scatter(path, layout))
}

/// Normalized log2 counts of sample `a` against sample `b`
pub fn sample_scatter(path: &Path, logs: &LogCounts, a: usize, b: usize) -> Result<()> {
    let n = logs.sample_ids.len();
    if a >= n || b >= n {
        return Err(PipelineError::InvalidInput {
            reason: format!("sample index out of range ({}, {}) for {} samples", a, b, n),
        });
    }
    if logs.gene_ids.is_empty() {
        return Err(no_data("sample_scatter", "genes"));
    }
    let points = logs
        .normalized
        .column(a)
        .iter()
        .zip(logs.normalized.column(b).iter())
        .map(|(&x, &y)| (x, y))
        .collect();
    let x_desc = format!("{} log2 normalized count", logs.sample_ids[a]);
    let y_desc = format!("{} log2 normalized count", logs.sample_ids[b]);
    let caption = format!("{} vs {}", logs.sample_ids[a], logs.sample_ids[b]);
    let layout = ScatterLayout {
        caption: &caption,
        x_desc: &x_desc,
        y_desc: &y_desc,
        groups: vec![PointGroup {
            label: "genes".to_string(),
            color: DOWN,
            radius: 2,
            points,
        }],
        guides: vec![Guide::Diagonal],
        annotations: Vec::new(),
    };
    finish("sample_scatter", path, draw_scatter(path, layout))
}

/// Split records into up, down and not significant clouds
fn significance_groups<F>(table: &DeTable, alpha: f64, point: F) -> Vec<PointGroup>
where
    F: Fn(&crate::io::DeRecord) -> Option<(f64, f64)>,
{
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut rest = Vec::new();
    for record in table.records() {
        let Some(p) = point(record) else { continue };
        if !(p.0.is_finite() && p.1.is_finite()) {
            continue;
        }
        if record.is_significant(alpha) && record.log2_fold_change > 0.0 {
            up.push(p);
        } else if record.is_significant(alpha) && record.log2_fold_change < 0.0 {
            down.push(p);
        } else {
            rest.push(p);
        }
    }
    vec![
        PointGroup {
            label: "not significant".to_string(),
            color: GREY,
            radius: 2,
            points: rest,
        },
        PointGroup {
            label: "up".to_string(),
            color: UP,
            radius: 3,
            points: up,
        },
        PointGroup {
            label: "down".to_string(),
            color: DOWN,
            radius: 3,
            points: down,
        },
    ]
}

/// log2 fold change against -log10 p-value
pub fn volcano(path: &Path, table: &DeTable, alpha: f64) -> Result<()> {
    let groups = significance_groups(table, alpha, |r| {
        r.pvalue.is_finite().then(|| (r.log2_fold_change, -r.pvalue.max(1e-300).log10()))
    });
    if groups.iter().all(|g| g.points.is_empty()) {
        return Err(no_data("volcano", "tested genes"));
    }
    let (num, den) = table.contrast();
    let caption = format!("{} vs {}", num, den);
    let layout = ScatterLayout {
        caption: &caption,
        x_desc: "log2 fold change",
        y_desc: "-log10 p-value",
        groups,
        guides: vec![Guide::Vertical(0.0)],
        annotations: Vec::new(),
    };
    finish("volcano", path, draw_scatter(path, layout))
}

/// log10 mean of normalized counts against log2 fold change
pub fn ma_plot(path: &Path, table: &DeTable, alpha: f64) -> Result<()> {
    let groups = significance_groups(table, alpha, |r| {
        (r.base_mean > 0.0).then(|| (r.base_mean.log10(), r.log2_fold_change))
    });
    if groups.iter().all(|g| g.points.is_empty()) {
        return Err(no_data("ma", "tested genes"));
    }
    let (num, den) = table.contrast();
    let caption = format!("MA plot: {} vs {}", num, den);
    let layout = ScatterLayout {
        caption: &caption,
        x_desc: "log10 mean of normalized counts",
        y_desc: "log2 fold change",
        groups,
        guides: vec![Guide::Horizontal(0.0)],
        annotations: Vec::new(),
    };
    finish("ma", path, draw_scatter(path, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DeRecord;
    use ndarray::array;

    fn record(gene: &str, lfc: f64, p: f64, padj: f64) -> DeRecord {
        DeRecord {
            gene_id: gene.to_string(),
            base_mean: 100.0,
            log2_fold_change: lfc,
            lfc_mle: lfc,
            lfc_se: 0.3,
            stat: lfc / 0.3,
            pvalue: p,
            padj,
            dispersion: 0.05,
            cooks_outlier: false,
            filtered: false,
        }
    }

    fn table() -> DeTable {
        DeTable::new(
            "KO",
            "WT",
            vec![
                record("g1", 2.0, 1e-8, 1e-7),
                record("g2", -1.5, 1e-4, 1e-3),
                record("g3", 0.1, 0.6, 0.8),
                record("g4", f64::NAN, f64::NAN, f64::NAN),
            ],
            0.0,
        )
    }

    #[test]
    fn test_significance_groups() {
        let groups = significance_groups(&table(), 0.05, |r| Some((r.log2_fold_change, r.pvalue)));
        let sizes: Vec<usize> = groups.iter().map(|g| g.points.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_volcano_and_ma_write_svg() {
        let dir = tempfile::tempdir().unwrap();
        volcano(&dir.path().join("volcano.svg"), &table(), 0.05).unwrap();
        ma_plot(&dir.path().join("ma.svg"), &table(), 0.05).unwrap();
        assert!(dir.path().join("volcano.svg").exists());
        assert!(dir.path().join("ma.svg").exists());
    }

    #[test]
    fn test_pca_and_sample_scatter() {
        let dir = tempfile::tempdir().unwrap();
        let pca = PcaResult {
            sample_ids: vec!["WT_1".to_string(), "WT_2".to_string(), "KO_1".to_string()],
            scores: array![[-2.0, 0.5], [-1.5, -0.4], [3.5, -0.1]],
            variances: array![7.0, 0.2],
            percent_variance: array![97.2, 2.8],
            genes_used: vec![0, 1, 2],
        };
        let conditions = vec!["WT".to_string(), "WT".to_string(), "KO".to_string()];
        pca_scatter(&dir.path().join("pca.svg"), &pca, &conditions).unwrap();
        let svg = std::fs::read_to_string(dir.path().join("pca.svg")).unwrap();
        assert!(svg.contains("KO_1"));
        assert!(pca_scatter(&dir.path().join("bad.svg"), &pca, &conditions[..2]).is_err());

        let logs = LogCounts {
            raw: array![[1.0, 2.0], [3.0, 4.0]],
            normalized: array![[1.0, 1.2], [3.0, 3.1]],
            gene_ids: vec!["g1".to_string(), "g2".to_string()],
            sample_ids: vec!["WT_1".to_string(), "WT_2".to_string()],
            pseudocount: 1.0,
        };
        sample_scatter(&dir.path().join("scatter.svg"), &logs, 0, 1).unwrap();
        assert!(sample_scatter(&dir.path().join("scatter.svg"), &logs, 0, 2).is_err());
    }
}

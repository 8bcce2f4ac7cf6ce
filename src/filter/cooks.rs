//! Cook's distance outlier detection
//!
//! `cooks = PearsonResSq / p * h / (1 - h)^2`, with Pearson residuals taken
//! against a robust method-of-moments dispersion so a single outlying
//! count cannot mask itself.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::glm::{Design, GlmFit};
use crate::stats::trimmed_mean;

/// Replicates a cell needs before its samples are checked
pub const MIN_REPLICATES_FOR_COOKS: usize = 3;

/// Floor on the robust dispersion
const MIN_ROBUST_DISP: f64 = 0.04;

/// Trim ratio and squared-error scale by cell size: up to 3, up to 23,
/// larger
fn trim_rule(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

/// Largest trimmed within-cell variance of one gene over the given cells
fn trimmed_cell_variance(row: &[f64], cells: &[Vec<usize>]) -> f64 {
    cells
        .iter()
        .map(|members| {
            let (trim, scale) = trim_rule(members.len());
            let values: Vec<f64> = members.iter().map(|&i| row[i]).collect();
            let center = trimmed_mean(&values, trim);
            let sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
            scale * trimmed_mean(&sq, trim)
        })
        .fold(f64::NEG_INFINITY, f64::max)
}

fn trimmed_variance(row: &[f64]) -> f64 {
    let center = trimmed_mean(row, 1.0 / 8.0);
    let sq: Vec<f64> = row.iter().map(|v| (v - center).powi(2)).collect();
    1.51 * trimmed_mean(&sq, 1.0 / 8.0)
}

/// Samples grouped by design cell, keeping cells with at least `min` members
fn cells_with_replicates(design: &Design, min: usize) -> Vec<Vec<usize>> {
    let Some(groups) = design.groups() else {
        return Vec::new();
    };
    let n_groups = groups.iter().max().map_or(0, |m| m + 1);
    let mut cells = vec![Vec::new(); n_groups];
    for (i, &g) in groups.iter().enumerate() {
        cells[g].push(i);
    }
    cells.retain(|c| c.len() >= min);
    cells
}

/// Whether any design cell has enough replicates for outlier calls
pub fn has_cooks_replicates(design: &Design) -> bool {
    !cells_with_replicates(design, MIN_REPLICATES_FOR_COOKS).is_empty()
}

/// Robust method-of-moments dispersion from normalized counts,
/// `max((v - m) / m^2, 0.04)`
pub fn robust_dispersions(normalized: ArrayView2<f64>, design: &Design) -> Vec<f64> {
    let cells = cells_with_replicates(design, MIN_REPLICATES_FOR_COOKS);
    normalized
        .rows()
        .into_iter()
        .map(|row| {
            let row = row.to_vec();
            let v = if cells.is_empty() {
                trimmed_variance(&row)
            } else {
                trimmed_cell_variance(&row, &cells)
            };
            let m = row.iter().sum::<f64>() / row.len() as f64;
            let alpha = (v - m) / (m * m);
            if alpha.is_finite() {
                alpha.max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Cook's distance of every gene and sample from a fit's means and hat
/// diagonals
pub fn cooks_distances(
    counts: ArrayView2<f64>,
    normalized: ArrayView2<f64>,
    fit: &GlmFit,
    design: &Design,
) -> Array2<f64> {
    let (n_genes, n_samples) = counts.dim();
    let p = design.n_coefs() as f64;
    let dispersions = robust_dispersions(normalized, design);

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            (0..n_samples)
                .map(|i| {
                    let mu = fit.mu[[g, i]];
                    let h = fit.hat_diagonals[[g, i]];
                    let variance = mu + dispersions[g] * mu * mu;
                    if variance <= 0.0 || h >= 1.0 {
                        return 0.0;
                    }
                    let pearson_sq = (counts[[g, i]] - mu).powi(2) / variance;
                    pearson_sq / p * h / (1.0 - h).powi(2)
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((n_genes, n_samples));
    for (g, row) in rows.into_iter().enumerate() {
        for (i, v) in row.into_iter().enumerate() {
            cooks[[g, i]] = v;
        }
    }
    cooks
}

/// 99% quantile of F(p, m - p)
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64)
        .map(|f| f.inverse_cdf(0.99))
        .unwrap_or(f64::INFINITY)
}

/// Outlier call per gene.
///
/// A gene is an outlier when the Cook's distance of a sample in a cell
/// with at least three replicates exceeds `cutoff`. In designs with two
/// levels a flagged gene is spared when three or more samples have a
/// count above the count at its largest Cook's distance.
pub fn cooks_outliers(counts: ArrayView2<f64>, cooks: &Array2<f64>, design: &Design, cutoff: f64) -> Vec<bool> {
    let checked: Vec<usize> = {
        let mut idx: Vec<usize> = cells_with_replicates(design, MIN_REPLICATES_FOR_COOKS)
            .into_iter()
            .flatten()
            .collect();
        idx.sort_unstable();
        idx
    };
    if checked.is_empty() {
        return vec![false; counts.nrows()];
    }
    let two_levels = design.group_sizes().map_or(false, |s| s.len() == 2);

    (0..counts.nrows())
        .map(|g| {
            let max_checked = checked.iter().map(|&i| cooks[[g, i]]).fold(f64::NEG_INFINITY, f64::max);
            if max_checked <= cutoff {
                return false;
            }
            if two_levels {
                let worst = (0..counts.ncols())
                    .max_by(|&a, &b| cooks[[g, a]].partial_cmp(&cooks[[g, b]]).unwrap_or(std::cmp::Ordering::Equal))
                    .unwrap_or(0);
                let outlying_count = counts[[g, worst]];
                let above = counts.row(g).iter().filter(|&&c| c > outlying_count).count();
                if above >= 3 {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleTable;
    use crate::glm::{fit_all_genes, GlmFitParams, DEFAULT_LAMBDA_LOG2};
    use ndarray::{array, Array1};

    fn design(per_group: usize) -> Design {
        let mut names = Vec::new();
        for g in ["A", "B"] {
            for r in 1..=per_group {
                names.push(format!("{}_{}", g, r));
            }
        }
        Design::for_contrast(&SampleTable::from_sample_names(&names).unwrap(), "B", "A").unwrap()
    }

    #[test]
    fn test_cutoff_matches_f_quantile() {
        // qf(0.99, 2, 4)
        assert!((default_cooks_cutoff(6, 2) - 18.0).abs() < 1e-3);
        assert!(default_cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_robust_dispersion_floor_and_spread() {
        let norm = array![
            [100.0, 100.0, 100.0, 100.0, 100.0, 100.0],
            [10.0, 80.0, 30.0, 200.0, 20.0, 90.0]
        ];
        let disp = robust_dispersions(norm.view(), &design(3));
        assert_eq!(disp[0], MIN_ROBUST_DISP);
        assert!(disp[1] > MIN_ROBUST_DISP);
    }

    #[test]
    fn test_single_spike_is_flagged() {
        let d = design(4);
        let counts = array![
            [100.0, 104.0, 98.0, 1500.0, 101.0, 97.0, 103.0, 99.0],
            [100.0, 104.0, 98.0, 102.0, 101.0, 97.0, 103.0, 99.0]
        ];
        let sf = Array1::ones(8);
        let fit = fit_all_genes(
            counts.view(),
            &sf,
            d.matrix(),
            &array![0.05, 0.05],
            &[DEFAULT_LAMBDA_LOG2; 2],
            &GlmFitParams::default(),
        )
        .unwrap();
        let cooks = cooks_distances(counts.view(), counts.view(), &fit, &d);
        let cutoff = default_cooks_cutoff(8, 2);
        let flags = cooks_outliers(counts.view(), &cooks, &d, cutoff);
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_no_check_without_three_replicates() {
        let d = design(2);
        assert!(!has_cooks_replicates(&d));
        let counts = array![[1.0, 500.0, 2.0, 3.0]];
        let cooks = Array2::from_elem((1, 4), 1e6);
        assert_eq!(cooks_outliers(counts.view(), &cooks, &d, 1.0), vec![false]);
    }

    #[test]
    fn test_two_level_spare_rule() {
        let d = design(3);
        // largest distance at sample 0; three samples exceed its count in gene 0
        let counts = array![[5.0, 1.0, 2.0, 50.0, 60.0, 70.0], [5.0, 1.0, 2.0, 3.0, 4.0, 4.0]];
        let mut cooks = Array2::zeros((2, 6));
        cooks[[0, 0]] = 100.0;
        cooks[[1, 0]] = 100.0;
        let flags = cooks_outliers(counts.view(), &cooks, &d, 10.0);
        assert_eq!(flags, vec![false, true]);
    }
}

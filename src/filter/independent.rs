//! Independent filtering on mean expression
//!
//! Genes with low base mean have little power. Removing them before the BH
//! adjustment raises the number of discoveries; the threshold is chosen
//! from the rejection curve over a grid of base-mean quantiles.

use crate::stats::{lowess, quantile_sorted, sorted_finite};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Adjusted p-values after filtering plus the chosen threshold
#[derive(Debug, Clone)]
pub struct FilteringResult {
    pub padj: Vec<f64>,
    /// Base-mean cutoff; genes below it were not adjusted
    pub threshold: f64,
    /// Quantile of base means the cutoff sits at
    pub theta: f64,
    pub thetas: Vec<f64>,
    pub rejections: Vec<usize>,
    /// Genes that fell below the threshold
    pub filtered: Vec<bool>,
}

/// BH after removing genes below a base-mean quantile.
///
/// `pvalues` must already hold NaN for genes that are not tested (for
/// example Cook's outliers): they neither receive an adjusted value nor
/// count in the denominator.
pub fn independent_filtering(base_means: &[f64], pvalues: &[f64], alpha: f64) -> FilteringResult {
    let n = base_means.len();
    let lower = if n == 0 {
        0.0
    } else {
        base_means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64
    };
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();

    let sorted = sorted_finite(base_means);
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_sorted(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let masked: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&masked)
        })
        .collect();
    let rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count())
        .collect();

    let j = choose_threshold(&thetas, &rejections);
    log::debug!(
        "independent filtering: theta={:.3}, cutoff={:.4}, rejections={}",
        thetas[j],
        cutoffs[j],
        rejections[j]
    );

    let threshold = cutoffs[j];
    let filtered = base_means
        .iter()
        .map(|&m| m.is_nan() || m < threshold || m == 0.0)
        .collect();
    let mut padj = adjusted[j].clone();
    for (p, &m) in padj.iter_mut().zip(base_means) {
        if m == 0.0 {
            *p = f64::NAN;
        }
    }
    FilteringResult {
        padj,
        threshold,
        theta: thetas[j],
        thetas,
        rejections,
        filtered,
    }
}

/// First grid point whose rejections beat the smoothed maximum minus the
/// residual RMSE, relaxing to 90% and then 80% of the maximum
fn choose_threshold(thetas: &[f64], rejections: &[usize]) -> usize {
    let max_rej = rejections.iter().copied().max().unwrap_or(0);
    if max_rej <= 10 {
        return 0;
    }
    let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, 0.2, 3);
    let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let residuals: Vec<f64> = y
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(r, f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&thresh| y.iter().position(|&r| r > thresh))
        .unwrap_or(0)
}

/// Plain BH with no filtering; zero-mean genes stay undefined
pub fn unfiltered_adjustment(base_means: &[f64], pvalues: &[f64]) -> FilteringResult {
    let masked: Vec<f64> = pvalues
        .iter()
        .zip(base_means)
        .map(|(&p, &m)| if m > 0.0 { p } else { f64::NAN })
        .collect();
    FilteringResult {
        padj: benjamini_hochberg(&masked),
        threshold: 0.0,
        theta: 0.0,
        thetas: Vec::new(),
        rejections: Vec::new(),
        filtered: base_means.iter().map(|&m| m == 0.0).collect(),
    }
}

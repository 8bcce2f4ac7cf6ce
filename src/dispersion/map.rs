//! Empirical Bayes shrinkage of gene-wise dispersions towards the trend
//!
//! The prior on log dispersion is normal, centred on the log trend, with a
//! variance read off the spread of the gene-wise residuals. Genes far above
//! the trend keep their gene-wise value.

use ndarray::{Array2, ArrayView1};

use super::likelihood::{grid_search, line_search, LogNormalPrior};
use super::DispersionParams;
use crate::rng::SeededRng;
use crate::stats::{cmp_f64, interpolate, lowess, mad, trigamma};

/// Floor of the prior variance on log dispersion
pub const MIN_PRIOR_VARIANCE: f64 = 0.25;

/// Residual degrees of freedom at or below which the prior variance comes
/// from matching a simulated residual distribution
const SIMULATION_MAX_DF: usize = 3;

const KL_SEED: u32 = 2;
const KL_DRAWS: usize = 10_000;
const KL_GRID: usize = 200;
const KL_FINE_GRID: usize = 1000;
const KL_MAX_VARIANCE: f64 = 8.0;

/// Prior variance and the raw residual variance it was derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorVariance {
    pub prior_variance: f64,
    pub var_log_disp_ests: f64,
}

/// Log residuals of gene-wise estimates against the trend, restricted to
/// estimates at least `100 * min_disp`
fn log_residuals(gene_wise: &[f64], trended: &[f64], min_disp: f64) -> Vec<f64> {
    gene_wise
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && g >= 100.0 * min_disp && t.is_finite() && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect()
}

/// Estimate the prior variance of log dispersions around the trend
pub fn estimate_prior_variance(
    gene_wise: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> PriorVariance {
    let residuals = log_residuals(gene_wise, trended, min_disp);
    if residuals.is_empty() {
        return PriorVariance {
            prior_variance: MIN_PRIOR_VARIANCE,
            var_log_disp_ests: MIN_PRIOR_VARIANCE,
        };
    }
    let var_log_disp_ests = mad(&residuals).powi(2);
    let df = n_samples.saturating_sub(n_coefs);

    let prior_variance = if df == 0 {
        MIN_PRIOR_VARIANCE
    } else if df <= SIMULATION_MAX_DF {
        simulated_prior_variance(&residuals, df as f64)
    } else {
        (var_log_disp_ests - trigamma(df as f64 / 2.0)).max(MIN_PRIOR_VARIANCE)
    };

    log::debug!(
        "dispersion prior: df={}, varLogDispEsts={:.4}, prior variance={:.4}",
        df,
        var_log_disp_ests,
        prior_variance
    );
    PriorVariance {
        prior_variance,
        var_log_disp_ests,
    }
}

fn histogram_density(values: &[f64], breaks: &[f64]) -> Vec<f64> {
    let lo = breaks[0];
    let width = breaks[1] - breaks[0];
    let n_bins = breaks.len() - 1;
    let mut counts = vec![0.0; n_bins];
    let mut total = 0.0;
    for &v in values {
        if v > lo && v < breaks[n_bins] {
            let bin = (((v - lo) / width) as usize).min(n_bins - 1);
            counts[bin] += 1.0;
            total += 1.0;
        }
    }
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total * width);
    }
    counts
}

/// With few residual degrees of freedom the sampling distribution of the
/// log residual is far from normal. Simulate it for a grid of prior
/// variances and pick the one closest in KL divergence to the observed
/// histogram.
fn simulated_prior_variance(residuals: &[f64], df: f64) -> f64 {
    let breaks: Vec<f64> = (-20..=20).map(|i| i as f64 / 2.0).collect();
    let observed = histogram_density(residuals, &breaks);
    if observed.iter().all(|&d| d == 0.0) {
        return MIN_PRIOR_VARIANCE;
    }

    let mut rng = SeededRng::new(KL_SEED);
    let grid: Vec<f64> = (0..KL_GRID)
        .map(|i| i as f64 * KL_MAX_VARIANCE / (KL_GRID - 1) as f64)
        .collect();

    let kl: Vec<f64> = grid
        .iter()
        .map(|&variance| {
            let sd = variance.sqrt();
            let draws: Vec<f64> = (0..KL_DRAWS)
                .map(|_| rng.chi_squared(df).ln() + rng.normal() * sd - df.ln())
                .collect();
            let simulated = histogram_density(&draws, &breaks);
            let small = observed
                .iter()
                .chain(&simulated)
                .copied()
                .filter(|&d| d > 0.0)
                .fold(f64::INFINITY, f64::min);
            observed
                .iter()
                .zip(&simulated)
                .filter(|(&o, _)| o > 0.0)
                .map(|(&o, &s)| o * ((o + small).ln() - (s + small).ln()))
                .sum()
        })
        .collect();

    let smoothed = lowess(&grid, &kl, 0.2, 0);
    let best = (0..KL_FINE_GRID)
        .map(|i| i as f64 * KL_MAX_VARIANCE / (KL_FINE_GRID - 1) as f64)
        .map(|x| (x, interpolate(&grid, &smoothed, x)))
        .min_by(|a, b| cmp_f64(&a.1, &b.1))
        .map_or(MIN_PRIOR_VARIANCE, |(x, _)| x);

    log::debug!("simulated prior variance: df={}, argmin KL={:.4}", df, best);
    best.max(MIN_PRIOR_VARIANCE)
}

/// MAP dispersion of a single gene. All-zero genes (NaN gene-wise
/// estimate) stay NaN.
pub fn map_gene_dispersion(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    mu: &[f64],
    gene_wise: f64,
    trended: f64,
    prior_variance: f64,
    params: &DispersionParams,
) -> (f64, bool) {
    if gene_wise.is_nan() || !trended.is_finite() || trended <= 0.0 {
        return (gene_wise, true);
    }
    let max_disp = params.max_disp(y.len());
    let prior = LogNormalPrior {
        log_mean: trended.ln(),
        variance: prior_variance,
    };
    let start = if gene_wise > 0.1 * trended { gene_wise } else { trended };

    let y_vec = y.to_vec();
    let fit = line_search(&y_vec, design, mu, start, max_disp, Some(&prior), params);
    let mut alpha = fit.log_alpha.exp();
    let converged = fit.iterations < params.maxit;
    if !converged && alpha > 10.0 * params.min_disp {
        alpha = grid_search(&y_vec, design, mu, params.min_disp, max_disp, Some(&prior));
    }
    (alpha.clamp(params.min_disp, max_disp), converged)
}

/// Flag genes whose log gene-wise estimate sits more than
/// `outlier_sd * sqrt(var_log_disp_ests)` above the log trend
pub fn dispersion_outliers(
    gene_wise: &[f64],
    trended: &[f64],
    var_log_disp_ests: f64,
    outlier_sd: f64,
) -> Vec<bool> {
    let threshold = outlier_sd * var_log_disp_ests.sqrt();
    gene_wise
        .iter()
        .zip(trended)
        .map(|(&g, &t)| g.is_finite() && g > 0.0 && t > 0.0 && g.ln() > t.ln() + threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_prior_variance_subtracts_sampling_variance() {
        let trended = vec![0.1; 400];
        let gene_wise: Vec<f64> = (0..400).map(|i| 0.1 * ((i as f64 / 399.0 - 0.5) * 6.0).exp()).collect();
        let prior = estimate_prior_variance(&gene_wise, &trended, 12, 2, 1e-8);
        let expected = (prior.var_log_disp_ests - trigamma(5.0)).max(MIN_PRIOR_VARIANCE);
        assert!((prior.prior_variance - expected).abs() < 1e-12);
        assert!(prior.var_log_disp_ests > 1.0);
    }

    #[test]
    fn test_prior_variance_floor() {
        let trended = vec![0.1; 50];
        let gene_wise = vec![0.1; 50];
        let prior = estimate_prior_variance(&gene_wise, &trended, 20, 2, 1e-8);
        assert_eq!(prior.prior_variance, MIN_PRIOR_VARIANCE);
        assert_eq!(prior.var_log_disp_ests, 0.0);
    }

    #[test]
    fn test_small_df_uses_simulation() {
        let mut rng = SeededRng::new(11);
        let trended = vec![0.1; 300];
        // residuals drawn from the df=4 sampling distribution with prior variance 1
        let gene_wise: Vec<f64> = (0..300)
            .map(|_| 0.1 * (rng.chi_squared(2.0).ln() + rng.normal() - 2f64.ln()).exp())
            .collect();
        let prior = estimate_prior_variance(&gene_wise, &trended, 4, 2, 1e-8);
        assert!(prior.prior_variance >= MIN_PRIOR_VARIANCE);
        assert!(prior.prior_variance < 3.0, "prior variance {}", prior.prior_variance);
    }

    #[test]
    fn test_map_lies_between_gene_wise_and_trend() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let y = array![12.0, 30.0, 18.0, 60.0, 41.0, 85.0];
        let mu = [20.0, 20.0, 20.0, 62.0, 62.0, 62.0];
        let params = DispersionParams::default();
        let gene_fit = line_search(&y.to_vec(), &design, &mu, 0.1, 10.0, None, &params);
        let gene_wise = gene_fit.log_alpha.exp();
        let trended = gene_wise / 5.0;
        let (map, _) = map_gene_dispersion(y.view(), &design, &mu, gene_wise, trended, 0.5, &params);
        assert!(map < gene_wise && map > trended, "{} {} {}", trended, map, gene_wise);
    }

    #[test]
    fn test_outliers_only_above_trend() {
        let flags = dispersion_outliers(&[1.0, 0.1, 0.001, f64::NAN], &[0.1, 0.1, 0.1, 0.1], 0.25, 2.0);
        assert_eq!(flags, vec![true, false, false, false]);
    }
}

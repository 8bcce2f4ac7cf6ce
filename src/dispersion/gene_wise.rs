//! Gene-wise maximum likelihood dispersion estimates

use ndarray::{Array1, Array2, ArrayView1};

use super::likelihood::{grid_search, line_search};
use super::DispersionParams;
use crate::glm::negative_binomial::MIN_MU;
use crate::glm::{fit_gene, Design, GlmFitParams, DEFAULT_LAMBDA_LOG2};

/// Gene-wise estimate of one gene together with the fitted means it was
/// conditioned on
#[derive(Debug, Clone)]
pub struct GeneDispersion {
    pub alpha: f64,
    pub mu: Vec<f64>,
    pub converged: bool,
}

/// Per-cell means of normalized counts, scaled back by the size factors
fn group_means_mu(normalized: &[f64], size_factors: ArrayView1<f64>, groups: &[usize]) -> Vec<f64> {
    let n_groups = groups.iter().max().map_or(0, |m| m + 1);
    let mut sums = vec![0.0; n_groups];
    let mut sizes = vec![0usize; n_groups];
    for (&g, &v) in groups.iter().zip(normalized) {
        sums[g] += v;
        sizes[g] += 1;
    }
    groups
        .iter()
        .enumerate()
        .map(|(i, &g)| sums[g] / sizes[g] as f64 * size_factors[i])
        .collect()
}

/// Method-of-moments start from the residuals of a linear fit
fn rough_estimate(normalized: &[f64], groups: Option<&[usize]>, residual_df: usize) -> f64 {
    let fitted: Vec<f64> = match groups {
        Some(groups) => {
            let ones = Array1::ones(normalized.len());
            group_means_mu(normalized, ones.view(), groups)
        }
        None => {
            let mean = normalized.iter().sum::<f64>() / normalized.len() as f64;
            vec![mean; normalized.len()]
        }
    };
    let est: f64 = normalized
        .iter()
        .zip(&fitted)
        .map(|(&y, &m)| {
            let m = m.max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum::<f64>()
        / residual_df.max(1) as f64;
    est.max(0.0)
}

/// `(variance - xim * mean) / mean^2` over normalized counts
fn moments_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    let var = normalized.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}

/// Estimate the dispersion of one gene.
///
/// `xim` is the mean of the inverse size factors. All-zero genes return
/// NaN.
pub fn estimate_gene_dispersion(
    y: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Design,
    xim: f64,
    params: &DispersionParams,
) -> GeneDispersion {
    let n = y.len();
    if y.iter().all(|&c| c == 0.0) {
        return GeneDispersion {
            alpha: f64::NAN,
            mu: vec![0.0; n],
            converged: true,
        };
    }

    let max_disp = params.max_disp(n);
    let normalized: Vec<f64> = y.iter().zip(size_factors.iter()).map(|(c, s)| c / s).collect();

    let rough = rough_estimate(&normalized, design.groups(), design.residual_df());
    let moments = moments_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu: Vec<f64> = match design.groups() {
        Some(groups) => group_means_mu(&normalized, size_factors, groups)
            .into_iter()
            .map(|m| m.max(MIN_MU))
            .collect(),
        None => {
            let lambda = vec![DEFAULT_LAMBDA_LOG2; design.n_coefs()];
            fit_gene(y, size_factors, design.matrix(), alpha_init, &lambda, &GlmFitParams::default(), None).mu
        }
    };

    let y_vec = y.to_vec();
    let fit = line_search(&y_vec, design.matrix(), &mu, alpha_init, max_disp, None, params);

    let no_increase = fit.last_lp < fit.initial_lp + fit.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase { alpha_init } else { fit.log_alpha.exp() };

    let converged = fit.iterations < params.maxit && fit.iterations != 1;
    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(&y_vec, design.matrix(), &mu, params.min_disp, max_disp, None);
    }

    GeneDispersion {
        alpha: alpha.clamp(params.min_disp, max_disp),
        mu,
        converged,
    }
}

/// Stack per-gene fitted means into a genes × samples matrix
pub(super) fn mu_matrix(estimates: &[GeneDispersion], n_samples: usize) -> Array2<f64> {
    let mut mu = Array2::<f64>::zeros((estimates.len(), n_samples));
    for (g, est) in estimates.iter().enumerate() {
        for (i, &m) in est.mu.iter().enumerate() {
            mu[[g, i]] = m;
        }
    }
    mu
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleTable;
    use ndarray::array;

    fn design() -> Design {
        let names: Vec<String> = ["A_1", "A_2", "A_3", "B_1", "B_2", "B_3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Design::for_contrast(&SampleTable::from_sample_names(&names).unwrap(), "B", "A").unwrap()
    }

    #[test]
    fn test_overdispersed_gene_gets_positive_estimate() {
        let y = array![12.0, 30.0, 18.0, 60.0, 41.0, 85.0];
        let sf = Array1::ones(6);
        let est = estimate_gene_dispersion(y.view(), sf.view(), &design(), 1.0, &DispersionParams::default());
        assert!(est.alpha > 0.02 && est.alpha < 1.0, "alpha {}", est.alpha);
        assert_eq!(est.mu.len(), 6);
        assert!((est.mu[0] - 20.0).abs() < 1e-9);
        assert!((est.mu[3] - 62.0).abs() < 1e-9);
    }

    #[test]
    fn test_poisson_like_gene_hits_lower_region() {
        let y = array![100.0, 100.0, 100.0, 200.0, 200.0, 200.0];
        let sf = Array1::ones(6);
        let est = estimate_gene_dispersion(y.view(), sf.view(), &design(), 1.0, &DispersionParams::default());
        assert!(est.alpha < 1e-3, "alpha {}", est.alpha);
        assert!(est.alpha >= 1e-8);
    }

    #[test]
    fn test_all_zero_gene_is_nan() {
        let y = Array1::zeros(6);
        let sf = Array1::ones(6);
        let est = estimate_gene_dispersion(y.view(), sf.view(), &design(), 1.0, &DispersionParams::default());
        assert!(est.alpha.is_nan());
    }

    #[test]
    fn test_moments_and_rough_estimates() {
        let norm = [10.0, 20.0, 30.0];
        // var 100, mean 20 -> (100 - 20) / 400
        assert!((moments_estimate(&norm, 1.0) - 0.2).abs() < 1e-12);
        let rough = rough_estimate(&norm, Some(&[0, 0, 0]), 2);
        // ((100 - 20) * 2 + (0 - 20)) / 400 / 2
        assert!((rough - 0.175).abs() < 1e-12);
    }
}

//! Normal prior LFC shrinkage
//!
//! 1. Estimate a prior variance per coefficient by matching a weighted
//!    upper quantile of the MLE log2 fold changes.
//! 2. Re-fit the GLM with ridge penalty `1 / prior variance` on the log2
//!    scale (the intercept keeps a flat prior).
//! 3. The shrunken fit supplies the reported fold change and its SE; the
//!    Wald statistic still comes from the MLE fit.

use ndarray::Array1;

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::{fit_all_genes, GlmFit, GlmFitParams, DEFAULT_LAMBDA_LOG2};
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Upper quantile matched by the prior
pub const DEFAULT_UPPER_QUANTILE: f64 = 0.05;

/// Prior variance given to coefficients with nothing to learn from
const WIDE_PRIOR_VARIANCE: f64 = 1e6;

/// Prior variance of every coefficient on the log2 scale. The intercept
/// (column 0) always gets a wide prior.
///
/// Weights are `1 / (1/baseMean + trended dispersion)`; genes with zero
/// base mean and |log2 beta| ≥ 10 take no part.
pub fn beta_prior_variance(
    mle: &GlmFit,
    base_means: &Array1<f64>,
    trended: &Array1<f64>,
    upper_quantile: f64,
) -> Vec<f64> {
    let n_coefs = mle.coefficients.ncols();
    let mut prior = vec![WIDE_PRIOR_VARIANCE; n_coefs];

    for (k, slot) in prior.iter_mut().enumerate().skip(1) {
        let betas = mle.log2_coefficient(k);
        let (values, weights): (Vec<f64>, Vec<f64>) = (0..betas.len())
            .filter(|&g| base_means[g] > 0.0 && betas[g].is_finite() && betas[g].abs() < 10.0)
            .map(|g| (betas[g], 1.0 / (1.0 / base_means[g] + trended[g])))
            .unzip();
        if !values.is_empty() {
            *slot = match_weighted_upper_quantile_for_variance(&values, &weights, upper_quantile);
        }
    }
    prior
}

/// Shrink the dataset's MLE fold changes and store the shrunken fit.
/// Returns the prior variances used.
pub fn shrink_lfc_normal(dds: &mut CountDataSet, upper_quantile: f64) -> Result<Vec<f64>> {
    let mle = dds
        .mle_fit()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "MLE fit required before shrinkage".to_string(),
        })?
        .clone();
    let base_means = dds.base_means()?;
    let estimates = dds.require_dispersions()?;
    let trended = estimates.trended.clone();
    let dispersions = estimates.dispersions.clone();
    let size_factors = dds.require_size_factors()?.clone();

    let prior = beta_prior_variance(&mle, &base_means, &trended, upper_quantile);
    let mut lambda_log2: Vec<f64> = prior.iter().map(|v| 1.0 / v).collect();
    lambda_log2[0] = DEFAULT_LAMBDA_LOG2;
    log::info!(
        "LFC prior variance: {}",
        prior
            .iter()
            .skip(1)
            .map(|v| format!("{:.4}", v))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let shrunken = fit_all_genes(
        dds.counts().counts(),
        &size_factors,
        dds.design().matrix(),
        &dispersions,
        &lambda_log2,
        &GlmFitParams::default(),
    )?;
    dds.set_fit(shrunken);
    Ok(prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn fit_with_betas(betas: &[f64]) -> GlmFit {
        let n = betas.len();
        let mut coefficients = Array2::zeros((n, 2));
        for (g, b) in betas.iter().enumerate() {
            coefficients[[g, 0]] = 3.0;
            coefficients[[g, 1]] = b / std::f64::consts::LOG2_E;
        }
        GlmFit {
            standard_errors: Array2::from_elem((n, 2), 0.1),
            hat_diagonals: Array2::zeros((n, 4)),
            mu: Array2::zeros((n, 4)),
            deviance: Array1::zeros(n),
            converged: vec![true; n],
            lambda_log2: vec![DEFAULT_LAMBDA_LOG2; 2],
            coefficients,
        }
    }

    #[test]
    fn test_prior_variance_tracks_spread_of_betas() {
        let narrow: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 100.0).collect();
        let wide: Vec<f64> = narrow.iter().map(|b| b * 4.0).collect();
        let means = Array1::from_elem(100, 100.0);
        let trend = Array1::from_elem(100, 0.1);
        let v_narrow = beta_prior_variance(&fit_with_betas(&narrow), &means, &trend, 0.05);
        let v_wide = beta_prior_variance(&fit_with_betas(&wide), &means, &trend, 0.05);
        assert_eq!(v_narrow[0], WIDE_PRIOR_VARIANCE);
        assert!(v_wide[1] > 10.0 * v_narrow[1]);
    }

    #[test]
    fn test_ignores_zero_means_and_extreme_betas() {
        let fit = fit_with_betas(&[0.5, -0.5, 25.0, 0.2]);
        let means = array![100.0, 100.0, 100.0, 0.0];
        let trend = Array1::from_elem(4, 0.1);
        let v = beta_prior_variance(&fit, &means, &trend, 0.05);
        // only +-0.5 survive: (0.5 / 1.96)^2
        assert!((v[1] - (0.5f64 / 1.959963984540054).powi(2)).abs() < 1e-9);
    }
}

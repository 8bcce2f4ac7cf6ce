//! Regularized log transformation (rlog)
//!
//! 1. Per-sample design: intercept plus one indicator per sample
//! 2. Prior variance from the weighted upper quantile of
//!    `log2(norm + 0.5) - log2(baseMean + 0.5)`, weights
//!    `1 / (1/baseMean + trended dispersion)`
//! 3. Ridge-penalised NB GLM per gene at the trended dispersion
//! 4. Output: `X * beta` on the log2 scale

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use crate::data::{CountDataSet, CountMatrix};
use crate::dispersion::{estimate_trend, DispersionParams, DispersionTrend, TrendFitType};
use crate::error::{PipelineError, Result};
use crate::glm::{fit_gene, Design, GlmFitParams, DEFAULT_LAMBDA_LOG2};
use crate::normalization::normalized_counts;
use crate::stats::match_weighted_upper_quantile_for_variance;

const RLOG_BETA_TOL: f64 = 1e-4;

/// Fraction of genes with a zero above which the data count as sparse
const SPARSE_ZERO_FRACTION: f64 = 0.9;

/// rlog values with the settings that produced them
#[derive(Debug, Clone)]
pub struct RlogMatrix {
    /// genes × samples, log2 scale
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Fitted log2 intercept per gene, -inf for all-zero genes
    pub intercepts: Vec<f64>,
    pub beta_prior_variance: f64,
    /// Trend estimated without the condition design
    pub blind: bool,
}

impl RlogMatrix {
    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }
}

fn is_sparse(counts: &CountMatrix) -> bool {
    let with_zero = counts
        .counts()
        .rows()
        .into_iter()
        .filter(|row| row.iter().any(|&x| x == 0.0))
        .count();
    counts.n_genes() > 0 && with_zero as f64 / counts.n_genes() as f64 > SPARSE_ZERO_FRACTION
}

/// rlog of `counts` given size factors and a dispersion trend
pub fn rlog(counts: &CountMatrix, size_factors: &Array1<f64>, trend: &DispersionTrend, blind: bool) -> Result<RlogMatrix> {
    let (n_genes, n_samples) = counts.counts().dim();
    if n_samples < 2 {
        return Err(PipelineError::InsufficientSamples {
            needed: 2,
            got: n_samples,
        });
    }
    let norm = normalized_counts(counts.counts(), size_factors)?;
    let base_means = norm.mean_axis(Axis(1)).ok_or_else(|| PipelineError::EmptyData {
        reason: "no samples to average".to_string(),
    })?;
    if is_sparse(counts) {
        log::warn!("Most genes have a zero count; rlog may be dominated by the prior");
    }

    let nonzero: Vec<usize> = (0..n_genes).filter(|&g| base_means[g] > 0.0).collect();
    let trended: Vec<f64> = base_means.iter().map(|&m| trend.predict(m)).collect();

    let mut lfcs = Vec::with_capacity(nonzero.len() * n_samples);
    let mut weights = Vec::with_capacity(nonzero.len() * n_samples);
    for &g in &nonzero {
        let w = 1.0 / (1.0 / base_means[g] + trended[g]);
        let centre = (base_means[g] + 0.5).log2();
        for s in 0..n_samples {
            lfcs.push((norm[[g, s]] + 0.5).log2() - centre);
            weights.push(w);
        }
    }
    let beta_prior_variance = if lfcs.is_empty() {
        1.0
    } else {
        match_weighted_upper_quantile_for_variance(&lfcs, &weights, 0.05)
    };
    log::info!("rlog prior variance {:.4} ({} genes)", beta_prior_variance, nonzero.len());

    let design = Design::per_sample(n_samples);
    let x = design.matrix();
    let mut lambda = vec![1.0 / beta_prior_variance; design.n_coefs()];
    lambda[0] = DEFAULT_LAMBDA_LOG2;
    let params = GlmFitParams {
        beta_tol: RLOG_BETA_TOL,
        ..GlmFitParams::default()
    };

    let fits: Vec<Vec<f64>> = nonzero
        .par_iter()
        .map(|&g| {
            let mut start = vec![0.0; design.n_coefs()];
            start[0] = base_means[g].ln();
            fit_gene(
                counts.counts().row(g),
                size_factors.view(),
                x,
                trended[g],
                &lambda,
                &params,
                Some(&start),
            )
            .coefficients
        })
        .collect();

    let mut data = Array2::zeros((n_genes, n_samples));
    let mut intercepts = vec![f64::NEG_INFINITY; n_genes];
    for (&g, beta) in nonzero.iter().zip(&fits) {
        let beta_log2: Array1<f64> = beta.iter().map(|b| b * std::f64::consts::LOG2_E).collect();
        intercepts[g] = beta_log2[0];
        data.row_mut(g).assign(&x.dot(&beta_log2));
    }

    Ok(RlogMatrix {
        data,
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        intercepts,
        beta_prior_variance,
        blind,
    })
}

/// rlog of a dataset with size factors.
///
/// Blind: the trend comes from an intercept-only design. Otherwise the
/// stored dispersion trend is used, or estimated on the dataset design.
pub fn rlog_dataset(dds: &CountDataSet, blind: bool, fit_type: TrendFitType) -> Result<RlogMatrix> {
    let size_factors = dds.require_size_factors()?;
    let params = DispersionParams::default();
    let trend = match (blind, dds.dispersions()) {
        (false, Some(estimates)) => estimates.trend.clone(),
        (false, None) => estimate_trend(dds.counts().counts(), size_factors, dds.design(), fit_type, &params)?.0,
        (true, _) => {
            let intercept = Design::intercept_only(dds.n_samples());
            estimate_trend(dds.counts().counts(), size_factors, &intercept, fit_type, &params)?.0
        }
    };
    log::info!("rlog with {} trend (blind = {})", trend.fit_type(), blind);
    rlog(dds.counts(), size_factors, &trend, blind)
}

//! Dispersion estimation for negative binomial models
//!
//! Three passes over the genes: gene-wise maximum likelihood, a trend of
//! dispersion against mean, and MAP shrinkage of the gene-wise values
//! towards the trend.

mod gene_wise;
mod likelihood;
mod map;
mod trend;

pub use gene_wise::{estimate_gene_dispersion, GeneDispersion};
pub use likelihood::{grid_search, line_search, log_posterior, LineSearch, LogNormalPrior};
pub use map::{
    dispersion_outliers, estimate_prior_variance, map_gene_dispersion, PriorVariance, MIN_PRIOR_VARIANCE,
};
pub use trend::{fit_trend, DispersionTrend, TrendFitType};

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::Design;

/// Tuning of the dispersion optimisers
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Smallest dispersion reported
    pub min_disp: f64,
    /// Log-posterior change that ends the line search
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates this many prior SDs above the trend are kept
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

impl DispersionParams {
    /// Upper bound on dispersion: `max(n_samples, 10)`
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }
}

/// Every dispersion quantity, one entry per gene
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    pub map: Array1<f64>,
    /// Dispersions used downstream: MAP, or gene-wise for outliers
    pub dispersions: Array1<f64>,
    pub outliers: Vec<bool>,
    pub trend: DispersionTrend,
    pub prior: PriorVariance,
    /// Fitted means the gene-wise estimates were conditioned on
    pub mu: Array2<f64>,
    pub converged: Vec<bool>,
}

impl DispersionEstimates {
    pub fn len(&self) -> usize {
        self.dispersions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispersions.is_empty()
    }
}

/// Trend-only estimate used where the per-gene estimates are not needed
/// (rlog): gene-wise fit plus trend, evaluated at every base mean.
pub fn estimate_trend(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Design,
    fit_type: TrendFitType,
    params: &DispersionParams,
) -> Result<(DispersionTrend, Array1<f64>)> {
    let (estimates, base_means) = gene_wise_pass(counts, size_factors, design, params)?;
    let gene_wise: Vec<f64> = estimates.iter().map(|e| e.alpha).collect();
    let trend = fit_trend(&base_means.to_vec(), &gene_wise, fit_type, params.min_disp)?;
    Ok((trend, base_means))
}

fn gene_wise_pass(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Design,
    params: &DispersionParams,
) -> Result<(Vec<GeneDispersion>, Array1<f64>)> {
    let (n_genes, n_samples) = counts.dim();
    if design.n_samples() != n_samples || size_factors.len() != n_samples {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} samples", n_samples),
            got: format!(
                "design {} rows, {} size factors",
                design.n_samples(),
                size_factors.len()
            ),
        });
    }
    if n_samples <= design.n_coefs() {
        return Err(PipelineError::InsufficientSamples {
            needed: design.n_coefs() + 1,
            got: n_samples,
        });
    }

    let xim = size_factors.iter().map(|s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let estimates: Vec<GeneDispersion> = (0..n_genes)
        .into_par_iter()
        .map(|g| estimate_gene_dispersion(counts.row(g), size_factors.view(), design, xim, params))
        .collect();

    let base_means = (&counts / &size_factors.view().insert_axis(Axis(0)))
        .mean_axis(Axis(1))
        .ok_or_else(|| PipelineError::EmptyData {
            reason: "no samples to average".to_string(),
        })?;
    Ok((estimates, base_means))
}

/// Gene-wise, trended and MAP dispersions of every gene
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Design,
    fit_type: TrendFitType,
    params: &DispersionParams,
) -> Result<DispersionEstimates> {
    let (n_genes, n_samples) = counts.dim();
    log::info!("Estimating gene-wise dispersions for {} genes", n_genes);
    let (estimates, base_means) = gene_wise_pass(counts, size_factors, design, params)?;

    let gene_wise: Array1<f64> = estimates.iter().map(|e| e.alpha).collect();
    let mu = gene_wise::mu_matrix(&estimates, n_samples);
    let n_unconverged = estimates.iter().filter(|e| !e.converged).count();
    if n_unconverged > 0 {
        log::debug!("{} gene-wise estimates refit on a grid", n_unconverged);
    }

    log::info!("Fitting dispersion trend ({})", fit_type);
    let trend = fit_trend(&base_means.to_vec(), &gene_wise.to_vec(), fit_type, params.min_disp)?;
    if trend.fit_type() != fit_type {
        log::info!("Dispersion trend fell back to {}", trend.fit_type());
    }
    let trended: Array1<f64> = base_means.mapv(|m| trend.predict(m));

    let prior = estimate_prior_variance(
        &gene_wise.to_vec(),
        &trended.to_vec(),
        n_samples,
        design.n_coefs(),
        params.min_disp,
    );

    log::info!("Shrinking dispersions towards the trend");
    let map_fits: Vec<(f64, bool)> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            let mu_g = mu.row(g).to_vec();
            map_gene_dispersion(
                counts.row(g),
                design.matrix(),
                &mu_g,
                gene_wise[g],
                trended[g],
                prior.prior_variance,
                params,
            )
        })
        .collect();
    let map: Array1<f64> = map_fits.iter().map(|f| f.0).collect();
    let converged: Vec<bool> = map_fits.iter().map(|f| f.1).collect();

    let outliers = dispersion_outliers(
        &gene_wise.to_vec(),
        &trended.to_vec(),
        prior.var_log_disp_ests,
        params.outlier_sd,
    );
    let dispersions: Array1<f64> = (0..n_genes)
        .map(|g| if outliers[g] { gene_wise[g] } else { map[g] })
        .collect();
    log::info!(
        "Dispersions done: {} outliers keep their gene-wise estimate",
        outliers.iter().filter(|&&o| o).count()
    );

    Ok(DispersionEstimates {
        gene_wise,
        trended,
        map,
        dispersions,
        outliers,
        trend,
        prior,
        mu,
        converged,
    })
}

/// Estimate dispersions for the dataset's design and store them
pub fn estimate_dataset_dispersions(
    dds: &mut CountDataSet,
    fit_type: TrendFitType,
    params: &DispersionParams,
) -> Result<()> {
    let size_factors = dds.require_size_factors()?.clone();
    let estimates = estimate_dispersions(dds.counts().counts(), &size_factors, dds.design(), fit_type, params)?;
    dds.set_dispersions(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleTable;
    use crate::rng::SeededRng;

    fn simulate_counts(n_genes: usize, n_samples: usize, seed: u32) -> Array2<f64> {
        let mut rng = SeededRng::new(seed);
        Array2::from_shape_fn((n_genes, n_samples), |(g, _)| {
            let mean = 20.0 + 30.0 * (g % 17) as f64;
            rng.negative_binomial(mean, 0.05 + 1.0 / mean)
        })
    }

    fn design() -> Design {
        let names: Vec<String> = ["A_1", "A_2", "A_3", "A_4", "B_1", "B_2", "B_3", "B_4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Design::for_contrast(&SampleTable::from_sample_names(&names).unwrap(), "B", "A").unwrap()
    }

    #[test]
    fn test_full_estimation_shape_and_bounds() {
        let counts = simulate_counts(120, 8, 5);
        let sf = Array1::ones(8);
        let est = estimate_dispersions(
            counts.view(),
            &sf,
            &design(),
            TrendFitType::Parametric,
            &DispersionParams::default(),
        )
        .unwrap();
        assert_eq!(est.len(), 120);
        assert!(est.dispersions.iter().all(|d| d.is_finite() && *d >= 1e-8 && *d <= 10.0));
        assert!(est.trended.iter().all(|t| *t > 0.0));
        assert!(est.prior.prior_variance >= MIN_PRIOR_VARIANCE);
        for g in 0..120 {
            if est.outliers[g] {
                assert_eq!(est.dispersions[g], est.gene_wise[g]);
            } else {
                assert_eq!(est.dispersions[g], est.map[g]);
            }
        }
    }

    #[test]
    fn test_requires_residual_degrees_of_freedom() {
        let names: Vec<String> = ["A_1", "B_1"].iter().map(|s| s.to_string()).collect();
        let d = Design::for_contrast(&SampleTable::from_sample_names(&names).unwrap(), "B", "A").unwrap();
        let counts = Array2::from_elem((3, 2), 10.0);
        let err = estimate_dispersions(
            counts.view(),
            &Array1::ones(2),
            &d,
            TrendFitType::Mean,
            &DispersionParams::default(),
        );
        assert!(matches!(err, Err(PipelineError::InsufficientSamples { .. })));
    }
}

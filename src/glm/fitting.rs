//! Per-gene NB GLM fits by iteratively reweighted least squares

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::negative_binomial::{nb_log_density, nb_mean, nb_weight, MAX_BETA, MIN_MU};
use crate::error::{PipelineError, Result};
use crate::linalg::{invert_symmetric, solve_symmetric, weighted_crossprod};

/// Ridge on every coefficient of an unpenalised fit, log2 scale
pub const DEFAULT_LAMBDA_LOG2: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct GlmFitParams {
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of one gene. Coefficients and standard errors are on the
/// natural-log scale.
#[derive(Debug, Clone)]
pub struct GeneFit {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub hat_diagonals: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub converged: bool,
}

/// Fits of all genes, rows aligned with the count matrix
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// genes × coefficients, natural-log scale
    pub coefficients: Array2<f64>,
    pub standard_errors: Array2<f64>,
    /// genes × samples
    pub hat_diagonals: Array2<f64>,
    pub mu: Array2<f64>,
    pub deviance: Array1<f64>,
    pub converged: Vec<bool>,
    /// Ridge penalty used, log2 scale, one per coefficient
    pub lambda_log2: Vec<f64>,
}

impl GlmFit {
    pub fn n_genes(&self) -> usize {
        self.coefficients.nrows()
    }

    /// Coefficient `coef` of every gene on the log2 scale
    pub fn log2_coefficient(&self, coef: usize) -> Array1<f64> {
        self.coefficients.column(coef).mapv(|b| b * std::f64::consts::LOG2_E)
    }

    /// Standard error of `coef` on the log2 scale
    pub fn log2_standard_error(&self, coef: usize) -> Array1<f64> {
        self.standard_errors.column(coef).mapv(|s| s * std::f64::consts::LOG2_E)
    }
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], sample: usize) -> f64 {
    design
        .row(sample)
        .iter()
        .zip(beta)
        .map(|(x, b)| x * b)
        .sum()
}

fn fitted_means(design: &Array2<f64>, beta: &[f64], size_factors: ArrayView1<f64>) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| nb_mean(linear_predictor(design, beta, i), size_factors[i]).max(MIN_MU))
        .collect()
}

fn deviance(y: ArrayView1<f64>, mu: &[f64], alpha: f64) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| -2.0 * nb_log_density(yi, mi, alpha))
        .sum()
}

/// Ordinary least squares of `ln(normalized + 0.1)` on the design, the
/// IRLS starting point.
fn initial_coefficients(y: ArrayView1<f64>, size_factors: ArrayView1<f64>, design: &Array2<f64>) -> Vec<f64> {
    let z = Array1::from_iter(
        y.iter()
            .zip(size_factors.iter())
            .map(|(&c, &s)| (c / s + 0.1).ln()),
    );
    let ones = vec![1.0; design.nrows()];
    let xtx = weighted_crossprod(design, &ones);
    let beta = solve_symmetric(&xtx, &design.t().dot(&z));
    if beta.iter().all(|b| b.is_finite()) {
        beta.to_vec()
    } else {
        let mean_norm = y.iter().zip(size_factors.iter()).map(|(c, s)| c / s).sum::<f64>() / y.len() as f64;
        let mut fallback = vec![0.0; design.ncols()];
        fallback[0] = mean_norm.max(0.1).ln();
        fallback
    }
}

/// Penalised log likelihood used by the coordinate-ascent fallback
fn penalised_log_likelihood(
    y: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    alpha: f64,
    lambda: &[f64],
    beta: &[f64],
) -> f64 {
    let mu = fitted_means(design, beta, size_factors);
    let ll: f64 = y.iter().zip(&mu).map(|(&yi, &mi)| nb_log_density(yi, mi, alpha)).sum();
    let penalty: f64 = beta.iter().zip(lambda).map(|(b, l)| 0.5 * l * b * b).sum();
    ll - penalty
}

/// Coordinate-wise Newton steps with Armijo backtracking, used when IRLS
/// fails to converge.
fn coordinate_ascent(
    y: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    alpha: f64,
    lambda: &[f64],
    start: &[f64],
) -> (Vec<f64>, bool) {
    let mut beta: Vec<f64> = start
        .iter()
        .map(|b| if b.is_finite() { b.clamp(-MAX_BETA, MAX_BETA) } else { 0.0 })
        .collect();
    let mut ll = penalised_log_likelihood(y, size_factors, design, alpha, lambda, &beta);

    for _ in 0..1000 {
        let ll_start = ll;
        for j in 0..beta.len() {
            let mu = fitted_means(design, &beta, size_factors);
            let mut grad = -lambda[j] * beta[j];
            let mut hess = -lambda[j];
            for i in 0..design.nrows() {
                let x = design[[i, j]];
                if x == 0.0 {
                    continue;
                }
                grad += (y[i] - mu[i]) / (1.0 + alpha * mu[i]) * x;
                hess -= nb_weight(mu[i], alpha) * x * x;
            }
            if hess.abs() < 1e-20 {
                continue;
            }
            let delta = -grad / hess;
            if delta.abs() < 1e-14 {
                continue;
            }
            let old = beta[j];
            let mut step = 1.0;
            let mut accepted = false;
            while step > 1e-20 {
                beta[j] = (old + step * delta).clamp(-MAX_BETA, MAX_BETA);
                let candidate = penalised_log_likelihood(y, size_factors, design, alpha, lambda, &beta);
                if candidate >= ll + 1e-4 * step * grad * delta {
                    ll = candidate;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                beta[j] = old;
            }
        }
        if (ll - ll_start).abs() / (ll.abs() + 0.1) < 1e-8 {
            return (beta, true);
        }
    }
    (beta, false)
}

/// Fit one gene.
///
/// `lambda_log2` is the ridge penalty per coefficient on the log2 scale.
/// `start` overrides the least-squares starting coefficients.
pub fn fit_gene(
    y: ArrayView1<f64>,
    size_factors: ArrayView1<f64>,
    design: &Array2<f64>,
    alpha: f64,
    lambda_log2: &[f64],
    params: &GlmFitParams,
    start: Option<&[f64]>,
) -> GeneFit {
    let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;
    let lambda: Vec<f64> = lambda_log2.iter().map(|l| l / ln2_sq).collect();
    let p = design.ncols();

    let mut beta = match start {
        Some(b) => b.to_vec(),
        None => initial_coefficients(y, size_factors, design),
    };
    let mut mu = fitted_means(design, &beta, size_factors);
    let mut dev_old = 0.0;
    let mut converged = false;
    let mut diverged = false;

    for iter in 0..params.maxit {
        let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z = Array1::from_iter((0..y.len()).map(|i| (mu[i] / size_factors[i]).ln() + (y[i] - mu[i]) / mu[i]));

        let mut xtwx = weighted_crossprod(design, &w);
        for j in 0..p {
            xtwx[[j, j]] += lambda[j];
        }
        let wz = Array1::from_iter(z.iter().zip(&w).map(|(zi, wi)| zi * wi));
        beta = solve_symmetric(&xtwx, &design.t().dot(&wz)).to_vec();

        if beta.iter().any(|b| !b.is_finite() || b.abs() > MAX_BETA) {
            diverged = true;
            break;
        }

        mu = fitted_means(design, &beta, size_factors);
        let dev = deviance(y, &mu, alpha);
        let conv = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv.is_nan() {
            diverged = true;
            break;
        }
        if iter > 0 && conv < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    if !converged {
        let restart = if diverged {
            initial_coefficients(y, size_factors, design)
        } else {
            beta.clone()
        };
        let (refined, ok) = coordinate_ascent(y, size_factors, design, alpha, &lambda, &restart);
        beta = refined;
        converged = ok;
        mu = fitted_means(design, &beta, size_factors);
    }

    let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let xtwx = weighted_crossprod(design, &w);
    let mut penalised = xtwx.clone();
    for j in 0..p {
        penalised[[j, j]] += lambda[j];
    }
    let inv = invert_symmetric(&penalised);
    let sandwich = inv.dot(&xtwx).dot(&inv);
    let standard_errors = sandwich.diag().iter().map(|v| v.max(0.0).sqrt()).collect();
    let hat_diagonals = (0..design.nrows())
        .map(|i| {
            let x = design.row(i);
            w[i] * x.dot(&inv.dot(&x))
        })
        .collect();

    GeneFit {
        deviance: deviance(y, &mu, alpha),
        coefficients: beta,
        standard_errors,
        hat_diagonals,
        mu,
        converged,
    }
}

/// Fit every gene in parallel with the given dispersions and ridge penalty
pub fn fit_all_genes(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    dispersions: &Array1<f64>,
    lambda_log2: &[f64],
    params: &GlmFitParams,
) -> Result<GlmFit> {
    let (n_genes, n_samples) = counts.dim();
    if design.nrows() != n_samples || size_factors.len() != n_samples {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} samples", n_samples),
            got: format!("design {} rows, {} size factors", design.nrows(), size_factors.len()),
        });
    }
    if dispersions.len() != n_genes || lambda_log2.len() != design.ncols() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} dispersions and {} penalties", n_genes, design.ncols()),
            got: format!("{} and {}", dispersions.len(), lambda_log2.len()),
        });
    }

    let fits: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            fit_gene(
                counts.row(g),
                size_factors.view(),
                design,
                dispersions[g],
                lambda_log2,
                params,
                None,
            )
        })
        .collect();

    let p = design.ncols();
    let mut out = GlmFit {
        coefficients: Array2::zeros((n_genes, p)),
        standard_errors: Array2::zeros((n_genes, p)),
        hat_diagonals: Array2::zeros((n_genes, n_samples)),
        mu: Array2::zeros((n_genes, n_samples)),
        deviance: Array1::zeros(n_genes),
        converged: Vec::with_capacity(n_genes),
        lambda_log2: lambda_log2.to_vec(),
    };
    for (g, fit) in fits.into_iter().enumerate() {
        for j in 0..p {
            out.coefficients[[g, j]] = fit.coefficients[j];
            out.standard_errors[[g, j]] = fit.standard_errors[j];
        }
        for i in 0..n_samples {
            out.hat_diagonals[[g, i]] = fit.hat_diagonals[i];
            out.mu[[g, i]] = fit.mu[i];
        }
        out.deviance[g] = fit.deviance;
        out.converged.push(fit.converged);
    }

    let failed = out.converged.iter().filter(|c| !**c).count();
    if failed > 0 {
        log::warn!("{} genes did not converge in the GLM fit", failed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_recovers_group_fold_change() {
        let y = array![100.0, 100.0, 100.0, 400.0, 400.0, 400.0];
        let sf = Array1::ones(6);
        let fit = fit_gene(
            y.view(),
            sf.view(),
            &two_group(),
            0.01,
            &[DEFAULT_LAMBDA_LOG2; 2],
            &GlmFitParams::default(),
            None,
        );
        assert!(fit.converged);
        assert!((fit.coefficients[0] - 100f64.ln()).abs() < 1e-4);
        assert!((fit.coefficients[1] - 4f64.ln()).abs() < 1e-4);
        assert!(fit.standard_errors.iter().all(|s| *s > 0.0));
        // hat values of a saturated group model sum to the number of coefficients
        let trace: f64 = fit.hat_diagonals.iter().sum();
        assert!((trace - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_size_factors_enter_as_offsets() {
        let y = array![50.0, 100.0, 200.0, 200.0, 400.0, 800.0];
        let sf = array![0.5, 1.0, 2.0, 0.5, 1.0, 2.0];
        let fit = fit_gene(
            y.view(),
            sf.view(),
            &two_group(),
            0.01,
            &[DEFAULT_LAMBDA_LOG2; 2],
            &GlmFitParams::default(),
            None,
        );
        assert!((fit.coefficients[0] - 100f64.ln()).abs() < 1e-4);
        assert!((fit.coefficients[1] - 4f64.ln()).abs() < 1e-4);
    }

    #[test]
    fn test_strong_ridge_pulls_towards_zero() {
        let y = array![100.0, 100.0, 100.0, 400.0, 400.0, 400.0];
        let sf = Array1::ones(6);
        let fit = fit_gene(
            y.view(),
            sf.view(),
            &two_group(),
            0.01,
            &[DEFAULT_LAMBDA_LOG2, 1000.0],
            &GlmFitParams::default(),
            None,
        );
        assert!(fit.coefficients[1].abs() < 0.5 * 4f64.ln());
    }

    #[test]
    fn test_fit_all_genes_shapes() {
        let counts = array![[10.0, 12.0, 11.0, 30.0, 33.0, 29.0], [0.0, 1.0, 0.0, 2.0, 1.0, 3.0]];
        let sf = Array1::ones(6);
        let disp = array![0.05, 0.5];
        let fit = fit_all_genes(
            counts.view(),
            &sf,
            &two_group(),
            &disp,
            &[DEFAULT_LAMBDA_LOG2; 2],
            &GlmFitParams::default(),
        )
        .unwrap();
        assert_eq!(fit.coefficients.dim(), (2, 2));
        assert_eq!(fit.hat_diagonals.dim(), (2, 6));
        assert!(fit.log2_coefficient(1)[0] > 1.0);
        assert!(fit_all_genes(counts.view(), &sf, &two_group(), &array![0.1], &[0.0; 2], &GlmFitParams::default()).is_err());
    }
}

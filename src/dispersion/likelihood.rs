//! Cox-Reid adjusted profile likelihood of the NB dispersion and its
//! optimisation on the log scale.
//!
//! The same objective serves the gene-wise estimate (no prior) and the MAP
//! estimate (log-normal prior centred on the trend).

use ndarray::{Array1, Array2};
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::linalg::{log_det_symmetric, solve_symmetric, weighted_crossprod};

/// Log-normal prior on the dispersion
#[derive(Debug, Clone, Copy)]
pub struct LogNormalPrior {
    pub log_mean: f64,
    pub variance: f64,
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

/// Proposals never leave [-30, 10] on the log scale
const LOG_ALPHA_FLOOR: f64 = -30.0;
const LOG_ALPHA_CEILING: f64 = 10.0;
const ARMIJO_EPSILON: f64 = 1e-4;
const GRID_POINTS: usize = 20;

fn cox_reid_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

/// Log posterior of `log_alpha` given counts and fixed fitted means
pub fn log_posterior(
    y: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<&LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let size = 1.0 / alpha;
    let ll: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            let mi = mi.max(1e-10);
            ln_gamma(yi + size) - ln_gamma(size) - yi * (mi + size).ln() - size * (1.0 + mi * alpha).ln()
        })
        .sum();

    let info = weighted_crossprod(design, &cox_reid_weights(mu, alpha));
    let log_det = log_det_symmetric(&info);
    let cr = if log_det.is_finite() { -0.5 * log_det } else { 0.0 };

    let prior_part = prior.map_or(0.0, |p| -0.5 * (log_alpha - p.log_mean).powi(2) / p.variance);
    ll + cr + prior_part
}

/// Derivative of [`log_posterior`] with respect to `log_alpha`
pub fn d_log_posterior(
    y: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<&LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let size = 1.0 / alpha;
    let dg_size = digamma(size);
    let d_ll: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            let mi = mi.max(1e-10);
            let ma = mi * alpha;
            dg_size + (1.0 + ma).ln() - ma / (1.0 + ma) - digamma(yi + size) + yi / (mi + size)
        })
        .sum::<f64>()
        / (alpha * alpha);

    // d/dalpha of -0.5 log|X'WX| is -0.5 tr(B^-1 dB) with dw = -w^2
    let w = cox_reid_weights(mu, alpha);
    let dw: Vec<f64> = w.iter().map(|wi| -wi * wi).collect();
    let b = weighted_crossprod(design, &w);
    let db = weighted_crossprod(design, &dw);
    let p = design.ncols();
    let trace: f64 = (0..p)
        .map(|col| solve_symmetric(&b, &db.column(col).to_owned())[col])
        .sum();
    let d_cr = if trace.is_finite() { -0.5 * trace } else { 0.0 };

    let prior_part = prior.map_or(0.0, |p| -(log_alpha - p.log_mean) / p.variance);
    (d_ll + d_cr) * alpha + prior_part
}

/// Maximise the log posterior by gradient ascent with an Armijo step rule
/// and an adaptive step size.
pub fn line_search(
    y: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    alpha_init: f64,
    max_disp: f64,
    prior: Option<&LogNormalPrior>,
    params: &DispersionParams,
) -> LineSearch {
    let min_log_alpha = (params.min_disp / 10.0).ln();
    let mut log_alpha = alpha_init.max(1e-10).ln().clamp(LOG_ALPHA_FLOOR, max_disp.ln());

    let initial_lp = log_posterior(y, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(y, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0usize;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let proposal = log_alpha + kappa * dlp;
        if proposal < LOG_ALPHA_FLOOR {
            kappa = (LOG_ALPHA_FLOOR - log_alpha) / dlp;
        }
        if proposal > LOG_ALPHA_CEILING {
            kappa = (LOG_ALPHA_CEILING - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;
        let lp_proposal = log_posterior(y, design, mu, proposal, prior);

        if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_proposal - lp;
            lp = lp_proposal;
            if change < params.disp_tol || log_alpha < min_log_alpha {
                iterations = iter + 1;
                break;
            }
            dlp = d_log_posterior(y, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        last_lp: lp,
        iterations,
    }
}

/// Coarse-then-fine grid search over `[min_disp, max_disp]` on the log
/// scale, used when the line search does not settle.
pub fn grid_search(
    y: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<&LogNormalPrior>,
) -> f64 {
    let lo = min_disp.ln();
    let hi = max_disp.ln();
    let step = (hi - lo) / (GRID_POINTS - 1) as f64;

    let best_on = |grid: &Array1<f64>| -> f64 {
        grid.iter()
            .map(|&a| (a, log_posterior(y, design, mu, a, prior)))
            .fold((grid[0], f64::NEG_INFINITY), |best, (a, lp)| if lp > best.1 { (a, lp) } else { best })
            .0
    };

    let coarse = Array1::linspace(lo, hi, GRID_POINTS);
    let center = best_on(&coarse);
    let fine = Array1::linspace(center - step, center + step, GRID_POINTS);
    best_on(&fine).exp()
}

//! Dispersion-mean trend

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::stats::{cmp_f64, interpolate, lowess, trimmed_mean};

/// How the trend through the gene-wise estimates is fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitType {
    /// `a0 + a1 / mean` by a gamma GLM
    #[default]
    Parametric,
    /// lowess of log dispersion against log mean
    Local,
    /// Trimmed mean of the estimates, no mean dependence
    Mean,
}

impl FromStr for TrendFitType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parametric" => Ok(Self::Parametric),
            "local" => Ok(Self::Local),
            "mean" => Ok(Self::Mean),
            other => Err(PipelineError::InvalidConfig {
                reason: format!("unknown fit type '{}' (parametric, local, mean)", other),
            }),
        }
    }
}

impl fmt::Display for TrendFitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parametric => "parametric",
            Self::Local => "local",
            Self::Mean => "mean",
        };
        f.write_str(name)
    }
}

/// A fitted trend that can be evaluated at any mean
#[derive(Debug, Clone, PartialEq)]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Log-scale knots sorted by log mean
    Local { log_means: Vec<f64>, log_disps: Vec<f64> },
    Mean { value: f64 },
}

impl DispersionTrend {
    pub fn fit_type(&self) -> TrendFitType {
        match self {
            Self::Parametric { .. } => TrendFitType::Parametric,
            Self::Local { .. } => TrendFitType::Local,
            Self::Mean { .. } => TrendFitType::Mean,
        }
    }

    /// Trended dispersion at `mean`
    pub fn predict(&self, mean: f64) -> f64 {
        match self {
            Self::Parametric { asympt_disp, extra_pois } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    *asympt_disp
                }
            }
            Self::Local { log_means, log_disps } => {
                if mean <= 0.0 {
                    return log_disps[0].exp();
                }
                interpolate(log_means, log_disps, mean.ln()).exp()
            }
            Self::Mean { value } => *value,
        }
    }
}

const MAX_PARAMETRIC_ITER: usize = 11;
const GAMMA_IRLS_ITER: usize = 25;

/// Gamma GLM with identity link, `disp ~ 1 + 1/mean`, from a start point.
/// Returns the coefficients and whether the deviance settled.
fn gamma_identity_fit(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(mean, disp)| {
                let mu = (a0 + a1 / mean).max(1e-8);
                2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);
    for _ in 0..GAMMA_IRLS_ITER {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

/// Parametric trend with the residual filter `1e-4 < disp / fit < 15`
fn fit_parametric(means: &[f64], disps: &[f64]) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means.iter().copied().zip(disps.iter().copied()).collect();
    let mut coefs = (0.1_f64, 1.0_f64);

    for iter in 0..MAX_PARAMETRIC_ITER {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .filter(|&&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                let residual = disp / fitted;
                fitted > 0.0 && residual > 1e-4 && residual < 15.0
            })
            .copied()
            .collect();
        if good.len() < 3 {
            return Err(PipelineError::TrendFittingFailed {
                reason: "too few genes within the residual window".to_string(),
            });
        }

        let (next, converged) = gamma_identity_fit(&good, coefs);
        coefs = next;
        log::debug!(
            "parametric trend iter {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(PipelineError::TrendFittingFailed {
                reason: format!("coefficients not positive (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }
        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(PipelineError::TrendFittingFailed {
        reason: "parametric fit did not converge".to_string(),
    })
}

fn fit_local(means: &[f64], disps: &[f64]) -> Result<DispersionTrend> {
    if means.len() < 5 {
        return Err(PipelineError::TrendFittingFailed {
            reason: format!("local fit needs at least 5 genes, got {}", means.len()),
        });
    }
    let mut points: Vec<(f64, f64)> = means.iter().zip(disps).map(|(m, d)| (m.ln(), d.ln())).collect();
    points.sort_by(|a, b| cmp_f64(&a.0, &b.0));
    let log_means: Vec<f64> = points.iter().map(|p| p.0).collect();
    let raw: Vec<f64> = points.iter().map(|p| p.1).collect();
    let log_disps = lowess(&log_means, &raw, 0.7, 0);
    if log_disps.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::TrendFittingFailed {
            reason: "local fit produced non-finite values".to_string(),
        });
    }
    Ok(DispersionTrend::Local { log_means, log_disps })
}

fn fit_mean(disps: &[f64]) -> Result<DispersionTrend> {
    let value = trimmed_mean(disps, 0.001);
    if !value.is_finite() {
        return Err(PipelineError::TrendFittingFailed {
            reason: "no finite gene-wise dispersions to average".to_string(),
        });
    }
    Ok(DispersionTrend::Mean { value })
}

/// Fit the trend through gene-wise dispersions that sit above
/// `100 * min_disp`. A failed parametric fit falls back to the local fit,
/// and a failed local fit to the mean.
pub fn fit_trend(
    base_means: &[f64],
    gene_wise: &[f64],
    fit_type: TrendFitType,
    min_disp: f64,
) -> Result<DispersionTrend> {
    let (means, disps): (Vec<f64>, Vec<f64>) = base_means
        .iter()
        .zip(gene_wise)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d >= 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .unzip();

    if disps.is_empty() {
        // Near-Poisson data: every estimate sits at the floor
        let finite: Vec<f64> = gene_wise.iter().copied().filter(|d| d.is_finite()).collect();
        log::warn!(
            "all gene-wise dispersion estimates are within 2 orders of magnitude of the minimum, \
             using their mean as the trend"
        );
        return fit_mean(&finite).map(|trend| match trend {
            DispersionTrend::Mean { value } => DispersionTrend::Mean {
                value: value.max(min_disp),
            },
            other => other,
        });
    }

    match fit_type {
        TrendFitType::Parametric => fit_parametric(&means, &disps).or_else(|e| {
            log::warn!("parametric dispersion trend failed ({}), using local regression", e);
            fit_local(&means, &disps)
        }),
        TrendFitType::Local => fit_local(&means, &disps),
        TrendFitType::Mean => fit_mean(&disps),
    }
    .or_else(|e| {
        if fit_type == TrendFitType::Mean {
            return Err(e);
        }
        log::warn!("local dispersion trend failed ({}), using the mean", e);
        fit_mean(&disps)
    })
}

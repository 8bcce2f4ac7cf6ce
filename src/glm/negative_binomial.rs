//! Negative binomial helpers (mean/dispersion parameterisation)

use statrs::function::gamma::ln_gamma;

/// Floor applied to fitted means inside IRLS
pub const MIN_MU: f64 = 0.5;

/// IRLS stops when any coefficient exceeds this on the natural-log scale
pub const MAX_BETA: f64 = 30.0;

/// Linear predictors are clamped here before exponentiation
pub const MAX_ETA: f64 = 700.0;

/// `size_factor * exp(eta)`
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// `mu + alpha mu^2`
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// IRLS working weight `mu / (1 + alpha mu)`
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// log P(Y = y) for NB with mean `mu` and size `1/alpha`
pub fn nb_log_density(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

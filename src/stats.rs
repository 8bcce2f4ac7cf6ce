//! Statistical helpers shared across modules
//!
//! Quantiles, robust scale estimates, the trigamma function and a lowess
//! smoother. The dispersion prior, LFC shrinkage, rlog, independent
//! filtering and the trend fit all draw from here.

use std::cmp::Ordering;

/// 97.5th percentile of the standard normal
pub const QNORM_0975: f64 = 1.959963984540054;

/// Consistency constant turning a MAD into a normal SD estimate
pub const MAD_SCALE: f64 = 1.4826;

/// Total order on floats for sorting, NaN compares equal
pub fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Sort a copy of the finite values in ascending order
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(cmp_f64);
    v
}

/// Type-7 sample quantile (linear interpolation between order statistics)
/// of an already sorted slice. Returns NaN for empty input.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (h.ceil() as usize).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Median of the finite values
pub fn median(values: &[f64]) -> f64 {
    quantile_sorted(&sorted_finite(values), 0.5)
}

/// Scaled median absolute deviation around the median
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations) * MAD_SCALE
}

/// Mean after dropping `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let k = (n as f64 * trim).floor() as usize;
    let kept = if 2 * k >= n { &sorted[..] } else { &sorted[k..n - k] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (n - 1 denominator)
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n as f64 - 1.0)
}

/// Trigamma function, the derivative of digamma.
///
/// Uses the reflection formula below 0.5, recurrence up to 8, then the
/// asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Weighted quantile with normalised weights (Hmisc `wtd.quantile`,
/// `normwt = TRUE`).
///
/// Equal x values are pooled, weights are rescaled to sum to the number of
/// observations, and the two bracketing order statistics are read off the
/// cumulative weights with a right-continuous step.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| xi.is_finite() && wi.is_finite() && **wi > 0.0)
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| cmp_f64(&a.0, &b.0));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();

    let mut values: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut cumulative: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut running = 0.0;
    for (xi, wi) in pairs {
        running += wi * scale;
        match values.last() {
            Some(&last) if last == xi => {
                if let Some(c) = cumulative.last_mut() {
                    *c = running;
                }
            }
            _ => {
                values.push(xi);
                cumulative.push(running);
            }
        }
    }

    let total = running;
    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let step = |target: f64| -> f64 {
        cumulative
            .iter()
            .position(|&c| c >= target)
            .map(|i| values[i])
            .unwrap_or(values[values.len() - 1])
    };
    (1.0 - frac) * step(low) + frac * step(high)
}

/// Prior variance matched to a weighted upper quantile of |x|:
/// `(q_{1-u}(|x|) / qnorm(1 - u/2))^2`. Degenerate inputs return 1e-6.
pub fn match_weighted_upper_quantile_for_variance(
    x: &[f64],
    weights: &[f64],
    upper_quantile: f64,
) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    log::debug!("upper quantile {:.6} -> prior variance {:.6}", q, var);
    if var > 0.0 && var.is_finite() {
        var
    } else {
        1e-6
    }
}

/// Linear interpolation on knots sorted by `xs`, flat outside their range
pub fn interpolate(xs: &[f64], ys: &[f64], at: f64) -> f64 {
    let last = xs.len() - 1;
    if at <= xs[0] {
        return ys[0];
    }
    if at >= xs[last] {
        return ys[last];
    }
    let hi = xs.partition_point(|&x| x < at);
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return ys[hi];
    }
    ys[lo] + (at - xs[lo]) / span * (ys[hi] - ys[lo])
}

/// Locally weighted linear regression (lowess) with tricube weights and
/// `iterations` bisquare robustness passes.
///
/// `x` must be sorted ascending. `span` is the fraction of points used in
/// each local fit. Returns fitted values aligned with `x`.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let window = ((span * n as f64).ceil() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for pass in 0..=iterations {
        let mut left = 0usize;
        for i in 0..n {
            // slide the window so it holds the `window` nearest neighbours of x[i]
            while left + window < n && x[i] - x[left] > x[left + window] - x[i] {
                left += 1;
            }
            let right = left + window - 1;
            let h = (x[i] - x[left]).max(x[right] - x[i]);
            fitted[i] = local_linear(x, y, &robustness, left, right, x[i], h).unwrap_or(y[i]);
        }

        if pass == iterations {
            break;
        }
        let residuals: Vec<f64> = (0..n).map(|i| (y[i] - fitted[i]).abs()).collect();
        let scale = 6.0 * median(&residuals);
        if scale <= 0.0 {
            break;
        }
        for (r, res) in robustness.iter_mut().zip(&residuals) {
            let u = res / scale;
            *r = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn local_linear(
    x: &[f64],
    y: &[f64],
    robustness: &[f64],
    left: usize,
    right: usize,
    at: f64,
    h: f64,
) -> Option<f64> {
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut weights = Vec::with_capacity(right - left + 1);
    for j in left..=right {
        let w = if h > 0.0 {
            let u = ((x[j] - at).abs() / h).min(1.0);
            let t = 1.0 - u * u * u;
            if u >= 0.999 { 0.0 } else { t * t * t }
        } else {
            1.0
        } * robustness[j];
        weights.push(w);
        sw += w;
        sx += w * x[j];
        sy += w * y[j];
    }
    if sw <= 0.0 {
        return None;
    }
    let xbar = sx / sw;
    let ybar = sy / sw;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (k, j) in (left..=right).enumerate() {
        sxx += weights[k] * (x[j] - xbar).powi(2);
        sxy += weights[k] * (x[j] - xbar) * (y[j] - ybar);
    }
    let range = x[x.len() - 1] - x[0];
    if sxx.sqrt() > 1e-3 * range * sw.sqrt() && sxx > 0.0 {
        Some(ybar + sxy / sxx * (at - xbar))
    } else {
        Some(ybar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_sorted_interpolates() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&x, 0.0), 1.0);
        assert_eq!(quantile_sorted(&x, 1.0), 4.0);
        assert!((quantile_sorted(&x, 0.5) - 2.5).abs() < 1e-12);
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn test_mad_of_symmetric_values() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        // median 3, absolute deviations 2,1,0,1,2 -> median 1
        assert!((mad(&x) - MAD_SCALE).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean_drops_tails() {
        let x = vec![-100.0, 1.0, 2.0, 3.0, 100.0];
        assert!((trimmed_mean(&x, 0.2) - 2.0).abs() < 1e-12);
        assert!((trimmed_mean(&x, 0.0) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-8);
        // trigamma(0.5) = pi^2 / 2
        assert!((trigamma(0.5) - 3.0 * pi2_6).abs() < 1e-8);
        // trigamma(x + 1) = trigamma(x) - 1/x^2
        assert!((trigamma(3.5) - (trigamma(2.5) - 1.0 / 6.25)).abs() < 1e-10);
    }

    #[test]
    fn test_weighted_quantile_uniform_weights_match_median() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0; 5];
        assert!((weighted_quantile(&x, &w, 0.5) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_quantile_follows_heavy_weight() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0, 1.0, 1.0, 1.0, 100.0];
        assert!(weighted_quantile(&x, &w, 0.5) >= 4.0);
    }

    #[test]
    fn test_upper_quantile_variance_positive() {
        let x = vec![0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let var = match_weighted_upper_quantile_for_variance(&x, &vec![1.0; 10], 0.05);
        assert!(var > 0.0 && var.is_finite());
        let zeros = match_weighted_upper_quantile_for_variance(&[0.0; 4], &[1.0; 4], 0.05);
        assert_eq!(zeros, 1e-6);
    }

    #[test]
    fn test_lowess_reproduces_a_line() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-8, "{} vs {}", f, t);
        }
    }

    #[test]
    fn test_lowess_resists_single_outlier() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 0.5 * v).collect();
        y[20] = 500.0;
        let fit = lowess(&x, &y, 0.3, 3);
        assert!((fit[20] - 10.0).abs() < 1.0, "outlier leaked into fit: {}", fit[20]);
    }
}

//! Small dense linear algebra for per-gene model fits
//!
//! Matrices here are at most a few coefficients wide, so plain Cholesky
//! routines over `ndarray` are enough.

use ndarray::{Array1, Array2};

/// Lower Cholesky factor of a symmetric matrix.
///
/// Non-positive pivots are replaced with 1e-12 so nearly singular
/// information matrices still give a usable (heavily regularised) factor.
pub fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                l[[i, i]] = if sum > 0.0 { sum.sqrt() } else { 1e-12_f64.sqrt() };
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    l
}

fn forward_back(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `A x = b` for symmetric positive (semi-)definite `A`
pub fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    forward_back(&cholesky(a), b)
}

/// Inverse of a symmetric positive definite matrix via its Cholesky factor
pub fn invert_symmetric(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let l = cholesky(a);
    let mut inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[col] = 1.0;
        inv.column_mut(col).assign(&forward_back(&l, &e));
    }
    inv
}

/// log |A| of a symmetric positive definite matrix
pub fn log_det_symmetric(a: &Array2<f64>) -> f64 {
    let l = cholesky(a);
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

/// `X' diag(w) X`
pub fn weighted_crossprod(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut out = Array2::<f64>::zeros((p, p));
    for (i, row) in x.rows().into_iter().enumerate() {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        for j in 0..p {
            let xij = row[j] * wi;
            if xij == 0.0 {
                continue;
            }
            for k in j..p {
                out[[j, k]] += xij * row[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[[j, k]] = out[[k, j]];
        }
    }
    out
}

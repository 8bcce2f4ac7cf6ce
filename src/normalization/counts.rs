//! Depth-normalized counts

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

fn check_factors(n_samples: usize, size_factors: &Array1<f64>) -> Result<()> {
    if size_factors.len() != n_samples {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} size factors", n_samples),
            got: format!("{} size factors", size_factors.len()),
        });
    }
    if size_factors.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(PipelineError::InvalidInput {
            reason: "size factors must be positive and finite".to_string(),
        });
    }
    Ok(())
}

/// Divide each sample column by its size factor
pub fn normalized_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Result<Array2<f64>> {
    check_factors(counts.ncols(), size_factors)?;
    Ok(&counts / &size_factors.view().insert_axis(Axis(0)))
}

/// Multiply normalized counts back by their size factors
pub fn denormalize(normalized: ArrayView2<f64>, size_factors: &Array1<f64>) -> Result<Array2<f64>> {
    check_factors(normalized.ncols(), size_factors)?;
    Ok(&normalized * &size_factors.view().insert_axis(Axis(0)))
}

/// Column sums of a (normalized or raw) matrix
pub fn column_totals(matrix: ArrayView2<f64>) -> Array1<f64> {
    matrix.sum_axis(Axis(0))
}

//! Shifted log2 of raw and normalized counts

use ndarray::{Array1, Array2};

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};
use crate::normalization::normalized_counts;

/// `log2(x + pseudocount)` of raw and of normalized counts
#[derive(Debug, Clone)]
pub struct LogCounts {
    pub raw: Array2<f64>,
    pub normalized: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub pseudocount: f64,
}

pub fn log2_counts(counts: &CountMatrix, size_factors: &Array1<f64>, pseudocount: f64) -> Result<LogCounts> {
    if !(pseudocount > 0.0 && pseudocount.is_finite()) {
        return Err(PipelineError::InvalidInput {
            reason: format!("pseudocount must be positive, got {}", pseudocount),
        });
    }
    let normalized = normalized_counts(counts.counts(), size_factors)?;
    Ok(LogCounts {
        raw: counts.counts().mapv(|x| (x + pseudocount).log2()),
        normalized: normalized.mapv(|x| (x + pseudocount).log2()),
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        pseudocount,
    })
}

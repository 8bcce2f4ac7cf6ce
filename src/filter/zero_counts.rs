//! Removal of genes without a single read

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Genes kept by the zero-count filter and the ids that were dropped
#[derive(Debug, Clone)]
pub struct ZeroCountFilter {
    pub kept: CountMatrix,
    pub removed: Vec<String>,
}

/// Keep the genes whose total count across samples is above zero.
///
/// Applying the filter to its own output changes nothing. A matrix with no
/// surviving genes is reported as [`PipelineError::EmptyData`].
pub fn remove_zero_count_genes(counts: &CountMatrix) -> Result<ZeroCountFilter> {
    let sums = counts.row_sums();
    let (keep, drop): (Vec<usize>, Vec<usize>) = (0..counts.n_genes()).partition(|&g| sums[g] > 0.0);

    if keep.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("all {} genes have zero counts in every sample", counts.n_genes()),
        });
    }

    let removed: Vec<String> = drop.iter().map(|&g| counts.gene_ids()[g].clone()).collect();
    log::info!(
        "Zero-count filter: kept {} genes, removed {}",
        keep.len(),
        removed.len()
    );
    Ok(ZeroCountFilter {
        kept: counts.subset_genes(&keep)?,
        removed,
    })
}

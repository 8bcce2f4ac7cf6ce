//! Principal components of the most variable genes

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_reduction::Pca;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{PipelineError, Result};
use crate::stats::sample_variance;

/// Number of most variable genes used by default
pub const DEFAULT_TOP_GENES: usize = 500;

/// Component variances below this fraction of the total are treated as zero
const ZERO_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    /// samples × components
    pub scores: Array2<f64>,
    /// Variance of each component
    pub variances: Array1<f64>,
    /// Percent of the total variance per component
    pub percent_variance: Array1<f64>,
    /// Rows of the input matrix that were used
    pub genes_used: Vec<usize>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }

    /// Scores of every sample on component `k` (0-based)
    pub fn component(&self, k: usize) -> Option<Vec<f64>> {
        (k < self.n_components()).then(|| self.scores.column(k).to_vec())
    }
}

/// Indices of the `top_k` rows with the largest variance, ties in row order
pub fn most_variable_genes(matrix: ArrayView2<f64>, top_k: usize) -> Vec<usize> {
    let variances: Vec<f64> = matrix
        .rows()
        .into_iter()
        .map(|row| sample_variance(&row.to_vec()))
        .collect();
    let mut order: Vec<usize> = (0..variances.len()).filter(|&g| variances[g].is_finite()).collect();
    order.sort_by(|&a, &b| {
        variances[b]
            .partial_cmp(&variances[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(top_k);
    order
}

/// PCA of the samples (columns) over the `top_k` most variable genes.
///
/// Samples are the observations and the selected genes the features. Every
/// component with positive variance is reported, largest first, with signs
/// fixed so the largest-magnitude score of each component is positive.
pub fn pca(matrix: ArrayView2<f64>, sample_ids: &[String], top_k: usize) -> Result<PcaResult> {
    let (n_genes, n_samples) = matrix.dim();
    if n_samples < 2 {
        return Err(PipelineError::InsufficientSamples {
            needed: 2,
            got: n_samples,
        });
    }
    if sample_ids.len() != n_samples {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} sample ids", n_samples),
            got: format!("{} sample ids", sample_ids.len()),
        });
    }
    if top_k == 0 {
        return Err(PipelineError::InvalidInput {
            reason: "PCA needs at least one gene (top_k = 0)".to_string(),
        });
    }
    let genes = most_variable_genes(matrix, top_k.min(n_genes));
    if genes.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no genes with finite variance for PCA".to_string(),
        });
    }
    log::info!("PCA on the {} most variable genes", genes.len());

    // samples × genes
    let records = matrix.select(Axis(0), &genes).t().to_owned();
    let means = records.mean_axis(Axis(0)).ok_or_else(|| PipelineError::EmptyData {
        reason: "no samples".to_string(),
    })?;
    let total_ss: f64 = (&records - &means).iter().map(|v| v * v).sum();
    let total = total_ss / (n_samples - 1) as f64;
    if !(total > 0.0) {
        return Err(PipelineError::InvalidInput {
            reason: "the selected genes have no variance across samples".to_string(),
        });
    }

    let n_components = (n_samples - 1).min(genes.len()).max(1);
    let model = Pca::params(n_components)
        .fit(&DatasetBase::from(records.clone()))
        .map_err(|e| PipelineError::InvalidInput {
            reason: format!("PCA failed: {}", e),
        })?;
    let embedding: Array2<f64> = model.predict(&records);

    let column_variance: Vec<f64> = embedding
        .columns()
        .into_iter()
        .map(|col| sample_variance(&col.to_vec()))
        .collect();
    let mut keep: Vec<usize> = (0..column_variance.len())
        .filter(|&k| column_variance[k] > ZERO_VARIANCE * total)
        .collect();
    keep.sort_by(|&a, &b| column_variance[b].total_cmp(&column_variance[a]));

    let mut scores = Array2::zeros((n_samples, keep.len()));
    for (out, &k) in keep.iter().enumerate() {
        let column = embedding.column(k);
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        for (s, v) in column.iter().enumerate() {
            scores[[s, out]] = sign * v;
        }
    }

    let variances: Array1<f64> = keep.iter().map(|&k| column_variance[k]).collect();
    let percent_variance: Array1<f64> = variances.mapv(|v| 100.0 * v / total);
    if let (Some(pc1), Some(pc2)) = (percent_variance.get(0), percent_variance.get(1)) {
        log::info!("PC1 {:.1}%, PC2 {:.1}%", pc1, pc2);
    }

    Ok(PcaResult {
        sample_ids: sample_ids.to_vec(),
        scores,
        variances,
        percent_variance,
        genes_used: genes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("S_{}", i)).collect()
    }

    #[test]
    fn test_top_genes_by_variance_with_ties_in_order() {
        let m = array![[1.0, 1.0, 1.0], [0.0, 5.0, 10.0], [0.0, 1.0, 2.0], [10.0, 5.0, 0.0]];
        assert_eq!(most_variable_genes(m.view(), 2), vec![1, 3]);
        assert_eq!(most_variable_genes(m.view(), 10), vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_two_groups_split_on_pc1() {
        let m = array![
            [10.0, 10.5, 9.5, 2.0, 2.5, 1.5],
            [1.0, 1.2, 0.8, 8.0, 8.2, 7.8],
            [5.0, 5.1, 4.9, 5.0, 5.2, 4.8]
        ];
        let res = pca(m.view(), &ids(6), 500).unwrap();
        assert_eq!(res.genes_used.len(), 3);
        let pc1 = res.component(0).unwrap();
        assert!(pc1[0].signum() == pc1[1].signum() && pc1[1].signum() == pc1[2].signum());
        assert!(pc1[0].signum() != pc1[3].signum());
        assert!(res.percent_variance[0] > 90.0);
        let total: f64 = res.percent_variance.sum();
        assert!((total - 100.0).abs() < 1e-9);
        let pivot = pc1.iter().copied().fold(0.0_f64, |a, v| if v.abs() > a.abs() { v } else { a });
        assert!(pivot > 0.0);
    }

    #[test]
    fn test_component_variance_matches_score_variance() {
        let m = array![[1.0, 4.0, 2.0, 8.0], [3.0, 1.0, 0.0, 2.0]];
        let res = pca(m.view(), &ids(4), 2).unwrap();
        for k in 0..res.n_components() {
            let col = res.component(k).unwrap();
            assert!((sample_variance(&col) - res.variances[k]).abs() < 1e-9);
        }
        assert!(res.n_components() <= 3);
    }

    #[test]
    fn test_scores_reproduce_sample_distances() {
        let m = array![
            [2.0, 4.0, 6.0, 9.0, 1.0],
            [1.0, 1.5, 0.5, 3.0, 2.0],
            [7.0, 5.0, 6.0, 2.0, 8.0],
            [0.0, 2.0, 1.0, 1.0, 3.0]
        ];
        let res = pca(m.view(), &ids(5), 500).unwrap();
        assert!(res.n_components() <= 4);
        let total: f64 = res.percent_variance.sum();
        assert!((total - 100.0).abs() < 1e-6);
        for w in res.variances.to_vec().windows(2) {
            assert!(w[0] >= w[1]);
        }
        // All components together keep the Euclidean geometry of the samples
        for a in 0..5 {
            for b in (a + 1)..5 {
                let raw: f64 = m.column(a).iter().zip(m.column(b)).map(|(x, y)| (x - y).powi(2)).sum();
                let projected: f64 = res
                    .scores
                    .row(a)
                    .iter()
                    .zip(res.scores.row(b))
                    .map(|(x, y)| (x - y).powi(2))
                    .sum();
                assert!((raw - projected).abs() < 1e-6 * raw.max(1.0));
            }
        }
    }

    #[test]
    fn test_constant_genes_rejected() {
        let m = array![[3.0, 3.0, 3.0], [1.0, 1.0, 1.0]];
        assert!(matches!(
            pca(m.view(), &ids(3), 10),
            Err(PipelineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let m = array![[1.0, 2.0], [3.0, 5.0]];
        assert!(pca(m.view(), &ids(2), 0).is_err());
        assert!(pca(m.column(0).insert_axis(Axis(1)), &ids(1), 5).is_err());
    }
}

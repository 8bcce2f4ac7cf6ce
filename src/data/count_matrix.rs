//! Gene × sample read-count matrix

use std::collections::HashSet;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

fn first_duplicate(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .map(|s| s.as_str())
}

/// Raw read counts, rows are genes and columns are samples.
///
/// Every cell is a finite non-negative integer stored as `f64`, gene ids and
/// sample ids are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if n_samples == 0 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "no sample columns".to_string(),
            });
        }

        if let Some(((gene, sample), value)) = counts
            .indexed_iter()
            .find(|(_, &x)| !x.is_finite() || x < 0.0 || x.fract() != 0.0)
        {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!(
                    "count for gene '{}' in sample '{}' is {}, expected a non-negative integer",
                    gene_ids[gene], sample_ids[sample], value
                ),
            });
        }

        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("duplicate gene identifier '{}'", dup),
            });
        }
        if let Some(dup) = first_duplicate(&sample_ids) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!("duplicate sample identifier '{}'", dup),
            });
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn from_integers(counts: Array2<u64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        Self::new(counts.mapv(|x| x as f64), gene_ids, sample_ids)
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Total count per gene
    pub fn row_sums(&self) -> Array1<f64> {
        self.counts.sum_axis(Axis(1))
    }

    /// Total count per sample
    pub fn library_sizes(&self) -> Array1<f64> {
        self.counts.sum_axis(Axis(0))
    }

    /// Keep only the listed genes, in the given order
    pub fn subset_genes(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_genes()) {
            return Err(PipelineError::InvalidInput {
                reason: format!("gene index {} out of range ({} genes)", bad, self.n_genes()),
            });
        }
        let counts = self.counts.select(Axis(0), indices);
        let gene_ids = indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Ok(Self {
            counts,
            gene_ids,
            sample_ids: self.sample_ids.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_accessors() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let cm = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();

        assert_eq!(cm.n_genes(), 2);
        assert_eq!(cm.n_samples(), 3);
        assert_eq!(cm.row_sums(), array![60.0, 45.0]);
        assert_eq!(cm.library_sizes(), array![15.0, 35.0, 55.0]);
        assert_eq!(cm.gene_index("gene2"), Some(1));
    }

    #[test]
    fn test_rejects_negative_and_fractional_counts() {
        let err = CountMatrix::new(array![[1.0, -1.0]], ids("g", 1), ids("s", 2));
        assert!(matches!(err, Err(PipelineError::InvalidCountMatrix { .. })));

        let err = CountMatrix::new(array![[1.5, 2.0]], ids("g", 1), ids("s", 2));
        assert!(matches!(err, Err(PipelineError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let genes = vec!["a".to_string(), "a".to_string()];
        let err = CountMatrix::new(array![[1.0], [2.0]], genes, ids("s", 1));
        assert!(matches!(err, Err(PipelineError::InvalidCountMatrix { .. })));

        let samples = vec!["x".to_string(), "x".to_string()];
        let err = CountMatrix::new(array![[1.0, 2.0]], ids("g", 1), samples);
        assert!(matches!(err, Err(PipelineError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = CountMatrix::new(array![[1.0, 2.0]], ids("g", 2), ids("s", 2));
        assert!(matches!(err, Err(PipelineError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_all_zero_matrix_is_valid_input() {
        let cm = CountMatrix::new(Array2::zeros((2, 2)), ids("g", 2), ids("s", 2)).unwrap();
        assert_eq!(cm.row_sums().sum(), 0.0);
    }

    #[test]
    fn test_subset_genes() {
        let counts = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let cm = CountMatrix::new(counts, ids("g", 3), ids("s", 2)).unwrap();
        let sub = cm.subset_genes(&[2, 0]).unwrap();
        assert_eq!(sub.gene_ids(), &["g3".to_string(), "g1".to_string()]);
        assert_eq!(sub.counts(), array![[5.0, 6.0], [1.0, 2.0]]);
        assert!(cm.subset_genes(&[3]).is_err());
    }
}

//! CountDataSet: counts plus everything estimated from them

use ndarray::{Array1, Array2, Axis};

use super::{CountMatrix, SampleTable};
use crate::dispersion::DispersionEstimates;
use crate::error::{PipelineError, Result};
use crate::glm::{Design, GlmFit};

/// Filtered counts, their sample table and the model design, together with
/// the per-stage estimates as they become available.
///
/// Setting size factors clears everything downstream of them, so the
/// estimates always belong to the current counts.
#[derive(Debug, Clone)]
pub struct CountDataSet {
    counts: CountMatrix,
    samples: SampleTable,
    design: Design,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    dispersions: Option<DispersionEstimates>,

    /// Unpenalised fit, kept for the MLE fold change column
    mle_fit: Option<GlmFit>,
    /// Fit used for testing (shrunken when LFC shrinkage is on)
    fit: Option<GlmFit>,
}

fn missing(what: &str) -> PipelineError {
    PipelineError::InvalidInput {
        reason: format!("{} not estimated yet", what),
    }
}

impl CountDataSet {
    pub fn new(counts: CountMatrix, samples: SampleTable, design: Design) -> Result<Self> {
        if counts.sample_ids() != samples.sample_ids() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("sample columns {:?}", counts.sample_ids()),
                got: format!("sample table {:?}", samples.sample_ids()),
            });
        }
        if design.n_samples() != counts.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} design rows", counts.n_samples()),
                got: format!("{} design rows", design.n_samples()),
            });
        }
        Ok(Self {
            counts,
            samples,
            design,
            size_factors: None,
            normalized_counts: None,
            dispersions: None,
            mle_fit: None,
            fit: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn require_size_factors(&self) -> Result<&Array1<f64>> {
        self.size_factors.as_ref().ok_or_else(|| missing("size factors"))
    }

    /// Store size factors and the normalized counts derived from them
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        let normalized = crate::normalization::normalized_counts(self.counts.counts(), &size_factors)?;
        self.size_factors = Some(size_factors);
        self.normalized_counts = Some(normalized);
        self.dispersions = None;
        self.mle_fit = None;
        self.fit = None;
        Ok(())
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn require_normalized_counts(&self) -> Result<&Array2<f64>> {
        self.normalized_counts
            .as_ref()
            .ok_or_else(|| missing("normalized counts"))
    }

    /// Mean of normalized counts per gene
    pub fn base_means(&self) -> Result<Array1<f64>> {
        let norm = self.require_normalized_counts()?;
        norm.mean_axis(Axis(1)).ok_or_else(|| PipelineError::EmptyData {
            reason: "no samples to average".to_string(),
        })
    }

    pub fn dispersions(&self) -> Option<&DispersionEstimates> {
        self.dispersions.as_ref()
    }

    pub fn require_dispersions(&self) -> Result<&DispersionEstimates> {
        self.dispersions.as_ref().ok_or_else(|| missing("dispersions"))
    }

    pub fn set_dispersions(&mut self, dispersions: DispersionEstimates) -> Result<()> {
        if dispersions.len() != self.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} dispersions", self.n_genes()),
                got: format!("{} dispersions", dispersions.len()),
            });
        }
        self.dispersions = Some(dispersions);
        self.mle_fit = None;
        self.fit = None;
        Ok(())
    }

    pub fn mle_fit(&self) -> Option<&GlmFit> {
        self.mle_fit.as_ref()
    }

    pub fn fit(&self) -> Option<&GlmFit> {
        self.fit.as_ref()
    }

    pub fn require_fit(&self) -> Result<&GlmFit> {
        self.fit.as_ref().ok_or_else(|| missing("GLM coefficients"))
    }

    pub fn set_mle_fit(&mut self, fit: GlmFit) {
        self.mle_fit = Some(fit);
    }

    pub fn set_fit(&mut self, fit: GlmFit) {
        self.fit = Some(fit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy() -> CountDataSet {
        let samples: Vec<String> = ["A_1", "A_2", "B_1", "B_2"].iter().map(|s| s.to_string()).collect();
        let counts = CountMatrix::new(
            array![[10.0, 12.0, 30.0, 28.0], [5.0, 6.0, 5.0, 4.0]],
            vec!["g1".to_string(), "g2".to_string()],
            samples.clone(),
        )
        .unwrap();
        let table = SampleTable::from_sample_names(&samples).unwrap();
        let design = Design::for_contrast(&table, "B", "A").unwrap();
        CountDataSet::new(counts, table, design).unwrap()
    }

    #[test]
    fn test_requires_estimates_in_order() {
        let mut dds = toy();
        assert!(dds.require_size_factors().is_err());
        assert!(dds.base_means().is_err());

        dds.set_size_factors(array![1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(dds.base_means().unwrap(), array![20.0, 5.0]);
        assert!(dds.require_dispersions().is_err());
        assert!(dds.require_fit().is_err());
    }

    #[test]
    fn test_rejects_mismatched_samples() {
        let dds = toy();
        let other: Vec<String> = ["A_1", "A_2", "B_1", "C_1"].iter().map(|s| s.to_string()).collect();
        let table = SampleTable::from_sample_names(&other).unwrap();
        let err = CountDataSet::new(dds.counts().clone(), table, dds.design().clone());
        assert!(matches!(err, Err(PipelineError::DimensionMismatch { .. })));
    }
}

//! Median-of-ratios size factors

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::median;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Reference built from genes with no zero count
    #[default]
    Ratio,
    /// Reference built from the positive counts of every gene
    Poscounts,
}

impl std::str::FromStr for SizeFactorMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(Self::Ratio),
            "poscounts" => Ok(Self::Poscounts),
            other => Err(PipelineError::InvalidConfig {
                reason: format!("unknown size factor method '{}' (ratio, poscounts)", other),
            }),
        }
    }
}

/// Estimate size factors and store them (and the normalized counts) on the
/// dataset.
pub fn estimate_size_factors(dds: &mut CountDataSet, method: SizeFactorMethod) -> Result<()> {
    let size_factors = match method {
        SizeFactorMethod::Ratio => median_of_ratios(dds.counts().counts())?,
        SizeFactorMethod::Poscounts => positive_counts_size_factors(dds.counts().counts())?,
    };
    log::info!(
        "Size factors ({:?}): {}",
        method,
        size_factors
            .iter()
            .map(|s| format!("{:.4}", s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    dds.set_size_factors(size_factors)
}

/// Per-sample median of `count / reference`, where the reference of a gene
/// is its geometric mean over samples. Only genes with no zero count take
/// part. The factors are rescaled to a geometric mean of 1.
pub fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let usable: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&c| c > 0.0))
        .map(|(g, row)| (g, row.iter().map(|c| c.ln()).sum::<f64>() / n_samples as f64))
        .collect();

    if usable.is_empty() {
        return Err(PipelineError::SizeFactorFailed {
            reason: "every gene contains at least one zero count; try the poscounts method".to_string(),
        });
    }
    log::debug!("{} of {} genes form the size factor reference", usable.len(), n_genes);

    let factors = Array1::from_iter((0..n_samples).map(|j| {
        let log_ratios: Vec<f64> = usable.iter().map(|&(g, log_ref)| counts[[g, j]].ln() - log_ref).collect();
        median(&log_ratios).exp()
    }));
    recenter(factors)
}

/// Size factors for matrices where every gene has a zero: the reference is
/// `exp(sum(log(positive counts)) / n_samples)` and ratios use only
/// positive counts.
pub fn positive_counts_size_factors(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let references: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&c| c > 0.0))
        .map(|(g, row)| {
            let log_sum: f64 = row.iter().filter(|&&c| c > 0.0).map(|c| c.ln()).sum();
            (g, log_sum / n_samples as f64)
        })
        .collect();

    let mut factors = Array1::<f64>::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = references
            .iter()
            .filter(|&&(g, _)| counts[[g, j]] > 0.0)
            .map(|&(g, log_ref)| (counts[[g, j]].ln() - log_ref).exp())
            .collect();
        if ratios.is_empty() {
            return Err(PipelineError::SizeFactorFailed {
                reason: format!("sample {} has no positive counts", j + 1),
            });
        }
        factors[j] = median(&ratios);
    }
    recenter(factors)
}

/// Divide by the geometric mean so the factors multiply to 1
fn recenter(factors: Array1<f64>) -> Result<Array1<f64>> {
    if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return Err(PipelineError::SizeFactorFailed {
            reason: format!("non-positive size factor in {:?}", factors.to_vec()),
        });
    }
    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / factors.len() as f64;
    Ok(factors.mapv(|f| (f.ln() - log_mean).exp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn geometric_mean(x: &Array1<f64>) -> f64 {
        (x.iter().map(|v| v.ln()).sum::<f64>() / x.len() as f64).exp()
    }

    #[test]
    fn test_size_factors_track_depth() {
        // sample 2 sequenced twice as deep as sample 1
        let counts = array![[10.0, 20.0], [30.0, 60.0], [50.0, 100.0]];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-12);
        assert!((geometric_mean(&sf) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_geometric_mean_is_one_with_zeros_present() {
        let counts = array![
            [0.0, 5.0, 9.0, 3.0],
            [13.0, 7.0, 40.0, 22.0],
            [100.0, 80.0, 250.0, 95.0],
            [7.0, 0.0, 1.0, 4.0],
            [55.0, 31.0, 120.0, 60.0],
        ];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((geometric_mean(&sf) - 1.0).abs() < 1e-12);
        assert!(sf.iter().all(|s| *s > 0.0));
    }

    #[test]
    fn test_fails_when_every_gene_has_a_zero() {
        let counts = array![[0.0, 5.0], [4.0, 0.0]];
        assert!(matches!(
            median_of_ratios(counts.view()),
            Err(PipelineError::SizeFactorFailed { .. })
        ));
        let sf = positive_counts_size_factors(counts.view()).unwrap();
        assert!((geometric_mean(&sf) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("Ratio".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::Ratio);
        assert_eq!("poscounts".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::Poscounts);
        assert!("tmm".parse::<SizeFactorMethod>().is_err());
    }
}

//! Statistical testing for differential expression
//!
//! `results` turns a fitted dataset into the final table:
//! 1. Wald statistics of the contrast coefficient from the MLE fit, with the
//!    shrunken fold change reported when one is stored.
//! 2. Cook's distance outliers keep their p-value but are left out of the
//!    adjustment.
//! 3. BH adjustment, with or without independent filtering.
//! 4. Records sorted by adjusted p-value.

mod fdr;
mod wald;

pub use fdr::benjamini_hochberg;
pub use wald::{normal_pvalue, t_pvalue, wald_test, WaldStatistics};

use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{PipelineError, Result};
use crate::filter::{
    cooks_distances, cooks_outliers, default_cooks_cutoff, has_cooks_replicates, independent_filtering,
    unfiltered_adjustment,
};
use crate::io::{DeRecord, DeTable};

/// Options of one results extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsOptions {
    /// Significance level for independent filtering and summaries
    pub alpha: f64,
    pub lfc_threshold: f64,
    /// Student t reference with residual degrees of freedom
    pub use_t: bool,
    pub independent_filtering: bool,
    pub cooks_filter: bool,
    /// Cook's distance cutoff; `None` uses the 99% F quantile
    pub cooks_cutoff: Option<f64>,
}

impl Default for ResultsOptions {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            lfc_threshold: 0.0,
            use_t: false,
            independent_filtering: true,
            cooks_filter: true,
            cooks_cutoff: None,
        }
    }
}

/// Build the results table of the dataset's contrast
pub fn results(dds: &CountDataSet, options: &ResultsOptions) -> Result<DeTable> {
    if !(options.alpha > 0.0 && options.alpha < 1.0) {
        return Err(PipelineError::InvalidConfig {
            reason: format!("alpha must be in (0, 1), got {}", options.alpha),
        });
    }
    let design = dds.design();
    let (numerator, denominator) = design.contrast().ok_or_else(|| PipelineError::InvalidInput {
        reason: "results need a two-level contrast design".to_string(),
    })?;
    let coef = design.contrast_coef()?;
    let mle = dds.mle_fit().ok_or_else(|| PipelineError::InvalidInput {
        reason: "GLM not fitted yet".to_string(),
    })?;
    let base_means = dds.base_means()?.to_vec();
    let dispersions = &dds.require_dispersions()?.dispersions;

    let t_df = options.use_t.then(|| design.residual_df() as f64);
    let wald = wald_test(mle, dds.fit(), coef, &base_means, options.lfc_threshold, t_df);

    let outliers = if options.cooks_filter && has_cooks_replicates(design) {
        let cooks = cooks_distances(dds.counts().counts(), dds.require_normalized_counts()?.view(), mle, design);
        let cutoff = options
            .cooks_cutoff
            .unwrap_or_else(|| default_cooks_cutoff(dds.n_samples(), design.n_coefs()));
        let flags = cooks_outliers(dds.counts().counts(), &cooks, design, cutoff);
        log::info!(
            "Cook's distance cutoff {:.3}: {} outlier genes",
            cutoff,
            flags.iter().filter(|&&f| f).count()
        );
        flags
    } else {
        log::debug!("Cook's outlier check skipped");
        vec![false; dds.n_genes()]
    };

    let tested: Vec<f64> = wald
        .pvalue
        .iter()
        .zip(&outliers)
        .map(|(&p, &out)| if out { f64::NAN } else { p })
        .collect();
    let adjusted = if options.independent_filtering {
        independent_filtering(&base_means, &tested, options.alpha)
    } else {
        unfiltered_adjustment(&base_means, &tested)
    };

    let records: Vec<DeRecord> = dds
        .counts()
        .gene_ids()
        .iter()
        .enumerate()
        .map(|(g, gene_id)| DeRecord {
            gene_id: gene_id.clone(),
            base_mean: base_means[g],
            log2_fold_change: wald.log2_fold_change[g],
            lfc_mle: wald.lfc_mle[g],
            lfc_se: wald.lfc_se[g],
            stat: wald.stat[g],
            pvalue: wald.pvalue[g],
            padj: adjusted.padj[g],
            dispersion: dispersions[g],
            cooks_outlier: outliers[g],
            filtered: adjusted.filtered[g],
        })
        .collect();

    let mut table = DeTable::new(numerator, denominator, records, adjusted.threshold);
    table.sort_by_padj();
    let significant = table.records().iter().filter(|r| r.is_significant(options.alpha)).count();
    log::info!(
        "{} vs {}: {} of {} genes with padj < {}",
        numerator,
        denominator,
        significant,
        table.len(),
        options.alpha
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleTable};
    use crate::dispersion::{estimate_dataset_dispersions, DispersionParams, TrendFitType};
    use crate::glm::{fit_dataset, Design};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::rng::SeededRng;
    use crate::shrinkage::{shrink_lfc_normal, DEFAULT_UPPER_QUANTILE};
    use ndarray::Array2;

    /// 300 genes in A_1..A_4 vs B_1..B_4; the first 30 are 4-fold up in B
    /// and gene 299 carries one extreme count
    fn fitted(shrink: bool) -> CountDataSet {
        let names: Vec<String> = ["A_1", "A_2", "A_3", "A_4", "B_1", "B_2", "B_3", "B_4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rng = SeededRng::new(11);
        let mut counts = Array2::from_shape_fn((300, 8), |(g, s)| {
            let base = 30.0 + 20.0 * (g % 13) as f64;
            let mean = if g < 30 && s >= 4 { 4.0 * base } else { base };
            rng.negative_binomial(mean, 0.05)
        });
        counts[[299, 1]] = 5000.0;
        let genes = (0..300).map(|g| format!("gene{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, names.clone()).unwrap();
        let table = SampleTable::from_sample_names(&names).unwrap();
        let design = Design::for_contrast(&table, "B", "A").unwrap();
        let mut dds = CountDataSet::new(matrix, table, design).unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dataset_dispersions(&mut dds, TrendFitType::Parametric, &DispersionParams::default()).unwrap();
        fit_dataset(&mut dds).unwrap();
        if shrink {
            shrink_lfc_normal(&mut dds, DEFAULT_UPPER_QUANTILE).unwrap();
        }
        dds
    }

    #[test]
    fn test_one_row_per_gene_and_padj_bounds() {
        let dds = fitted(true);
        let table = results(&dds, &ResultsOptions::default()).unwrap();
        assert_eq!(table.len(), 300);
        let mut ids: Vec<&str> = table.records().iter().map(|r| r.gene_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 300);
        for r in table.records() {
            if r.padj.is_finite() {
                assert!(r.padj >= r.pvalue && r.padj <= 1.0);
            }
        }
        assert_eq!(table.contrast(), ("B", "A"));
    }

    #[test]
    fn test_true_changes_are_found_and_shrunk() {
        let dds = fitted(true);
        let table = results(&dds, &ResultsOptions::default()).unwrap();
        let up = table.upregulated(0.05);
        let true_hits = up
            .iter()
            .filter(|r| r.gene_id[4..].parse::<usize>().map_or(false, |g| g < 30))
            .count();
        assert!(true_hits >= 20, "found {} of 30", true_hits);
        for r in table.records() {
            if r.lfc_mle.is_finite() && r.lfc_mle.abs() > 0.5 {
                assert!(r.log2_fold_change.abs() <= r.lfc_mle.abs() + 1e-6);
            }
        }
    }

    #[test]
    fn test_outlier_keeps_pvalue_without_padj() {
        let dds = fitted(false);
        let table = results(&dds, &ResultsOptions::default()).unwrap();
        let spiked = table.get("gene299").unwrap();
        assert!(spiked.cooks_outlier);
        assert!(spiked.pvalue.is_finite());
        assert!(spiked.padj.is_nan());
        // without shrinkage the reported fold change is the MLE
        assert_eq!(spiked.log2_fold_change, spiked.lfc_mle);

        let unchecked = results(
            &dds,
            &ResultsOptions {
                cooks_filter: false,
                ..ResultsOptions::default()
            },
        )
        .unwrap();
        assert!(!unchecked.get("gene299").unwrap().cooks_outlier);
    }

    #[test]
    fn test_rejects_bad_alpha_and_missing_fit() {
        let dds = fitted(false);
        let bad = ResultsOptions {
            alpha: 1.5,
            ..ResultsOptions::default()
        };
        assert!(matches!(results(&dds, &bad), Err(PipelineError::InvalidConfig { .. })));

        let mut refit = dds.clone();
        refit.set_size_factors(dds.require_size_factors().unwrap().clone()).unwrap();
        assert!(results(&refit, &ResultsOptions::default()).is_err());
    }
}

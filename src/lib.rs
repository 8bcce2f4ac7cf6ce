//! rnaseq_explorer: exploratory RNA-seq analysis in Rust
//!
//! Takes a gene-by-sample count table through filtering, median-of-ratios
//! normalization, log and rlog transforms, sample clustering and PCA, a
//! negative binomial Wald test between two conditions, and gene set
//! enrichment (GSEA and over-representation). Every stage writes TSV tables
//! and SVG figures.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_explorer::prelude::*;
//! use std::path::Path;
//!
//! let mut config = PipelineConfig::new("counts.csv");
//! config.numerator = Some("KO".to_string());
//! config.denominator = Some("WT".to_string());
//!
//! let output = Pipeline::new(config).run()?;
//! write_outputs(&output, Path::new("results"))?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod explore;
pub mod filter;
pub mod glm;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod rng;
pub mod shrinkage;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EnrichmentConfig, PipelineConfig};
    pub use crate::data::{CountDataSet, CountMatrix, SampleTable};
    pub use crate::dispersion::{estimate_dataset_dispersions, DispersionParams, TrendFitType};
    pub use crate::enrichment::{gsea, over_representation, GeneSetCollection, GseaTable, OntologyScope, OraTable};
    pub use crate::error::{PipelineError, Result};
    pub use crate::explore::{pca, PcaResult, SampleCorrelation};
    pub use crate::filter::remove_zero_count_genes;
    pub use crate::glm::{fit_dataset, Design};
    pub use crate::io::{read_count_matrix, DeRecord, DeTable};
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::pipeline::{write_outputs, Pipeline, PipelineOutput};
    pub use crate::plot::PlotKind;
    pub use crate::shrinkage::shrink_lfc_normal;
    pub use crate::testing::{results, ResultsOptions};
    pub use crate::transform::{log2_counts, rlog, LogCounts, RlogMatrix};
}

use prelude::*;

/// Differential expression on an in-memory dataset: size factors (unless
/// already set), dispersions, GLM fits, normal-prior shrinkage and the
/// results table.
pub fn differential_expression(dds: &mut CountDataSet, options: &ResultsOptions) -> Result<DeTable> {
    if dds.size_factors().is_none() {
        estimate_size_factors(dds, SizeFactorMethod::Ratio)?;
    }
    estimate_dataset_dispersions(dds, TrendFitType::Parametric, &DispersionParams::default())?;
    fit_dataset(dds)?;
    shrink_lfc_normal(dds, shrinkage::DEFAULT_UPPER_QUANTILE)?;
    results(dds, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_differential_expression_in_memory() {
        let counts = CountMatrix::new(
            array![
                [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],  // up
                [500.0, 520.0, 480.0, 500.0, 510.0, 490.0], // flat
                [300.0, 310.0, 290.0, 75.0, 80.0, 70.0],    // down
                [50.0, 55.0, 45.0, 50.0, 52.0, 48.0],
                [200.0, 220.0, 180.0, 200.0, 210.0, 190.0],
                [150.0, 160.0, 140.0, 300.0, 320.0, 280.0], // up
                [400.0, 420.0, 380.0, 100.0, 110.0, 90.0],  // down
                [80.0, 85.0, 75.0, 80.0, 82.0, 78.0],
                [600.0, 620.0, 580.0, 600.0, 610.0, 590.0],
                [250.0, 260.0, 240.0, 500.0, 520.0, 480.0], // up
            ],
            (1..=10).map(|i| format!("gene{}", i)).collect(),
            ["control_1", "control_2", "control_3", "treated_1", "treated_2", "treated_3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        let samples = SampleTable::from_sample_names(counts.sample_ids()).unwrap();
        let design = Design::for_contrast(&samples, "treated", "control").unwrap();
        let mut dds = CountDataSet::new(counts, samples, design).unwrap();

        let table = differential_expression(&mut dds, &ResultsOptions::default()).unwrap();
        assert_eq!(table.len(), 10);
        let up = table.get("gene1").unwrap();
        let down = table.get("gene3").unwrap();
        assert!(up.lfc_mle > 1.0 && up.log2_fold_change > 0.0);
        assert!(down.lfc_mle < -1.0 && down.log2_fold_change < 0.0);
        assert!(table.get("gene2").unwrap().lfc_mle.abs() < 0.5);
    }
}

//! Run configuration: JSON file, defaults and validation

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispersion::TrendFitType;
use crate::enrichment::{GeneSetSource, GseaParams, OntologyScope};
use crate::error::{PipelineError, Result};
use crate::explore::DEFAULT_TOP_GENES;
use crate::normalization::SizeFactorMethod;
use crate::plot::PlotKind;
use crate::testing::ResultsOptions;

/// Gene set testing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub scope: OntologyScope,
    /// Smallest set tested, after restriction to the ranked genes
    pub min_size: usize,
    pub max_size: usize,
    pub permutations: usize,
    pub seed: u32,
    /// Also run over-representation on the significant genes
    pub ora: bool,
    /// Sets shown in the dot plot and network
    pub top_sets: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            scope: OntologyScope::default(),
            min_size: 10,
            max_size: 500,
            permutations: 1000,
            seed: 42,
            ora: true,
            top_sets: 20,
        }
    }
}

impl EnrichmentConfig {
    pub fn gsea_params(&self) -> GseaParams {
        GseaParams {
            permutations: self.permutations,
            seed: self.seed,
            ..GseaParams::default()
        }
    }
}

/// Everything one pipeline run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub counts: PathBuf,
    pub output_dir: PathBuf,
    /// Condition in the numerator of the fold change
    pub numerator: Option<String>,
    pub denominator: Option<String>,
    pub alpha: f64,
    pub lfc_threshold: f64,
    pub shrink_lfc: bool,
    pub use_t: bool,
    pub independent_filtering: bool,
    /// `None` picks the F-distribution default
    pub cooks_cutoff: Option<f64>,
    pub fit_type: TrendFitType,
    pub size_factor_method: SizeFactorMethod,
    /// Genes used for PCA
    pub top_genes: usize,
    pub rlog_blind: bool,
    pub gene_sets: Vec<GeneSetSource>,
    pub enrichment: EnrichmentConfig,
    pub plots: Vec<PlotKind>,
    /// Worker threads, 0 for the rayon default
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            counts: PathBuf::new(),
            output_dir: PathBuf::from("results"),
            numerator: None,
            denominator: None,
            alpha: 0.05,
            lfc_threshold: 0.0,
            shrink_lfc: true,
            use_t: false,
            independent_filtering: true,
            cooks_cutoff: None,
            fit_type: TrendFitType::Parametric,
            size_factor_method: SizeFactorMethod::Ratio,
            top_genes: DEFAULT_TOP_GENES,
            rlog_blind: true,
            gene_sets: Vec::new(),
            enrichment: EnrichmentConfig::default(),
            plots: PlotKind::ALL.to_vec(),
            threads: 0,
        }
    }
}

impl PipelineConfig {
    pub fn new<P: AsRef<Path>>(counts: P) -> Self {
        Self {
            counts: counts.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Read a JSON configuration. Missing fields keep their defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PipelineError::InvalidConfig { reason });
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must be in (0, 1), got {}", self.alpha));
        }
        if !(self.lfc_threshold >= 0.0 && self.lfc_threshold.is_finite()) {
            return invalid(format!("lfc_threshold must be >= 0, got {}", self.lfc_threshold));
        }
        if let Some(cutoff) = self.cooks_cutoff {
            if cutoff.is_nan() || cutoff <= 0.0 {
                return invalid(format!("cooks_cutoff must be positive, got {}", cutoff));
            }
        }
        if self.top_genes == 0 {
            return invalid("top_genes must be greater than 0".to_string());
        }
        let e = &self.enrichment;
        if e.min_size == 0 || e.min_size > e.max_size {
            return invalid(format!(
                "enrichment sizes must satisfy 0 < min_size <= max_size, got {}..{}",
                e.min_size, e.max_size
            ));
        }
        if e.permutations == 0 {
            return invalid("enrichment.permutations must be greater than 0".to_string());
        }
        match (&self.numerator, &self.denominator) {
            (Some(n), Some(d)) if n == d => {
                return invalid(format!("numerator and denominator are both '{}'", n));
            }
            (Some(_), None) | (None, Some(_)) => {
                return invalid("numerator and denominator must be given together".to_string());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn plot_enabled(&self, kind: PlotKind) -> bool {
        self.plots.contains(&kind)
    }

    pub fn results_options(&self) -> ResultsOptions {
        ResultsOptions {
            alpha: self.alpha,
            lfc_threshold: self.lfc_threshold,
            use_t: self.use_t,
            independent_filtering: self.independent_filtering,
            cooks_filter: true,
            cooks_cutoff: self.cooks_cutoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.top_genes, 500);
        assert!(config.rlog_blind && config.shrink_lfc && config.independent_filtering);
        assert_eq!(config.enrichment.scope, OntologyScope::GO);
        assert_eq!((config.enrichment.min_size, config.enrichment.max_size), (10, 500));
        assert_eq!(config.plots.len(), PlotKind::ALL.len());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "counts": "counts.csv",
                "alpha": 0.1,
                "fit_type": "local",
                "enrichment": {{ "scope": "KEGG", "permutations": 200 }},
                "plots": ["volcano", "pca"]
            }}"#
        )
        .unwrap();
        let config = PipelineConfig::load_json(file.path()).unwrap();
        assert_eq!(config.counts, PathBuf::from("counts.csv"));
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.fit_type, TrendFitType::Local);
        assert_eq!(config.enrichment.scope, OntologyScope::KEGG);
        assert_eq!(config.enrichment.permutations, 200);
        assert_eq!(config.enrichment.min_size, 10);
        assert!(config.plot_enabled(PlotKind::Volcano));
        assert!(!config.plot_enabled(PlotKind::Heatmap));
        assert_eq!(config.size_factor_method, SizeFactorMethod::Ratio);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = PipelineConfig::new("x.csv");
        config.numerator = Some("KO".to_string());
        config.denominator = Some("WT".to_string());
        let back: PipelineConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation_errors() {
        let cases: Vec<Box<dyn Fn(&mut PipelineConfig)>> = vec![
            Box::new(|c| c.alpha = 1.0),
            Box::new(|c| c.alpha = 0.0),
            Box::new(|c| c.top_genes = 0),
            Box::new(|c| c.enrichment.min_size = 600),
            Box::new(|c| c.enrichment.permutations = 0),
            Box::new(|c| c.cooks_cutoff = Some(-1.0)),
            Box::new(|c| {
                c.numerator = Some("WT".to_string());
                c.denominator = Some("WT".to_string());
            }),
            Box::new(|c| c.numerator = Some("KO".to_string())),
        ];
        for mutate in cases {
            let mut config = PipelineConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig { .. })));
        }
    }

    #[test]
    fn test_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"alpha\": ").unwrap();
        assert!(matches!(
            PipelineConfig::load_json(file.path()),
            Err(PipelineError::JsonError(_))
        ));
    }
}

//! The full run: load, filter, normalize, transform, explore, test, enrich
//!
//! Each stage is a method of [`Pipeline`] so the subcommands can stop
//! early; [`Pipeline::run`] chains all of them. Any failing stage aborts the
//! run.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::Serialize;

use crate::config::{EnrichmentConfig, PipelineConfig};
use crate::data::{CountDataSet, SampleTable};
use crate::dispersion::{estimate_dataset_dispersions, DispersionParams};
use crate::enrichment::{
    gsea, over_representation, EnrichmentNetwork, GeneSetCollection, GseaTable, OraTable, DEFAULT_MIN_JACCARD,
};
use crate::error::{PipelineError, Result};
use crate::explore::{pca, PcaResult, SampleCorrelation};
use crate::filter::remove_zero_count_genes;
use crate::glm::{fit_dataset, Design};
use crate::io::{read_count_matrix, write_matrix, write_vector, DeTable};
use crate::normalization::{column_totals, estimate_size_factors};
use crate::plot::{self, PlotKind};
use crate::shrinkage::{shrink_lfc_normal, DEFAULT_UPPER_QUANTILE};
use crate::testing::results;
use crate::transform::{log2_counts, rlog_dataset, LogCounts, RlogMatrix};

/// Pseudocount of the shifted log transform
pub const LOG_PSEUDOCOUNT: f64 = 1.0;

/// Filtered counts with size factors, ready for the later stages
#[derive(Debug, Clone)]
pub struct Prepared {
    pub dataset: CountDataSet,
    /// Genes in the input file
    pub input_genes: usize,
    pub removed_genes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Transformed {
    pub log_counts: LogCounts,
    pub rlog: RlogMatrix,
}

#[derive(Debug, Clone)]
pub struct Exploration {
    pub correlation: SampleCorrelation,
    pub pca: PcaResult,
}

#[derive(Debug, Clone)]
pub struct EnrichmentOutput {
    pub gsea: GseaTable,
    pub ora: Option<OraTable>,
}

/// Every artifact of a complete run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub config: PipelineConfig,
    /// Filtered counts with size factors, dispersions and fits
    pub dataset: CountDataSet,
    pub input_genes: usize,
    pub removed_genes: Vec<String>,
    pub log_counts: LogCounts,
    pub rlog: RlogMatrix,
    pub correlation: SampleCorrelation,
    pub pca: PcaResult,
    pub results: DeTable,
    pub enrichment: Option<EnrichmentOutput>,
}

impl PipelineOutput {
    pub fn size_factors(&self) -> Result<&Array1<f64>> {
        self.dataset.require_size_factors()
    }

    pub fn significant(&self) -> DeTable {
        self.results.significant(self.config.alpha)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage and return the artifacts without writing them
    pub fn run(&self) -> Result<PipelineOutput> {
        self.config.validate()?;
        let Prepared {
            mut dataset,
            input_genes,
            removed_genes,
        } = self.prepare(true)?;
        let Transformed { log_counts, rlog } = self.transform(&dataset)?;
        let Exploration { correlation, pca } = self.explore(&rlog)?;
        let results = self.test(&mut dataset)?;
        let enrichment = self.enrich(&results)?;
        Ok(PipelineOutput {
            config: self.config.clone(),
            dataset,
            input_genes,
            removed_genes,
            log_counts,
            rlog,
            correlation,
            pca,
            results,
            enrichment,
        })
    }

    /// Configured contrast, or the second sorted level over the first
    pub fn contrast(&self, samples: &SampleTable) -> Result<(String, String)> {
        match (&self.config.numerator, &self.config.denominator) {
            (Some(n), Some(d)) => {
                samples.check_contrast(n, d)?;
                Ok((n.clone(), d.clone()))
            }
            _ => samples.default_contrast(),
        }
    }

    /// Load the counts, drop all-zero genes and estimate size factors. The
    /// design carries the contrast when `with_contrast` is set and is
    /// intercept-only otherwise.
    pub fn prepare(&self, with_contrast: bool) -> Result<Prepared> {
        log::info!("Loading count matrix from {}", self.config.counts.display());
        let counts = read_count_matrix(&self.config.counts)?;
        log::info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());
        let input_genes = counts.n_genes();

        let filtered = remove_zero_count_genes(&counts)?;
        let samples = SampleTable::from_sample_names(filtered.kept.sample_ids())?;
        log::info!(
            "Conditions: {}",
            samples
                .level_counts()
                .iter()
                .map(|(level, n)| format!("{} ({})", level, n))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let design = if with_contrast {
            let (numerator, denominator) = self.contrast(&samples)?;
            log::info!("Contrast: {} vs {}", numerator, denominator);
            Design::for_contrast(&samples, &numerator, &denominator)?
        } else {
            Design::intercept_only(samples.n_samples())
        };
        let mut dataset = CountDataSet::new(filtered.kept, samples, design)?;
        estimate_size_factors(&mut dataset, self.config.size_factor_method)?;
        Ok(Prepared {
            dataset,
            input_genes,
            removed_genes: filtered.removed,
        })
    }

    pub fn transform(&self, dataset: &CountDataSet) -> Result<Transformed> {
        log::info!("Transforming counts");
        let log_counts = log2_counts(dataset.counts(), dataset.require_size_factors()?, LOG_PSEUDOCOUNT)?;
        let rlog = rlog_dataset(dataset, self.config.rlog_blind, self.config.fit_type)?;
        Ok(Transformed { log_counts, rlog })
    }

    /// Sample correlation and PCA on rlog values
    pub fn explore(&self, rlog: &RlogMatrix) -> Result<Exploration> {
        log::info!("Exploring sample structure");
        let correlation = SampleCorrelation::compute(rlog.data.view(), &rlog.sample_ids)?;
        let pca = pca(rlog.data.view(), &rlog.sample_ids, self.config.top_genes)?;
        Ok(Exploration { correlation, pca })
    }

    /// Dispersions, GLM fits, optional shrinkage and the results table
    pub fn test(&self, dataset: &mut CountDataSet) -> Result<DeTable> {
        log::info!("Testing for differential expression");
        estimate_dataset_dispersions(dataset, self.config.fit_type, &DispersionParams::default())?;
        fit_dataset(dataset)?;
        if self.config.shrink_lfc {
            shrink_lfc_normal(dataset, DEFAULT_UPPER_QUANTILE)?;
        }
        results(dataset, &self.config.results_options())
    }

    /// GSEA (and ORA) of the results table, `None` without gene sets
    pub fn enrich(&self, table: &DeTable) -> Result<Option<EnrichmentOutput>> {
        if self.config.gene_sets.is_empty() {
            log::info!("No gene sets configured, skipping enrichment");
            return Ok(None);
        }
        let sets = GeneSetCollection::load(&self.config.gene_sets)?;
        let ranked = table.ranked_genes();
        let query = self.config.enrichment.ora.then(|| {
            let significant: Vec<String> = table
                .significant(self.config.alpha)
                .records()
                .iter()
                .map(|r| r.gene_id.clone())
                .collect();
            let tested: Vec<String> = table
                .records()
                .iter()
                .filter(|r| r.pvalue.is_finite())
                .map(|r| r.gene_id.clone())
                .collect();
            (significant, tested)
        });
        run_enrichment(&sets, &ranked, query, &self.config.enrichment).map(Some)
    }
}

/// GSEA over `ranked`, plus ORA when `query` holds `(significant, tested)`
pub fn run_enrichment(
    sets: &GeneSetCollection,
    ranked: &[(String, f64)],
    query: Option<(Vec<String>, Vec<String>)>,
    config: &EnrichmentConfig,
) -> Result<EnrichmentOutput> {
    log::info!("Gene set enrichment ({} scope)", config.scope);
    let universe: HashSet<&str> = ranked.iter().map(|(g, _)| g.as_str()).collect();
    let restricted = sets.restrict(config.scope, &universe, config.min_size, config.max_size);
    if restricted.is_empty() {
        log::warn!(
            "No gene sets with {} to {} ranked genes in scope {}",
            config.min_size,
            config.max_size,
            config.scope
        );
    }
    let gsea = gsea(ranked, &restricted, &config.gsea_params())?;

    let ora = match query {
        Some((significant, tested)) => {
            let tested_set: HashSet<&str> = tested.iter().map(String::as_str).collect();
            let ora_sets = sets.restrict(config.scope, &tested_set, config.min_size, config.max_size);
            Some(over_representation(&significant, &tested, &ora_sets)?)
        }
        None => None,
    };
    Ok(EnrichmentOutput { gsea, ora })
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// `size_factors.tsv` and `normalized_counts.tsv`
pub fn write_normalization(dir: &Path, dataset: &CountDataSet) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let counts = dataset.counts();
    let size_factors = dir.join("size_factors.tsv");
    write_vector(
        &size_factors,
        "sample",
        "size_factor",
        counts.sample_ids(),
        dataset.require_size_factors()?,
    )?;
    let normalized = dir.join("normalized_counts.tsv");
    write_matrix(
        &normalized,
        "gene_id",
        counts.gene_ids(),
        counts.sample_ids(),
        dataset.require_normalized_counts()?.view(),
    )?;
    Ok(vec![size_factors, normalized])
}

/// `log2_counts.tsv` (normalized) and `rlog.tsv`
pub fn write_transforms(dir: &Path, transformed: &Transformed) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let logs = &transformed.log_counts;
    let log_path = dir.join("log2_counts.tsv");
    write_matrix(&log_path, "gene_id", &logs.gene_ids, &logs.sample_ids, logs.normalized.view())?;
    let rlog = &transformed.rlog;
    let rlog_path = dir.join("rlog.tsv");
    write_matrix(&rlog_path, "gene_id", &rlog.gene_ids, &rlog.sample_ids, rlog.data.view())?;
    Ok(vec![log_path, rlog_path])
}

/// `sample_correlation.tsv` in clustering order and `pca.tsv`
pub fn write_exploration(dir: &Path, exploration: &Exploration) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let corr = &exploration.correlation;
    let order = &corr.dendrogram.order;
    let ordered_ids: Vec<String> = order.iter().map(|&i| corr.sample_ids[i].clone()).collect();
    let ordered = corr.correlation.select(ndarray::Axis(0), order).select(ndarray::Axis(1), order);
    let corr_path = dir.join("sample_correlation.tsv");
    write_matrix(&corr_path, "sample", &ordered_ids, &ordered_ids, ordered.view())?;

    let pca = &exploration.pca;
    let components: Vec<String> = (1..=pca.n_components()).map(|k| format!("PC{}", k)).collect();
    let pca_path = dir.join("pca.tsv");
    write_matrix(&pca_path, "sample", &pca.sample_ids, &components, pca.scores.view())?;
    Ok(vec![corr_path, pca_path])
}

/// `deseq_results.tsv` and its significant view `significant_genes.tsv`
pub fn write_results(dir: &Path, table: &DeTable, alpha: f64) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let all = dir.join("deseq_results.tsv");
    table.write_tsv(&all)?;
    let significant = dir.join("significant_genes.tsv");
    table.significant(alpha).write_tsv(&significant)?;
    log::info!("Results written to {}", all.display());
    Ok(vec![all, significant])
}

/// `gsea.tsv` and, when ORA ran, `ora.tsv`
pub fn write_enrichment(dir: &Path, enrichment: &EnrichmentOutput) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let gsea_path = dir.join("gsea.tsv");
    enrichment.gsea.write_tsv(&gsea_path)?;
    let mut written = vec![gsea_path];
    if let Some(ora) = &enrichment.ora {
        let ora_path = dir.join("ora.tsv");
        ora.write_tsv(&ora_path)?;
        written.push(ora_path);
    }
    Ok(written)
}

fn plot_dir(dir: &Path) -> Result<PathBuf> {
    let plots = dir.join("plots");
    create_dir(&plots)?;
    Ok(plots)
}

/// Two replicates of the first condition, or the first two samples
fn scatter_pair(samples: &SampleTable) -> Option<(usize, usize)> {
    let replicate_pair = samples.levels().iter().find_map(|level| {
        let idx = samples.samples_with_level(level);
        (idx.len() >= 2).then(|| (idx[0], idx[1]))
    });
    replicate_pair.or_else(|| (samples.n_samples() >= 2).then_some((0, 1)))
}

/// Library size, boxplot, PCA, replicate scatter and correlation heatmap
pub fn write_qc_plots(
    dir: &Path,
    config: &PipelineConfig,
    dataset: &CountDataSet,
    transformed: &Transformed,
    exploration: &Exploration,
) -> Result<Vec<PathBuf>> {
    let plots = plot_dir(dir)?;
    let samples = dataset.samples();
    let conditions = samples.conditions();
    let mut written = Vec::new();
    for kind in PlotKind::QC.iter().copied().filter(|k| config.plot_enabled(*k)) {
        let path = plots.join(kind.file_name());
        match kind {
            PlotKind::LibrarySize => plot::library_size_bar(
                &path,
                samples.sample_ids(),
                &dataset.counts().library_sizes(),
                &column_totals(dataset.require_normalized_counts()?.view()),
            )?,
            PlotKind::Boxplot => plot::log_count_boxplot(&path, &transformed.log_counts, conditions)?,
            PlotKind::Pca => plot::pca_scatter(&path, &exploration.pca, conditions)?,
            PlotKind::SampleScatter => match scatter_pair(samples) {
                Some((a, b)) => plot::sample_scatter(&path, &transformed.log_counts, a, b)?,
                None => {
                    log::warn!("Skipping sample scatter: fewer than 2 samples");
                    continue;
                }
            },
            PlotKind::Heatmap => plot::correlation_heatmap(&path, &exploration.correlation)?,
            _ => continue,
        }
        written.push(path);
    }
    Ok(written)
}

/// Volcano and MA plots of the results table
pub fn write_de_plots(dir: &Path, config: &PipelineConfig, table: &DeTable) -> Result<Vec<PathBuf>> {
    let plots = plot_dir(dir)?;
    let mut written = Vec::new();
    if !table.records().iter().any(|r| r.pvalue.is_finite()) {
        log::warn!("Skipping volcano and MA plots: no tested genes");
        return Ok(written);
    }
    if config.plot_enabled(PlotKind::Volcano) {
        let path = plots.join(PlotKind::Volcano.file_name());
        plot::volcano(&path, table, config.alpha)?;
        written.push(path);
    }
    if config.plot_enabled(PlotKind::Ma) {
        let path = plots.join(PlotKind::Ma.file_name());
        plot::ma_plot(&path, table, config.alpha)?;
        written.push(path);
    }
    Ok(written)
}

/// Dot plot and enrichment map of the top GSEA sets
pub fn write_enrichment_plots(dir: &Path, config: &PipelineConfig, enrichment: &EnrichmentOutput) -> Result<Vec<PathBuf>> {
    let plots = plot_dir(dir)?;
    let mut written = Vec::new();
    let top = config.enrichment.top_sets;
    if !enrichment.gsea.records.iter().any(|r| r.nes.is_finite()) {
        log::warn!("Skipping enrichment plots: no gene set has an NES");
        return Ok(written);
    }
    if config.plot_enabled(PlotKind::Dotplot) {
        let path = plots.join(PlotKind::Dotplot.file_name());
        plot::enrichment_dotplot(&path, &enrichment.gsea, top)?;
        written.push(path);
    }
    if config.plot_enabled(PlotKind::Network) {
        let network = EnrichmentNetwork::from_gsea(&enrichment.gsea, top, DEFAULT_MIN_JACCARD);
        let path = plots.join(PlotKind::Network.file_name());
        plot::enrichment_network(&path, &network, config.enrichment.seed)?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Serialize)]
struct SampleSummary {
    sample: String,
    condition: String,
    size_factor: f64,
}

/// Contents of `run_summary.json`
#[derive(Debug, Serialize)]
struct RunSummary {
    version: &'static str,
    counts: PathBuf,
    genes_in_input: usize,
    genes_tested: usize,
    genes_removed: usize,
    samples: Vec<SampleSummary>,
    numerator: String,
    denominator: String,
    alpha: f64,
    upregulated: usize,
    downregulated: usize,
    cooks_outliers: usize,
    low_count_filtered: usize,
    filter_threshold: f64,
    dispersion_trend: String,
    sample_order: Vec<String>,
    pca_percent_variance: Vec<f64>,
    gene_sets_tested: Option<usize>,
    gene_sets_significant: Option<usize>,
    ora_sets_significant: Option<usize>,
    files: Vec<PathBuf>,
    config: PipelineConfig,
}

fn run_summary(output: &PipelineOutput, files: Vec<PathBuf>) -> Result<RunSummary> {
    let config = &output.config;
    let summary = output.results.summary(config.alpha);
    let size_factors = output.size_factors()?;
    let samples = output.dataset.samples();
    let gsea = output.enrichment.as_ref().map(|e| &e.gsea);
    let ora = output.enrichment.as_ref().and_then(|e| e.ora.as_ref());
    Ok(RunSummary {
        version: env!("CARGO_PKG_VERSION"),
        counts: config.counts.clone(),
        genes_in_input: output.input_genes,
        genes_tested: output.results.len(),
        genes_removed: output.removed_genes.len(),
        samples: samples
            .sample_ids()
            .iter()
            .zip(samples.conditions())
            .zip(size_factors.iter())
            .map(|((sample, condition), &size_factor)| SampleSummary {
                sample: sample.clone(),
                condition: condition.clone(),
                size_factor,
            })
            .collect(),
        numerator: summary.numerator,
        denominator: summary.denominator,
        alpha: config.alpha,
        upregulated: summary.upregulated,
        downregulated: summary.downregulated,
        cooks_outliers: summary.outliers,
        low_count_filtered: summary.low_counts,
        filter_threshold: summary.filter_threshold,
        dispersion_trend: output
            .dataset
            .dispersions()
            .map(|d| d.trend.fit_type().to_string())
            .unwrap_or_default(),
        sample_order: output.correlation.ordered_ids().iter().map(|s| s.to_string()).collect(),
        pca_percent_variance: output.pca.percent_variance.to_vec(),
        gene_sets_tested: gsea.map(|g| g.len()),
        gene_sets_significant: gsea.map(|g| g.significant(config.alpha).len()),
        ora_sets_significant: ora.map(|o| o.records.iter().filter(|r| r.padj < config.alpha).count()),
        files,
        config: config.clone(),
    })
}

/// Write every table, the enabled plots and `run_summary.json` under `dir`.
/// Returns the written paths.
pub fn write_outputs(output: &PipelineOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    create_dir(dir)?;
    let config = &output.config;
    let transformed = Transformed {
        log_counts: output.log_counts.clone(),
        rlog: output.rlog.clone(),
    };
    let exploration = Exploration {
        correlation: output.correlation.clone(),
        pca: output.pca.clone(),
    };

    let mut files = write_normalization(dir, &output.dataset)?;
    files.extend(write_transforms(dir, &transformed)?);
    files.extend(write_exploration(dir, &exploration)?);
    files.extend(write_results(dir, &output.results, config.alpha)?);
    if let Some(enrichment) = &output.enrichment {
        files.extend(write_enrichment(dir, enrichment)?);
    }
    files.extend(write_qc_plots(dir, config, &output.dataset, &transformed, &exploration)?);
    files.extend(write_de_plots(dir, config, &output.results)?);
    if let Some(enrichment) = &output.enrichment {
        files.extend(write_enrichment_plots(dir, config, enrichment)?);
    }

    let summary_path = dir.join("run_summary.json");
    let summary = run_summary(output, files.clone())?;
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    files.push(summary_path);
    log::info!("Wrote {} files to {}", files.len(), dir.display());
    Ok(files)
}

/// Fail early when the output directory is a regular file
pub fn check_output_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        return Err(PipelineError::InvalidConfig {
            reason: format!("output directory {} is a file", dir.display()),
        });
    }
    Ok(())
}

//! Command-line interface for rnaseq-explorer

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::PipelineConfig;
use crate::dispersion::TrendFitType;
use crate::enrichment::{GeneSetFormat, GeneSetSource, Ontology, OntologyScope};
use crate::error::Result;
use crate::normalization::SizeFactorMethod;
use crate::plot::PlotKind;

#[derive(Parser)]
#[command(name = "rnaseq-explorer")]
#[command(version)]
#[command(about = "Exploratory RNA-seq differential expression and gene set enrichment")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// Options shared by every subcommand that reads a count file
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Path to the count matrix
    #[arg(short, long,
        long_help = "Path to the count matrix.\n\
            Format: first column = gene IDs, remaining columns = raw counts per sample.\n\
            Sample names end in _<replicate>, e.g. WT_1, WT_2, KO_1; the prefix is the condition.\n\
            Comma for .csv, tab for .tsv/.txt, otherwise detected from the header.")]
    pub counts: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE",
        long_help = "JSON configuration file.\n\
            Fields left out keep their defaults; command-line options override the file.")]
    pub config: Option<PathBuf>,

    /// Output directory [default: results]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Size factor method [default: ratio]
    #[arg(long, value_name = "METHOD",
        long_help = "Size factor estimation method.\n\
            ratio:     Median of ratios over genes without zeros\n\
            poscounts: Geometric means over positive counts only, for sparse data")]
    pub sf_type: Option<SizeFactorMethod>,

    /// Number of threads (0 = auto)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

// Dispersion options shared by transform, explore and run
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Dispersion trend fit [default: parametric]
    #[arg(long, value_name = "TYPE",
        long_help = "Dispersion-mean trend fitting method.\n\
            parametric: a0 + a1 / mean by a gamma GLM\n\
            local:      Local regression of log dispersion on log mean\n\
            mean:       Trimmed mean of the gene-wise dispersions")]
    pub fit_type: Option<TrendFitType>,

    /// Use the condition design for the rlog dispersion trend
    #[arg(long,
        long_help = "Estimate the rlog dispersion trend with the condition design.\n\
            By default rlog is blind to the conditions, which suits QC (PCA, clustering).")]
    pub not_blind: bool,
}

// Gene set options shared by enrich and run
#[derive(Args, Debug, Clone)]
pub struct GeneSetArgs {
    /// Gene set annotation table (term_id, term_name, ontology, gene_id)
    #[arg(long = "gene-sets", value_name = "FILE")]
    pub gene_sets: Vec<PathBuf>,

    /// GMT gene set file as ONTOLOGY=PATH (e.g. KEGG=kegg.gmt)
    #[arg(long, value_name = "ONTOLOGY=PATH")]
    pub gmt: Vec<String>,

    /// Ontologies tested [default: GO]
    #[arg(long, value_name = "SCOPE",
        long_help = "Ontologies tested.\n\
            BP, MF, CC: one GO branch\n\
            GO:         all three GO branches\n\
            KEGG:       KEGG pathways\n\
            ALL:        everything loaded")]
    pub scope: Option<OntologyScope>,

    /// Smallest gene set tested [default: 10]
    #[arg(long)]
    pub min_size: Option<usize>,

    /// Largest gene set tested [default: 500]
    #[arg(long)]
    pub max_size: Option<usize>,

    /// GSEA permutations per set [default: 1000]
    #[arg(long)]
    pub permutations: Option<usize>,

    /// Seed of the permutation generator [default: 42]
    #[arg(long)]
    pub seed: Option<u32>,

    /// Skip over-representation analysis
    #[arg(long)]
    pub no_ora: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full analysis
    #[command(
        about = "Run the full analysis",
        long_about = "Run the full analysis\n\n\
            Loads the counts, removes all-zero genes, normalizes, transforms (log2, rlog),\n\
            explores sample structure (correlation, clustering, PCA), tests each gene with a\n\
            negative binomial GLM and Wald test, and runs gene set enrichment when gene sets\n\
            are given. Tables, plots and run_summary.json land in the output directory.",
        after_long_help = "\
Examples:
  # Default contrast: second condition (sorted) over the first
  rnaseq-explorer run -c counts.csv -o results

  # Explicit contrast and GO enrichment
  rnaseq-explorer run -c counts.csv --numerator KO --denominator WT \\
    --gene-sets go_annotation.csv

  # KEGG pathways from a GMT file, local dispersion fit
  rnaseq-explorer run -c counts.csv --gmt KEGG=kegg.gmt --scope KEGG --fit-type local

  # Settings from a file, with one override
  rnaseq-explorer run --config run.json --alpha 0.01"
    )]
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        sets: GeneSetArgs,

        /// Numerator condition of the fold change
        #[arg(long,
            long_help = "Numerator condition of the fold change (the \"treatment\").\n\
                Without --numerator/--denominator the sorted conditions give\n\
                second level vs first level.")]
        numerator: Option<String>,

        /// Denominator condition of the fold change
        #[arg(long)]
        denominator: Option<String>,

        /// Significance threshold on adjusted p-values [default: 0.05]
        #[arg(short, long)]
        alpha: Option<f64>,

        /// Log2 fold change threshold for testing [default: 0]
        #[arg(long,
            long_help = "Log2 fold change threshold for testing H0: |LFC| <= threshold.")]
        lfc_threshold: Option<f64>,

        /// Report unshrunken fold changes
        #[arg(long)]
        no_shrinkage: bool,

        /// Use t-distribution p-values for the Wald test
        #[arg(long)]
        use_t: bool,

        /// Disable independent filtering
        #[arg(long,
            long_help = "Disable independent filtering.\n\
                By default genes with low mean counts are removed before the BH adjustment\n\
                when that increases the number of rejections.")]
        no_independent_filtering: bool,

        /// Cook's distance cutoff
        #[arg(long,
            long_help = "Cook's distance cutoff for flagging outlier genes.\n\
                Flagged genes keep their p-value but get no adjusted p-value.\n\
                Default: the 0.99 quantile of F(p, m - p), p = coefficients, m = samples.")]
        cooks_cutoff: Option<f64>,

        /// Genes used for PCA [default: 500]
        #[arg(long)]
        top_genes: Option<usize>,

        /// Plots to draw (comma separated) [default: all]
        #[arg(long, value_delimiter = ',', value_name = "KINDS",
            long_help = "Plots to draw, comma separated.\n\
                library_size, boxplot, pca, sample_scatter, heatmap,\n\
                volcano, ma, dotplot, network")]
        plots: Vec<PlotKind>,

        /// Draw no plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Size factors and normalized counts
    #[command(
        long_about = "Estimate median-of-ratios size factors and write normalized counts.\n\n\
            Outputs size_factors.tsv and normalized_counts.tsv.",
        after_long_help = "\
Examples:
  rnaseq-explorer normalize -c counts.csv -o norm
  rnaseq-explorer normalize -c counts.csv -o norm --sf-type poscounts"
    )]
    Normalize {
        #[command(flatten)]
        input: InputArgs,
    },

    /// log2(count + 1) and rlog transforms
    #[command(
        long_about = "Transform counts for visualization.\n\n\
            Writes log2(normalized count + 1) to log2_counts.tsv and the regularized\n\
            log to rlog.tsv.",
        after_long_help = "\
Examples:
  rnaseq-explorer transform -c counts.csv -o transformed
  rnaseq-explorer transform -c counts.csv --fit-type mean --not-blind"
    )]
    Transform {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Sample correlation, clustering, PCA and QC plots
    #[command(
        long_about = "Explore sample structure on rlog values.\n\n\
            Writes sample_correlation.tsv (clustering order), pca.tsv and the QC plots:\n\
            library sizes, log count boxplots, PCA, a replicate scatter and the\n\
            correlation heatmap.",
        after_long_help = "\
Examples:
  rnaseq-explorer explore -c counts.csv -o qc
  rnaseq-explorer explore -c counts.csv -o qc --top-genes 1000"
    )]
    Explore {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Genes used for PCA [default: 500]
        #[arg(long)]
        top_genes: Option<usize>,
    },

    /// Gene set enrichment of an existing results table
    #[command(
        long_about = "Gene set enrichment of a results table written by `run`.\n\n\
            Genes are ranked by log2FoldChange for GSEA; genes with padj < alpha form\n\
            the over-representation query.",
        after_long_help = "\
Examples:
  rnaseq-explorer enrich -r results/deseq_results.tsv --gene-sets go.csv -o enrichment
  rnaseq-explorer enrich -r results/deseq_results.tsv --gmt KEGG=kegg.gmt --scope KEGG"
    )]
    Enrich {
        /// Results table (deseq_results.tsv)
        #[arg(short, long)]
        results: PathBuf,

        /// JSON configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output directory [default: results]
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Significance threshold for the ORA query [default: 0.05]
        #[arg(short, long)]
        alpha: Option<f64>,

        #[command(flatten)]
        sets: GeneSetArgs,

        /// Number of threads (0 = auto)
        #[arg(short = 't', long)]
        threads: Option<usize>,
    },
}

/// `ONTOLOGY=PATH` of a `--gmt` option
pub fn parse_gmt_source(arg: &str) -> Result<GeneSetSource> {
    let (ontology, path) = arg.split_once('=').ok_or_else(|| crate::error::PipelineError::InvalidConfig {
        reason: format!("--gmt expects ONTOLOGY=PATH, got '{}'", arg),
    })?;
    Ok(GeneSetSource {
        path: PathBuf::from(path),
        format: GeneSetFormat::Gmt,
        ontology: Some(ontology.parse::<Ontology>()?),
    })
}

/// Base configuration: the JSON file if given, defaults otherwise
pub fn base_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_json(path),
        None => Ok(PipelineConfig::default()),
    }
}

impl InputArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(counts) = &self.counts {
            config.counts = counts.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(method) = self.sf_type {
            config.size_factor_method = method;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
    }
}

impl ModelArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(fit_type) = self.fit_type {
            config.fit_type = fit_type;
        }
        if self.not_blind {
            config.rlog_blind = false;
        }
    }
}

impl GeneSetArgs {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        for path in &self.gene_sets {
            config.gene_sets.push(GeneSetSource {
                path: path.clone(),
                format: GeneSetFormat::Table,
                ontology: None,
            });
        }
        for arg in &self.gmt {
            config.gene_sets.push(parse_gmt_source(arg)?);
        }
        let e = &mut config.enrichment;
        if let Some(scope) = self.scope {
            e.scope = scope;
        }
        if let Some(min_size) = self.min_size {
            e.min_size = min_size;
        }
        if let Some(max_size) = self.max_size {
            e.max_size = max_size;
        }
        if let Some(permutations) = self.permutations {
            e.permutations = permutations;
        }
        if let Some(seed) = self.seed {
            e.seed = seed;
        }
        if self.no_ora {
            e.ora = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::try_parse_from([
            "rnaseq-explorer",
            "run",
            "-c",
            "counts.csv",
            "--numerator",
            "KO",
            "--denominator",
            "WT",
            "--fit-type",
            "local",
            "--gmt",
            "KEGG=kegg.gmt",
            "--scope",
            "KEGG",
            "--plots",
            "volcano,ma",
        ])
        .unwrap();
        let Some(Commands::Run {
            input,
            model,
            sets,
            plots,
            numerator,
            ..
        }) = cli.command
        else {
            panic!("expected run");
        };
        let mut config = PipelineConfig::default();
        input.apply(&mut config);
        model.apply(&mut config);
        sets.apply(&mut config).unwrap();
        assert_eq!(config.counts, PathBuf::from("counts.csv"));
        assert_eq!(config.fit_type, TrendFitType::Local);
        assert_eq!(config.enrichment.scope, OntologyScope::KEGG);
        assert_eq!(config.gene_sets[0].ontology, Some(Ontology::KEGG));
        assert_eq!(plots, vec![PlotKind::Volcano, PlotKind::Ma]);
        assert_eq!(numerator.as_deref(), Some("KO"));
    }

    #[test]
    fn test_bad_gmt_argument() {
        assert!(parse_gmt_source("kegg.gmt").is_err());
        assert!(parse_gmt_source("FOO=kegg.gmt").is_err());
        let source = parse_gmt_source("BP=go_bp.gmt").unwrap();
        assert_eq!(source.path, PathBuf::from("go_bp.gmt"));
    }
}

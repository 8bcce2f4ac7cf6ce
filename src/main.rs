//! rnaseq-explorer command-line interface

use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_explorer::cli::{base_config, Cli, Commands, GeneSetArgs, InputArgs, ModelArgs};
use rnaseq_explorer::config::PipelineConfig;
use rnaseq_explorer::enrichment::GeneSetCollection;
use rnaseq_explorer::error::{PipelineError, Result};
use rnaseq_explorer::io::{read_ranked_genes, read_tested_genes};
use rnaseq_explorer::pipeline::{
    check_output_dir, run_enrichment, write_enrichment, write_enrichment_plots, write_exploration, write_normalization,
    write_outputs, write_qc_plots, write_transforms, Pipeline, PipelineOutput,
};
use rnaseq_explorer::plot::PlotKind;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SUBCOMMANDS: [&str; 6] = ["run", "normalize", "transform", "explore", "enrich", "help"];

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // The first non-flag argument, if any, is the subcommand
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let has_subcommand = first_positional.map_or(false, |a| SUBCOMMANDS.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rnaseq-explorer {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            input,
            model,
            sets,
            numerator,
            denominator,
            alpha,
            lfc_threshold,
            no_shrinkage,
            use_t,
            no_independent_filtering,
            cooks_cutoff,
            top_genes,
            plots,
            no_plots,
        }) => run_config(&input, &model, &sets).and_then(|mut config| {
            if numerator.is_some() || denominator.is_some() {
                config.numerator = numerator;
                config.denominator = denominator;
            }
            if let Some(alpha) = alpha {
                config.alpha = alpha;
            }
            if let Some(threshold) = lfc_threshold {
                config.lfc_threshold = threshold;
            }
            if no_shrinkage {
                config.shrink_lfc = false;
            }
            if use_t {
                config.use_t = true;
            }
            if no_independent_filtering {
                config.independent_filtering = false;
            }
            if cooks_cutoff.is_some() {
                config.cooks_cutoff = cooks_cutoff;
            }
            if let Some(top_genes) = top_genes {
                config.top_genes = top_genes;
            }
            if no_plots {
                config.plots.clear();
            } else if !plots.is_empty() {
                config.plots = plots;
            }
            run_analysis(config)
        }),
        Some(Commands::Normalize { input }) => stage_config(&input, None, None).and_then(run_normalize),
        Some(Commands::Transform { input, model }) => {
            stage_config(&input, Some(&model), None).and_then(run_transform)
        }
        Some(Commands::Explore {
            input,
            model,
            top_genes,
        }) => stage_config(&input, Some(&model), top_genes).and_then(run_explore),
        Some(Commands::Enrich {
            results,
            config,
            output,
            alpha,
            sets,
            threads,
        }) => base_config(config.as_ref()).and_then(|mut base| {
            if let Some(output) = output {
                base.output_dir = output;
            }
            if let Some(alpha) = alpha {
                base.alpha = alpha;
            }
            if let Some(threads) = threads {
                base.threads = threads;
            }
            sets.apply(&mut base)?;
            run_enrich(&results, base)
        }),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rnaseq-explorer v{}", VERSION);
    println!("Run `rnaseq-explorer -h` for usage or `rnaseq-explorer --help` for detailed information.");
}

fn print_short_help() {
    println!("rnaseq-explorer v{}", VERSION);
    println!();
    println!("Usage: rnaseq-explorer <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full analysis");
    println!("  normalize  Size factors and normalized counts");
    println!("  transform  log2(count + 1) and rlog transforms");
    println!("  explore    Sample correlation, clustering, PCA and QC plots");
    println!("  enrich     Gene set enrichment of an existing results table");
    println!();
    println!("Run `rnaseq-explorer <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rnaseq-explorer v{}", VERSION);
    println!("Exploratory RNA-seq differential expression and gene set enrichment");
    println!();
    println!("Usage: rnaseq-explorer <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full analysis");
    println!("               - Removes genes with zero counts in every sample");
    println!("               - Median-of-ratios normalization, log2 and rlog transforms");
    println!("               - Sample correlation heatmap, clustering and PCA");
    println!("               - Negative binomial GLM with Wald test and LFC shrinkage");
    println!("               - Cook's outlier flagging, independent filtering, BH adjustment");
    println!("               - GSEA and over-representation on GO or KEGG gene sets");
    println!("  normalize  Size factors and normalized counts");
    println!("  transform  log2(count + 1) and rlog transforms");
    println!("  explore    Sample correlation, clustering, PCA and QC plots");
    println!("  enrich     Gene set enrichment of an existing results table");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Sample names carry the condition: WT_1, WT_2, KO_1, KO_2 ...");
    println!();
    println!("Examples:");
    println!("  rnaseq-explorer run -c counts.csv -o results");
    println!();
    println!("  rnaseq-explorer run -c counts.csv --numerator KO --denominator WT \\");
    println!("    --gene-sets go_annotation.csv --scope BP");
    println!();
    println!("  rnaseq-explorer explore -c counts.csv -o qc");
    println!();
    println!("  rnaseq-explorer enrich -r results/deseq_results.tsv --gmt KEGG=kegg.gmt --scope KEGG");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn configure_threads(threads: usize) {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }
}

fn require_counts(config: &PipelineConfig) -> Result<()> {
    if config.counts.as_os_str().is_empty() {
        return Err(PipelineError::InvalidConfig {
            reason: "no count matrix given (use --counts or \"counts\" in the config file)".to_string(),
        });
    }
    Ok(())
}

fn run_config(input: &InputArgs, model: &ModelArgs, sets: &GeneSetArgs) -> Result<PipelineConfig> {
    let mut config = base_config(input.config.as_ref())?;
    input.apply(&mut config);
    model.apply(&mut config);
    sets.apply(&mut config)?;
    Ok(config)
}

fn stage_config(input: &InputArgs, model: Option<&ModelArgs>, top_genes: Option<usize>) -> Result<PipelineConfig> {
    let mut config = base_config(input.config.as_ref())?;
    input.apply(&mut config);
    if let Some(model) = model {
        model.apply(&mut config);
    }
    if let Some(top_genes) = top_genes {
        config.top_genes = top_genes;
    }
    Ok(config)
}

/// Validate, set up threads and check the output directory
fn start(config: &PipelineConfig) -> Result<()> {
    require_counts(config)?;
    config.validate()?;
    configure_threads(config.threads);
    check_output_dir(&config.output_dir)
}

fn run_analysis(config: PipelineConfig) -> Result<()> {
    start(&config)?;
    let out_dir = config.output_dir.clone();
    let output = Pipeline::new(config).run()?;
    let files = write_outputs(&output, &out_dir)?;
    print_summary(&output, &out_dir, files.len());
    Ok(())
}

fn print_summary(output: &PipelineOutput, out_dir: &Path, n_files: usize) {
    let alpha = output.config.alpha;
    let summary = output.results.summary(alpha);
    println!();
    println!("{}", summary);
    if let Some(enrichment) = &output.enrichment {
        println!(
            "Gene sets: {} tested, {} with padj < {}",
            enrichment.gsea.len(),
            enrichment.gsea.significant(alpha).len(),
            alpha
        );
    }
    println!("{} files written to {}", n_files, out_dir.display());
}

fn run_normalize(config: PipelineConfig) -> Result<()> {
    start(&config)?;
    let prepared = Pipeline::new(config.clone()).prepare(false)?;
    let files = write_normalization(&config.output_dir, &prepared.dataset)?;
    info!("Wrote {} files to {}", files.len(), config.output_dir.display());
    Ok(())
}

fn run_transform(config: PipelineConfig) -> Result<()> {
    start(&config)?;
    let pipeline = Pipeline::new(config.clone());
    let prepared = pipeline.prepare(false)?;
    let transformed = pipeline.transform(&prepared.dataset)?;
    let mut files = write_normalization(&config.output_dir, &prepared.dataset)?;
    files.extend(write_transforms(&config.output_dir, &transformed)?);
    info!("Wrote {} files to {}", files.len(), config.output_dir.display());
    Ok(())
}

fn run_explore(config: PipelineConfig) -> Result<()> {
    start(&config)?;
    let pipeline = Pipeline::new(config.clone());
    let prepared = pipeline.prepare(false)?;
    let transformed = pipeline.transform(&prepared.dataset)?;
    let exploration = pipeline.explore(&transformed.rlog)?;
    let dir = &config.output_dir;
    let mut files = write_exploration(dir, &exploration)?;
    files.extend(write_qc_plots(dir, &config, &prepared.dataset, &transformed, &exploration)?);
    println!(
        "Sample order: {}",
        exploration.correlation.ordered_ids().join(", ")
    );
    info!("Wrote {} files to {}", files.len(), dir.display());
    Ok(())
}

fn run_enrich(results: &Path, config: PipelineConfig) -> Result<()> {
    config.validate()?;
    if config.gene_sets.is_empty() {
        return Err(PipelineError::InvalidConfig {
            reason: "no gene sets given (use --gene-sets or --gmt)".to_string(),
        });
    }
    configure_threads(config.threads);
    check_output_dir(&config.output_dir)?;

    info!("Loading results from {}", results.display());
    let ranked = read_ranked_genes(results)?;
    let query = if config.enrichment.ora {
        Some(read_tested_genes(results, config.alpha)?)
    } else {
        None
    };
    let sets = GeneSetCollection::load(&config.gene_sets)?;
    let enrichment = run_enrichment(&sets, &ranked, query, &config.enrichment)?;

    let dir = &config.output_dir;
    let mut files = write_enrichment(dir, &enrichment)?;
    if config.plot_enabled(PlotKind::Dotplot) || config.plot_enabled(PlotKind::Network) {
        files.extend(write_enrichment_plots(dir, &config, &enrichment)?);
    }
    println!(
        "Gene sets: {} tested, {} with padj < {}",
        enrichment.gsea.len(),
        enrichment.gsea.significant(config.alpha).len(),
        config.alpha
    );
    info!("Wrote {} files to {}", files.len(), dir.display());
    Ok(())
}

//! Differential expression results table

use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;

use super::tables::{na_float, parse_na_float, write_records};
use crate::error::{PipelineError, Result};

/// One gene of the results table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeRecord {
    pub gene_id: String,
    #[serde(rename = "baseMean", serialize_with = "na_float")]
    pub base_mean: f64,
    /// Reported fold change, shrunken when shrinkage is on
    #[serde(rename = "log2FoldChange", serialize_with = "na_float")]
    pub log2_fold_change: f64,
    #[serde(rename = "lfcMLE", serialize_with = "na_float")]
    pub lfc_mle: f64,
    #[serde(rename = "lfcSE", serialize_with = "na_float")]
    pub lfc_se: f64,
    #[serde(serialize_with = "na_float")]
    pub stat: f64,
    #[serde(serialize_with = "na_float")]
    pub pvalue: f64,
    #[serde(serialize_with = "na_float")]
    pub padj: f64,
    #[serde(serialize_with = "na_float")]
    pub dispersion: f64,
    #[serde(rename = "cooksOutlier")]
    pub cooks_outlier: bool,
    /// Removed by independent filtering
    pub filtered: bool,
}

impl DeRecord {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.padj.is_finite() && self.padj < alpha
    }
}

/// NaN sorts after every number
fn cmp_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Results of one contrast, one record per tested gene
#[derive(Debug, Clone, PartialEq)]
pub struct DeTable {
    numerator: String,
    denominator: String,
    records: Vec<DeRecord>,
    /// Base-mean cutoff chosen by independent filtering
    filter_threshold: f64,
}

impl DeTable {
    pub fn new(numerator: &str, denominator: &str, records: Vec<DeRecord>, filter_threshold: f64) -> Self {
        Self {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            records,
            filter_threshold,
        }
    }

    pub fn contrast(&self) -> (&str, &str) {
        (&self.numerator, &self.denominator)
    }

    pub fn records(&self) -> &[DeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filter_threshold(&self) -> f64 {
        self.filter_threshold
    }

    pub fn get(&self, gene_id: &str) -> Option<&DeRecord> {
        self.records.iter().find(|r| r.gene_id == gene_id)
    }

    /// Ascending adjusted p-value, undefined last; stable
    pub fn sort_by_padj(&mut self) {
        self.records.sort_by(|a, b| cmp_nan_last(a.padj, b.padj));
    }

    /// Descending fold change, undefined last. Stable, so ties keep their
    /// order and a second call changes nothing.
    pub fn sort_by_fold_change_desc(&mut self) {
        self.records
            .sort_by(|a, b| cmp_nan_last(-a.log2_fold_change, -b.log2_fold_change));
    }

    /// Records with `padj < alpha`, in table order
    pub fn significant(&self, alpha: f64) -> DeTable {
        DeTable {
            numerator: self.numerator.clone(),
            denominator: self.denominator.clone(),
            records: self
                .records
                .iter()
                .filter(|r| r.is_significant(alpha))
                .cloned()
                .collect(),
            filter_threshold: self.filter_threshold,
        }
    }

    pub fn upregulated(&self, alpha: f64) -> Vec<&DeRecord> {
        self.records
            .iter()
            .filter(|r| r.is_significant(alpha) && r.log2_fold_change > 0.0)
            .collect()
    }

    pub fn downregulated(&self, alpha: f64) -> Vec<&DeRecord> {
        self.records
            .iter()
            .filter(|r| r.is_significant(alpha) && r.log2_fold_change < 0.0)
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        ResultsSummary {
            numerator: self.numerator.clone(),
            denominator: self.denominator.clone(),
            total_genes: self.len(),
            upregulated: self.upregulated(alpha).len(),
            downregulated: self.downregulated(alpha).len(),
            outliers: self.records.iter().filter(|r| r.cooks_outlier).count(),
            low_counts: self.records.iter().filter(|r| r.filtered).count(),
            filter_threshold: self.filter_threshold,
            alpha,
        }
    }

    /// (gene, log2 fold change) by descending fold change, genes without a
    /// fold change left out
    pub fn ranked_genes(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .records
            .iter()
            .filter(|r| r.log2_fold_change.is_finite())
            .map(|r| (r.gene_id.clone(), r.log2_fold_change))
            .collect();
        ranked.sort_by(|a, b| cmp_nan_last(-a.1, -b.1));
        ranked
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_records(path, &self.records)
    }
}

/// Ranked (gene, score) pairs from a results table written earlier.
///
/// Reads the `gene_id` column (or the first column) and `log2FoldChange`;
/// rows with `NA` fold change are dropped. The list is returned by
/// descending score.
pub fn read_ranked_genes<P: AsRef<Path>>(path: P) -> Result<Vec<(String, f64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(false)
        .from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let score_col = headers
        .iter()
        .position(|h| h == "log2FoldChange")
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: format!("{} has no log2FoldChange column", path.as_ref().display()),
        })?;
    let gene_col = headers.iter().position(|h| h == "gene_id").unwrap_or(0);

    let mut ranked = Vec::new();
    for row in reader.records() {
        let row = row?;
        let gene = row.get(gene_col).unwrap_or_default().trim().to_string();
        let score = parse_na_float(row.get(score_col).unwrap_or_default())?;
        if !gene.is_empty() && score.is_finite() {
            ranked.push((gene, score));
        }
    }
    if ranked.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("no ranked genes in {}", path.as_ref().display()),
        });
    }
    ranked.sort_by(|a, b| cmp_nan_last(-a.1, -b.1));
    Ok(ranked)
}

/// Genes of a written results table split for over-representation:
/// `(significant, tested)`. Tested genes have a p-value; significant ones
/// also have `padj < alpha`.
pub fn read_tested_genes<P: AsRef<Path>>(path: P, alpha: f64) -> Result<(Vec<String>, Vec<String>)> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::InvalidInput {
                reason: format!("{} has no {} column", path.as_ref().display(), name),
            })
    };
    let (p_col, padj_col) = (column("pvalue")?, column("padj")?);
    let gene_col = headers.iter().position(|h| h == "gene_id").unwrap_or(0);

    let mut significant = Vec::new();
    let mut tested = Vec::new();
    for row in reader.records() {
        let row = row?;
        let gene = row.get(gene_col).unwrap_or_default().trim().to_string();
        if gene.is_empty() || !parse_na_float(row.get(p_col).unwrap_or_default())?.is_finite() {
            continue;
        }
        let padj = parse_na_float(row.get(padj_col).unwrap_or_default())?;
        if padj.is_finite() && padj < alpha {
            significant.push(gene.clone());
        }
        tested.push(gene);
    }
    Ok((significant, tested))
}

/// Counts behind the results table at one significance level
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub numerator: String,
    pub denominator: String,
    pub total_genes: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub outliers: usize,
    pub low_counts: usize,
    pub filter_threshold: f64,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |n: usize| {
            if self.total_genes == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.total_genes as f64
            }
        };
        writeln!(f, "{} vs {}", self.numerator, self.denominator)?;
        writeln!(f, "out of {} genes with nonzero total read count", self.total_genes)?;
        writeln!(f, "adjusted p-value < {}", self.alpha)?;
        writeln!(f, "LFC > 0 (up)       : {}, {:.2}%", self.upregulated, pct(self.upregulated))?;
        writeln!(f, "LFC < 0 (down)     : {}, {:.2}%", self.downregulated, pct(self.downregulated))?;
        writeln!(f, "outliers [1]       : {}, {:.2}%", self.outliers, pct(self.outliers))?;
        writeln!(
            f,
            "low counts [2]     : {}, {:.2}%",
            self.low_counts,
            pct(self.low_counts)
        )?;
        writeln!(f, "(mean count < {:.2})", self.filter_threshold)?;
        writeln!(f, "[1] see cooks_cutoff in the configuration")?;
        write!(f, "[2] see independent_filtering in the configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn record(id: &str, lfc: f64, padj: f64) -> DeRecord {
        DeRecord {
            gene_id: id.to_string(),
            base_mean: 100.0,
            log2_fold_change: lfc,
            lfc_mle: lfc,
            lfc_se: 0.2,
            stat: lfc / 0.2,
            pvalue: padj / 2.0,
            padj,
            dispersion: 0.1,
            cooks_outlier: false,
            filtered: false,
        }
    }

    fn table() -> DeTable {
        DeTable::new(
            "KO",
            "WT",
            vec![
                record("a", 1.0, 0.5),
                record("b", 3.0, 0.01),
                record("c", f64::NAN, f64::NAN),
                record("d", 1.0, 0.02),
                record("e", -2.0, 0.001),
            ],
            0.0,
        )
    }

    fn ids(t: &DeTable) -> Vec<&str> {
        t.records().iter().map(|r| r.gene_id.as_str()).collect()
    }

    #[test]
    fn test_sort_by_padj_puts_undefined_last() {
        let mut t = table();
        t.sort_by_padj();
        assert_eq!(ids(&t), vec!["e", "b", "d", "a", "c"]);
    }

    #[test]
    fn test_fold_change_sort_is_stable_and_idempotent() {
        let mut t = table();
        t.sort_by_fold_change_desc();
        // a and d tie at 1.0 and keep input order
        assert_eq!(ids(&t), vec!["b", "a", "d", "e", "c"]);
        let once = t.clone();
        t.sort_by_fold_change_desc();
        assert_eq!(t, once);
    }

    #[test]
    fn test_significance_views() {
        let t = table();
        assert_eq!(ids(&t.significant(0.05)), vec!["b", "d", "e"]);
        assert_eq!(t.upregulated(0.05).len(), 2);
        assert_eq!(t.downregulated(0.05).len(), 1);
        let s = t.summary(0.05);
        assert_eq!((s.total_genes, s.upregulated, s.downregulated), (5, 2, 1));
        assert!(s.to_string().contains("LFC > 0 (up)       : 2, 40.00%"));
    }

    #[test]
    fn test_ranked_genes_drop_undefined() {
        let ranked = table().ranked_genes();
        let genes: Vec<&str> = ranked.iter().map(|(g, _)| g.as_str()).collect();
        assert_eq!(genes, vec!["b", "a", "d", "e"]);
    }

    #[test]
    fn test_written_table_reads_back_as_ranking() {
        let file = NamedTempFile::new().unwrap();
        table().write_tsv(file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with(
            "gene_id\tbaseMean\tlog2FoldChange\tlfcMLE\tlfcSE\tstat\tpvalue\tpadj\tdispersion\tcooksOutlier\tfiltered\n"
        ));
        assert!(text.contains("c\t100.0\tNA\tNA"));

        let ranked = read_ranked_genes(file.path()).unwrap();
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0], ("b".to_string(), 3.0));
    }

    #[test]
    fn test_read_ranked_genes_needs_fold_change_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tscore").unwrap();
        writeln!(file, "g1\t2.0").unwrap();
        assert!(read_ranked_genes(file.path()).is_err());
    }

    #[test]
    fn test_read_tested_genes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tlog2FoldChange\tpvalue\tpadj").unwrap();
        writeln!(file, "g1\t2.0\t0.0001\t0.001").unwrap();
        writeln!(file, "g2\t-0.5\t0.2\tNA").unwrap();
        writeln!(file, "g3\tNA\tNA\tNA").unwrap();
        writeln!(file, "g4\t0.1\t0.04\t0.08").unwrap();
        let (significant, tested) = read_tested_genes(file.path(), 0.05).unwrap();
        assert_eq!(significant, vec!["g1"]);
        assert_eq!(tested, vec!["g1", "g2", "g4"]);
    }
}

//! Over-representation analysis of significant genes

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use statrs::distribution::{Discrete, Hypergeometric};

use super::gene_sets::{GeneSetCollection, Ontology};
use crate::error::{PipelineError, Result};
use crate::io::{na_float, write_records};
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, Serialize)]
pub struct OraRecord {
    #[serde(rename = "ID")]
    pub set_id: String,
    #[serde(rename = "Description")]
    pub name: String,
    #[serde(rename = "ONTOLOGY")]
    pub ontology: Ontology,
    /// Significant genes in the set
    #[serde(rename = "Count")]
    pub overlap: usize,
    #[serde(rename = "setSize")]
    pub set_size: usize,
    /// Significant genes in the universe
    #[serde(rename = "querySize")]
    pub query_size: usize,
    #[serde(rename = "universeSize")]
    pub universe_size: usize,
    #[serde(rename = "foldEnrichment", serialize_with = "na_float")]
    pub fold_enrichment: f64,
    #[serde(serialize_with = "na_float")]
    pub pvalue: f64,
    #[serde(rename = "p.adjust", serialize_with = "na_float")]
    pub padj: f64,
    #[serde(rename = "geneID", serialize_with = "join_genes")]
    pub genes: Vec<String>,
}

fn join_genes<S: serde::Serializer>(genes: &[String], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&genes.join("/"))
}

#[derive(Debug, Clone, Default)]
pub struct OraTable {
    pub records: Vec<OraRecord>,
}

impl OraTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_records(path, &self.records)
    }
}

/// `P(X >= k)` for a hypergeometric draw of `draws` from `population`
/// holding `successes`
pub fn hypergeometric_upper_tail(population: u64, successes: u64, draws: u64, k: u64) -> Result<f64> {
    let dist = Hypergeometric::new(population, successes, draws).map_err(|e| PipelineError::InvalidInput {
        reason: format!("hypergeometric({}, {}, {}): {}", population, successes, draws, e),
    })?;
    let upper = successes.min(draws);
    if k > upper {
        return Ok(0.0);
    }
    let tail: f64 = (k..=upper).map(|x| dist.pmf(x)).sum();
    Ok(tail.min(1.0))
}

/// Test each set for over-representation of `query` genes within
/// `universe`. Sets should already be restricted to the universe; those
/// with no query gene are reported with p = 1.
pub fn over_representation(query: &[String], universe: &[String], sets: &GeneSetCollection) -> Result<OraTable> {
    let universe_set: HashSet<&str> = universe.iter().map(String::as_str).collect();
    let query_set: HashSet<&str> = query
        .iter()
        .map(String::as_str)
        .filter(|g| universe_set.contains(g))
        .collect();
    let n_universe = universe_set.len() as u64;
    let n_query = query_set.len() as u64;
    if n_query == 0 {
        log::warn!("No significant genes for over-representation analysis");
        return Ok(OraTable::default());
    }

    let mut records = Vec::with_capacity(sets.len());
    for set in sets.sets() {
        let members: Vec<&String> = set.genes.iter().filter(|g| universe_set.contains(g.as_str())).collect();
        let set_size = members.len() as u64;
        if set_size == 0 {
            continue;
        }
        let overlap: Vec<String> = members
            .iter()
            .filter(|g| query_set.contains(g.as_str()))
            .map(|g| (*g).clone())
            .collect();
        let k = overlap.len() as u64;
        let pvalue = if k == 0 {
            1.0
        } else {
            hypergeometric_upper_tail(n_universe, set_size, n_query, k)?
        };
        let fold_enrichment = (k as f64 / n_query as f64) / (set_size as f64 / n_universe as f64);
        records.push(OraRecord {
            set_id: set.id.clone(),
            name: set.name.clone(),
            ontology: set.ontology,
            overlap: overlap.len(),
            set_size: set_size as usize,
            query_size: n_query as usize,
            universe_size: n_universe as usize,
            fold_enrichment,
            pvalue,
            padj: f64::NAN,
            genes: overlap,
        });
    }

    let pvalues: Vec<f64> = records.iter().map(|r| r.pvalue).collect();
    for (record, padj) in records.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        record.padj = padj;
    }
    records.sort_by(|a, b| a.pvalue.partial_cmp(&b.pvalue).unwrap_or(std::cmp::Ordering::Equal));
    log::info!(
        "ORA: {} query genes, {} sets tested, {} with adjusted p < 0.05",
        n_query,
        records.len(),
        records.iter().filter(|r| r.padj < 0.05).count()
    );
    Ok(OraTable { records })
}

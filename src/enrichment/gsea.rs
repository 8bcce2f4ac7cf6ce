//! Gene set enrichment analysis on a ranked gene list
//!
//! Running-sum statistic: walking down the list, a hit adds
//! `|score|^p / sum over hits of |score|^p`, a miss subtracts
//! `1 / (N - N_hits)`. ES is the largest deviation from zero. Significance
//! comes from random gene sets of the same size drawn with a seeded
//! generator, and ES is normalised by the mean null ES of the same sign.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gene_sets::{GeneSetCollection, Ontology};
use crate::error::{PipelineError, Result};
use crate::io::{na_float, write_records};
use crate::rng::SeededRng;
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GseaParams {
    /// Random gene sets drawn per tested set
    pub permutations: usize,
    pub seed: u32,
    /// Exponent on the ranking score of hits
    pub weight: f64,
}

impl Default for GseaParams {
    fn default() -> Self {
        Self {
            permutations: 1000,
            seed: 42,
            weight: 1.0,
        }
    }
}

/// Extreme of the running sum and where it happened
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extreme {
    es: f64,
    /// Index into the hit list: last hit of the leading edge for positive
    /// ES, first hit for negative ES
    hit: usize,
}

/// ES of hits at sorted positions `hits` in a list of `n` scores
fn enrichment_extreme(scores: &[f64], hits: &[usize], weight: f64) -> Option<Extreme> {
    let n = scores.len();
    let n_hits = hits.len();
    if n_hits == 0 || n_hits >= n {
        return None;
    }
    let weights: Vec<f64> = hits.iter().map(|&h| scores[h].abs().powf(weight)).collect();
    let total: f64 = weights.iter().sum();
    let hit_step = |i: usize| {
        if total > 0.0 {
            weights[i] / total
        } else {
            1.0 / n_hits as f64
        }
    };
    let miss_step = 1.0 / (n - n_hits) as f64;

    let mut running = 0.0;
    let mut max = Extreme { es: 0.0, hit: 0 };
    let mut min = Extreme { es: 0.0, hit: 0 };
    let mut previous: Option<usize> = None;
    for (i, &h) in hits.iter().enumerate() {
        let misses = match previous {
            Some(p) => h - p - 1,
            None => h,
        };
        running -= misses as f64 * miss_step;
        if running < min.es {
            min = Extreme { es: running, hit: i };
        }
        running += hit_step(i);
        if running > max.es {
            max = Extreme { es: running, hit: i };
        }
        previous = Some(h);
    }
    Some(if max.es.abs() >= min.es.abs() { max } else { min })
}

/// Running-sum curve over the whole list, one value per position
pub fn running_sum(scores: &[f64], hits: &[usize], weight: f64) -> Vec<f64> {
    let n = scores.len();
    let mut is_hit = vec![false; n];
    for &h in hits {
        if h < n {
            is_hit[h] = true;
        }
    }
    let n_hits = is_hit.iter().filter(|&&h| h).count();
    if n_hits == 0 || n_hits >= n {
        return vec![0.0; n];
    }
    let total: f64 = hits.iter().map(|&h| scores[h].abs().powf(weight)).sum();
    let miss_step = 1.0 / (n - n_hits) as f64;
    let mut running = 0.0;
    scores
        .iter()
        .zip(&is_hit)
        .map(|(s, &hit)| {
            running += if !hit {
                -miss_step
            } else if total > 0.0 {
                s.abs().powf(weight) / total
            } else {
                1.0 / n_hits as f64
            };
            running
        })
        .collect()
}

/// Enrichment score of a set of positions, 0 when undefined
pub fn enrichment_score(scores: &[f64], hits: &[usize], weight: f64) -> f64 {
    let mut sorted = hits.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    enrichment_extreme(scores, &sorted, weight).map_or(0.0, |e| e.es)
}

/// One tested gene set
#[derive(Debug, Clone, Serialize)]
pub struct GseaRecord {
    #[serde(rename = "ID")]
    pub set_id: String,
    #[serde(rename = "Description")]
    pub name: String,
    #[serde(rename = "ONTOLOGY")]
    pub ontology: Ontology,
    #[serde(rename = "setSize")]
    pub size: usize,
    #[serde(rename = "enrichmentScore")]
    pub es: f64,
    #[serde(rename = "NES", serialize_with = "na_float")]
    pub nes: f64,
    #[serde(serialize_with = "na_float")]
    pub pvalue: f64,
    #[serde(rename = "p.adjust", serialize_with = "na_float")]
    pub padj: f64,
    /// Rank (1-based) of the running-sum extreme
    pub rank: usize,
    #[serde(rename = "core_enrichment", serialize_with = "join_genes")]
    pub leading_edge: Vec<String>,
    /// Positions of the set's genes in the ranked list
    #[serde(skip)]
    pub hits: Vec<usize>,
}

fn join_genes<S: serde::Serializer>(genes: &[String], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&genes.join("/"))
}

/// GSEA results, ascending p-value
#[derive(Debug, Clone)]
pub struct GseaTable {
    pub records: Vec<GseaRecord>,
    /// Ranking scores the sets were tested against
    pub scores: Vec<f64>,
    pub genes: Vec<String>,
}

impl GseaTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn significant(&self, alpha: f64) -> Vec<&GseaRecord> {
        self.records
            .iter()
            .filter(|r| r.padj.is_finite() && r.padj < alpha)
            .collect()
    }

    /// Running-sum curve of one record, for plotting
    pub fn curve(&self, record: &GseaRecord, weight: f64) -> Vec<f64> {
        running_sum(&self.scores, &record.hits, weight)
    }

    pub fn write_tsv<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        write_records(path, &self.records)
    }
}

/// Null ES of `permutations` random sets of `size` positions out of `n`
fn null_distribution(scores: &[f64], size: usize, params: &GseaParams, seed: u32) -> Vec<f64> {
    let n = scores.len();
    let mut rng = SeededRng::new(seed);
    let mut pool: Vec<usize> = (0..n).collect();
    let mut draw = Vec::with_capacity(size);
    (0..params.permutations)
        .map(|_| {
            for i in 0..size {
                let j = i + rng.below(n - i);
                pool.swap(i, j);
            }
            draw.clear();
            draw.extend_from_slice(&pool[..size]);
            draw.sort_unstable();
            enrichment_extreme(scores, &draw, params.weight).map_or(0.0, |e| e.es)
        })
        .collect()
}

/// NES and permutation p-value of `es` against its null
fn normalise(es: f64, null: &[f64]) -> (f64, f64) {
    let same_sign: Vec<f64> = if es >= 0.0 {
        null.iter().copied().filter(|v| *v >= 0.0).collect()
    } else {
        null.iter().copied().filter(|v| *v < 0.0).collect()
    };
    if same_sign.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let extreme = same_sign.iter().filter(|v| v.abs() >= es.abs()).count();
    let pvalue = (extreme + 1) as f64 / (same_sign.len() + 1) as f64;
    let mean_abs = same_sign.iter().map(|v| v.abs()).sum::<f64>() / same_sign.len() as f64;
    let nes = if mean_abs == 0.0 { f64::NAN } else { es / mean_abs };
    (nes, pvalue)
}

/// Test every set against the ranked list (`(gene, score)` by descending
/// score). Sets should already be restricted to the ranked universe.
pub fn gsea(ranked: &[(String, f64)], sets: &GeneSetCollection, params: &GseaParams) -> Result<GseaTable> {
    if params.permutations == 0 {
        return Err(PipelineError::InvalidConfig {
            reason: "GSEA needs at least one permutation".to_string(),
        });
    }
    if ranked.len() < 2 {
        return Err(PipelineError::EmptyData {
            reason: format!("GSEA needs a ranked list, got {} genes", ranked.len()),
        });
    }
    let genes: Vec<String> = ranked.iter().map(|(g, _)| g.clone()).collect();
    let scores: Vec<f64> = ranked.iter().map(|(_, s)| *s).collect();
    let position: HashMap<&str, usize> = genes.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();

    log::info!(
        "GSEA: {} gene sets, {} ranked genes, {} permutations",
        sets.len(),
        genes.len(),
        params.permutations
    );

    let mut records: Vec<GseaRecord> = sets
        .sets()
        .par_iter()
        .enumerate()
        .filter_map(|(i, set)| {
            let mut hits: Vec<usize> = set.genes.iter().filter_map(|g| position.get(g.as_str()).copied()).collect();
            hits.sort_unstable();
            hits.dedup();
            let extreme = enrichment_extreme(&scores, &hits, params.weight)?;
            let null = null_distribution(&scores, hits.len(), params, params.seed.wrapping_add(i as u32));
            let (nes, pvalue) = normalise(extreme.es, &null);

            let (edge, rank) = if extreme.es >= 0.0 {
                (&hits[..=extreme.hit], hits[extreme.hit] + 1)
            } else {
                // the trough sits just before the first leading-edge hit
                (&hits[extreme.hit..], hits[extreme.hit])
            };
            Some(GseaRecord {
                set_id: set.id.clone(),
                name: set.name.clone(),
                ontology: set.ontology,
                size: hits.len(),
                es: extreme.es,
                nes,
                pvalue,
                padj: f64::NAN,
                rank,
                leading_edge: edge.iter().map(|&h| genes[h].clone()).collect(),
                hits,
            })
        })
        .collect();

    let pvalues: Vec<f64> = records.iter().map(|r| r.pvalue).collect();
    for (record, padj) in records.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        record.padj = padj;
    }
    // Undefined p-values last, then larger |NES| first
    records.sort_by(|a, b| {
        a.pvalue
            .is_nan()
            .cmp(&b.pvalue.is_nan())
            .then_with(|| a.pvalue.total_cmp(&b.pvalue))
            .then_with(|| a.nes.is_nan().cmp(&b.nes.is_nan()))
            .then_with(|| b.nes.abs().total_cmp(&a.nes.abs()))
    });
    log::info!(
        "GSEA: {} of {} sets with adjusted p < 0.05",
        records.iter().filter(|r| r.padj < 0.05).count(),
        records.len()
    );
    Ok(GseaTable { records, scores, genes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::GeneSet;

    fn ranked(n: usize) -> Vec<(String, f64)> {
        (0..n).map(|i| (format!("g{}", i), (n / 2) as f64 - i as f64)).collect()
    }

    fn collection(sets: Vec<(&str, Vec<usize>)>) -> GeneSetCollection {
        GeneSetCollection::new(
            sets.into_iter()
                .map(|(id, idx)| GeneSet {
                    id: id.to_string(),
                    name: id.to_string(),
                    ontology: Ontology::BP,
                    genes: idx.into_iter().map(|i| format!("g{}", i)).collect(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_enrichment_score_hand_computed() {
        // scores 3 2 1 0, hits at 0 and 2: steps 0.75, miss 0.5, 0.25, miss 0.5
        let scores = [3.0, 2.0, 1.0, 0.0];
        assert!((enrichment_score(&scores, &[0, 2], 1.0) - 0.75).abs() < 1e-12);
        let curve = running_sum(&scores, &[0, 2], 1.0);
        let expected = [0.75, 0.25, 0.5, 0.0];
        for (a, e) in curve.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12);
        }
        // hits at the bottom give a negative score
        assert!((enrichment_score(&scores, &[3], 1.0) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_curve_extreme_matches_score() {
        let scores: Vec<f64> = (0..50).map(|i| 25.0 - i as f64).collect();
        let hits = [1, 4, 9, 30, 44];
        let es = enrichment_score(&scores, &hits, 1.0);
        let curve = running_sum(&scores, &hits, 1.0);
        let extreme = curve.iter().copied().fold(0.0_f64, |a, v| if v.abs() > a.abs() { v } else { a });
        assert!((es - extreme).abs() < 1e-12);
    }

    #[test]
    fn test_top_and_bottom_sets_are_significant_with_signs() {
        let list = ranked(200);
        let sets = collection(vec![
            ("top", (0..15).collect()),
            ("bottom", (185..200).collect()),
            ("spread", (0..15).map(|i| i * 13).collect()),
        ]);
        let params = GseaParams {
            permutations: 500,
            ..GseaParams::default()
        };
        let table = gsea(&list, &sets, &params).unwrap();
        assert_eq!(table.len(), 3);
        let get = |id: &str| table.records.iter().find(|r| r.set_id == id).unwrap();
        assert!(get("top").nes > 1.0 && get("top").pvalue < 0.01);
        assert!(get("bottom").nes < -1.0 && get("bottom").pvalue < 0.01);
        assert!(get("spread").pvalue > get("top").pvalue);
        assert_eq!(get("top").leading_edge.len(), 15);
        for r in &table.records {
            assert!(r.padj >= r.pvalue);
        }
        assert!(table.records[0].pvalue <= table.records[2].pvalue);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let list = ranked(100);
        let sets = collection(vec![("a", vec![1, 5, 20, 33, 70]), ("b", vec![2, 3, 90, 95, 99])]);
        let params = GseaParams {
            permutations: 200,
            ..GseaParams::default()
        };
        let first = gsea(&list, &sets, &params).unwrap();
        let second = gsea(&list, &sets, &params).unwrap();
        let p1: Vec<f64> = first.records.iter().map(|r| r.pvalue).collect();
        let p2: Vec<f64> = second.records.iter().map(|r| r.pvalue).collect();
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_no_same_sign_null_leaves_set_untested() {
        let (nes, p) = normalise(0.4, &[-0.3, -0.1, -0.5]);
        assert!(nes.is_nan() && p.is_nan());
        let (nes, p) = normalise(-0.4, &[-0.3, -0.6, 0.2]);
        assert!((nes - (-0.4 / 0.45)).abs() < 1e-12);
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_permutations() {
        let params = GseaParams {
            permutations: 0,
            ..GseaParams::default()
        };
        assert!(gsea(&ranked(10), &collection(vec![]), &params).is_err());
    }
}

//! Gene set overlap network for the enrichment map

use std::collections::HashSet;

use super::gsea::GseaTable;
use super::ora::OraTable;
use crate::rng::SeededRng;

/// Smallest Jaccard overlap drawn as an edge
pub const DEFAULT_MIN_JACCARD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkNode {
    pub id: String,
    pub name: String,
    /// Genes behind the node (leading edge or overlap)
    pub genes: Vec<String>,
    /// NES for GSEA, fold enrichment for ORA
    pub score: f64,
    pub padj: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkEdge {
    pub source: usize,
    pub target: usize,
    pub jaccard: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentNetwork {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

impl EnrichmentNetwork {
    /// Connect every pair of nodes whose gene overlap reaches `min_jaccard`
    pub fn build(nodes: Vec<NetworkNode>, min_jaccard: f64) -> Self {
        let mut edges = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let jac = jaccard(&nodes[i].genes, &nodes[j].genes);
                if jac >= min_jaccard && jac > 0.0 {
                    edges.push(NetworkEdge {
                        source: i,
                        target: j,
                        jaccard: jac,
                    });
                }
            }
        }
        log::debug!("enrichment network: {} nodes, {} edges", nodes.len(), edges.len());
        Self { nodes, edges }
    }

    /// Top `n` GSEA sets (table order) by their leading edges
    pub fn from_gsea(table: &GseaTable, n: usize, min_jaccard: f64) -> Self {
        let nodes = table
            .records
            .iter()
            .take(n)
            .map(|r| NetworkNode {
                id: r.set_id.clone(),
                name: r.name.clone(),
                genes: r.leading_edge.clone(),
                score: r.nes,
                padj: r.padj,
            })
            .collect();
        Self::build(nodes, min_jaccard)
    }

    /// Top `n` ORA sets with any overlap
    pub fn from_ora(table: &OraTable, n: usize, min_jaccard: f64) -> Self {
        let nodes = table
            .records
            .iter()
            .filter(|r| r.overlap > 0)
            .take(n)
            .map(|r| NetworkNode {
                id: r.set_id.clone(),
                name: r.name.clone(),
                genes: r.genes.clone(),
                score: r.fold_enrichment,
                padj: r.padj,
            })
            .collect();
        Self::build(nodes, min_jaccard)
    }

    pub fn degree(&self, node: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.source == node || e.target == node)
            .count()
    }

    /// Force-directed layout in the unit square (Fruchterman-Reingold with
    /// a linear cooling schedule). Starting positions come from `seed`.
    pub fn layout(&self, seed: u32, iterations: usize) -> Vec<(f64, f64)> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![(0.5, 0.5)];
        }
        let mut rng = SeededRng::new(seed);
        let mut pos: Vec<(f64, f64)> = (0..n).map(|_| (rng.uniform(), rng.uniform())).collect();
        let k = (1.0 / n as f64).sqrt();
        let mut temperature = 0.1;
        let cooling = temperature / (iterations.max(1) as f64 + 1.0);

        for _ in 0..iterations {
            let mut disp = vec![(0.0, 0.0); n];
            for i in 0..n {
                for j in (i + 1)..n {
                    let (dx, dy) = (pos[i].0 - pos[j].0, pos[i].1 - pos[j].1);
                    let d = (dx * dx + dy * dy).sqrt().max(1e-6);
                    let f = k * k / d;
                    disp[i].0 += dx / d * f;
                    disp[i].1 += dy / d * f;
                    disp[j].0 -= dx / d * f;
                    disp[j].1 -= dy / d * f;
                }
            }
            for e in &self.edges {
                let (a, b) = (e.source, e.target);
                let (dx, dy) = (pos[a].0 - pos[b].0, pos[a].1 - pos[b].1);
                let d = (dx * dx + dy * dy).sqrt().max(1e-6);
                let f = d * d / k * e.jaccard;
                disp[a].0 -= dx / d * f;
                disp[a].1 -= dy / d * f;
                disp[b].0 += dx / d * f;
                disp[b].1 += dy / d * f;
            }
            for (p, (dx, dy)) in pos.iter_mut().zip(disp) {
                let len = (dx * dx + dy * dy).sqrt().max(1e-12);
                let step = len.min(temperature);
                p.0 = (p.0 + dx / len * step).clamp(0.0, 1.0);
                p.1 = (p.1 + dy / len * step).clamp(0.0, 1.0);
            }
            temperature -= cooling;
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, genes: &[&str]) -> NetworkNode {
        NetworkNode {
            id: id.to_string(),
            name: id.to_string(),
            genes: genes.iter().map(|g| g.to_string()).collect(),
            score: 1.0,
            padj: 0.01,
        }
    }

    #[test]
    fn test_jaccard() {
        let a: Vec<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["y", "z", "w"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-12);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }

    #[test]
    fn test_edges_above_threshold_only() {
        let net = EnrichmentNetwork::build(
            vec![
                node("a", &["1", "2", "3", "4"]),
                node("b", &["3", "4", "5"]),
                node("c", &["4", "9", "10", "11", "12"]),
            ],
            0.2,
        );
        // a-b 2/5, a-c 1/8, b-c 1/7
        assert_eq!(net.edges.len(), 1);
        assert_eq!((net.edges[0].source, net.edges[0].target), (0, 1));
        assert_eq!(net.degree(0), 1);
        assert_eq!(net.degree(2), 0);
    }

    #[test]
    fn test_layout_is_seeded_and_bounded() {
        let net = EnrichmentNetwork::build(
            vec![node("a", &["1", "2"]), node("b", &["1", "2", "3"]), node("c", &["7"])],
            0.2,
        );
        let first = net.layout(7, 100);
        assert_eq!(first, net.layout(7, 100));
        assert!(first.iter().all(|&(x, y)| (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y)));
        assert_ne!(first, net.layout(8, 100));
    }
}

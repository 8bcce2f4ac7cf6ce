use std::path::Path;

use plotters::prelude::*;

use super::{finish, no_data, padj_color, padj_log_range, truncate_label, DrawResult, FONT};
use crate::enrichment::EnrichmentNetwork;
use crate::error::Result;

const LAYOUT_ITERATIONS: usize = 300;

/// Enrichment map: one node per gene set placed by a seeded force layout,
/// edges for gene overlap. Node size follows the gene count, colour the
/// adjusted p-value.
pub fn enrichment_network(path: &Path, network: &EnrichmentNetwork, seed: u32) -> Result<()> {
    if network.nodes.is_empty() {
        return Err(no_data("network", "gene sets"));
    }
    let positions = network.layout(seed, LAYOUT_ITERATIONS);
    finish("network", path, draw(path, network, &positions))
}

fn draw(path: &Path, network: &EnrichmentNetwork, positions: &[(f64, f64)]) -> DrawResult {
    let (min_log, max_log) = padj_log_range(network.nodes.iter().map(|n| n.padj));
    let max_genes = network.nodes.iter().map(|n| n.genes.len()).max().unwrap_or(1).max(1);

    let root = SVGBackend::new(path, (1100, 1000)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Enrichment map", (FONT, 26))
        .margin(30)
        .build_cartesian_2d(-0.1f64..1.1f64, -0.1f64..1.1f64)?;

    chart.draw_series(network.edges.iter().map(|e| {
        let width = (1.0 + 6.0 * e.jaccard).round() as u32;
        PathElement::new(
            vec![positions[e.source], positions[e.target]],
            BLACK.mix(0.35).stroke_width(width),
        )
    }))?;

    for (node, &(x, y)) in network.nodes.iter().zip(positions) {
        let radius = (6.0 + 18.0 * (node.genes.len() as f64 / max_genes as f64).sqrt()).round() as i32;
        let color = padj_color(node.padj, min_log, max_log);
        chart.draw_series(std::iter::once(Circle::new((x, y), radius, color.mix(0.85).filled())))?;
        chart.draw_series(std::iter::once(Circle::new((x, y), radius, BLACK.stroke_width(1))))?;
        chart.draw_series(std::iter::once(Text::new(
            truncate_label(&node.name, 40),
            (x, y),
            (FONT, 13).into_font(),
        )))?;
    }
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::NetworkNode;

    fn node(id: &str, genes: &[&str], padj: f64) -> NetworkNode {
        NetworkNode {
            id: id.to_string(),
            name: format!("{} name", id),
            genes: genes.iter().map(|g| g.to_string()).collect(),
            score: 1.5,
            padj,
        }
    }

    #[test]
    fn test_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.svg");
        let network = EnrichmentNetwork::build(
            vec![
                node("a", &["1", "2", "3"], 0.001),
                node("b", &["2", "3", "4"], 0.01),
                node("c", &["9"], 0.04),
            ],
            0.2,
        );
        enrichment_network(&path, &network, 42).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("b name"));
        assert!(enrichment_network(&path, &EnrichmentNetwork::default(), 42).is_err());
    }
}

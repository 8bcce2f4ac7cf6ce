//! Gene set enrichment of the differential expression ranking

mod gene_sets;
mod gsea;
mod network;
mod ora;

pub use gene_sets::{GeneSet, GeneSetCollection, GeneSetFormat, GeneSetSource, Ontology, OntologyScope};
pub use gsea::{enrichment_score, gsea, running_sum, GseaParams, GseaRecord, GseaTable};
pub use network::{jaccard, EnrichmentNetwork, NetworkEdge, NetworkNode, DEFAULT_MIN_JACCARD};
pub use ora::{hypergeometric_upper_tail, over_representation, OraRecord, OraTable};

//! Sample-level exploration: correlation, clustering and PCA

mod correlation;
mod pca;

pub use correlation::{
    average_linkage, correlation_distance, pearson_correlation, Dendrogram, Merge, SampleCorrelation,
};
pub use pca::{most_variable_genes, pca, PcaResult, DEFAULT_TOP_GENES};

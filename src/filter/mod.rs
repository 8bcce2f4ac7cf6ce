//! Gene filters: all-zero rows before modelling, Cook's outliers and
//! low-mean genes after testing

mod cooks;
mod independent;
mod zero_counts;

pub use cooks::{
    cooks_distances, cooks_outliers, default_cooks_cutoff, has_cooks_replicates, robust_dispersions,
    MIN_REPLICATES_FOR_COOKS,
};
pub use independent::{independent_filtering, unfiltered_adjustment, FilteringResult};
pub use zero_counts::{remove_zero_count_genes, ZeroCountFilter};

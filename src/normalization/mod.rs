//! Library-depth normalization

mod counts;
mod size_factors;

pub use counts::{column_totals, denormalize, normalized_counts};
pub use size_factors::{estimate_size_factors, median_of_ratios, positive_counts_size_factors, SizeFactorMethod};

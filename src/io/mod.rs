//! Reading count files and writing result tables

mod counts;
mod results;
mod tables;

pub use counts::read_count_matrix;
pub use results::{read_ranked_genes, read_tested_genes, DeRecord, DeTable, ResultsSummary};
pub use tables::{na_float, parse_na_float, write_matrix, write_records, write_vector};

//! Count data, sample conditions and the dataset that carries estimates

mod count_matrix;
mod dataset;
mod samples;

pub use count_matrix::CountMatrix;
pub use dataset::CountDataSet;
pub use samples::{condition_label, SampleTable};

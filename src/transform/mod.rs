//! Log-scale transforms of the count matrix for exploration and plots

mod rlog;
mod shifted_log;

pub use rlog::{rlog, rlog_dataset, RlogMatrix};
pub use shifted_log::{log2_counts, LogCounts};

//! Multiple testing correction

use crate::stats::cmp_f64;

/// Benjamini-Hochberg step-up adjustment.
///
/// Non-finite p-values are not tests: they stay NaN and do not count in
/// the number of hypotheses. Every adjusted value is at least its p-value
/// and at most 1.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| pvalues[i].is_finite()).collect();
    let mut padj = vec![f64::NAN; pvalues.len()];
    let m = order.len();
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| cmp_f64(&pvalues[a], &pvalues[b]));

    let mut running_min = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adjusted = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        padj[i] = running_min;
    }
    padj
}

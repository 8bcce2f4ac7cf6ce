//! Sample-to-sample correlation and its average-linkage clustering

use ndarray::{Array2, ArrayView2};

use crate::error::{PipelineError, Result};

/// Pearson correlation between the columns (samples) of a genes × samples
/// matrix. A sample with no variance correlates NaN with every other sample
/// and 1 with itself, so fewer than two genes gives NaN off the diagonal.
pub fn pearson_correlation(matrix: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (n_genes, n_samples) = matrix.dim();
    if n_samples < 2 {
        return Err(PipelineError::InsufficientSamples {
            needed: 2,
            got: n_samples,
        });
    }
    let centred: Vec<Vec<f64>> = matrix
        .columns()
        .into_iter()
        .map(|col| {
            let m = col.sum() / n_genes as f64;
            col.iter().map(|v| v - m).collect()
        })
        .collect();
    let norms: Vec<f64> = centred
        .iter()
        .map(|c| c.iter().map(|v| v * v).sum::<f64>().sqrt())
        .collect();

    let mut corr = Array2::from_elem((n_samples, n_samples), f64::NAN);
    for i in 0..n_samples {
        corr[[i, i]] = 1.0;
        for j in (i + 1)..n_samples {
            if norms[i] > 0.0 && norms[j] > 0.0 {
                let dot: f64 = centred[i].iter().zip(&centred[j]).map(|(a, b)| a * b).sum();
                let r = (dot / (norms[i] * norms[j])).clamp(-1.0, 1.0);
                corr[[i, j]] = r;
                corr[[j, i]] = r;
            }
        }
    }
    Ok(corr)
}

/// `1 - r`
pub fn correlation_distance(corr: &Array2<f64>) -> Array2<f64> {
    corr.mapv(|r| 1.0 - r)
}

/// One agglomeration step: clusters `left` and `right` joined at `height`.
///
/// Leaves are `0..n`; the cluster formed at step `k` gets id `n + k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
}

/// Average-linkage merges and the resulting leaf order
#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub merges: Vec<Merge>,
    pub order: Vec<usize>,
}

/// Average-linkage clustering of a distance matrix. Undefined distances
/// are skipped when averaging; ties go to the lowest cluster pair.
pub fn average_linkage(distances: &Array2<f64>) -> Dendrogram {
    let n = distances.nrows();
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut ids: Vec<usize> = (0..n).collect();
    let mut active: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    let linkage = |a: &[usize], b: &[usize]| {
        let (sum, count) = a
            .iter()
            .flat_map(|&i| b.iter().map(move |&j| distances[[i, j]]))
            .filter(|d| d.is_finite())
            .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
        if count > 0 {
            sum / count as f64
        } else {
            f64::INFINITY
        }
    };

    while active.len() > 1 {
        let mut best = (0, 1, f64::INFINITY);
        for x in 0..active.len() {
            for y in (x + 1)..active.len() {
                let d = linkage(&members[active[x]], &members[active[y]]);
                if d < best.2 {
                    best = (x, y, d);
                }
            }
        }
        let (x, y, height) = best;
        let (a, b) = (active[x], active[y]);
        merges.push(Merge {
            left: ids[a],
            right: ids[b],
            height,
        });

        let mut joined = members[a].clone();
        joined.extend_from_slice(&members[b]);
        members.push(joined);
        ids.push(n + merges.len() - 1);
        active.remove(y);
        active.remove(x);
        active.push(members.len() - 1);
    }

    let order = active.first().map(|&c| members[c].clone()).unwrap_or_default();
    Dendrogram { merges, order }
}

/// Correlation, distance and clustering of one sample matrix
#[derive(Debug, Clone)]
pub struct SampleCorrelation {
    pub sample_ids: Vec<String>,
    pub correlation: Array2<f64>,
    pub distance: Array2<f64>,
    pub dendrogram: Dendrogram,
}

impl SampleCorrelation {
    pub fn compute(matrix: ArrayView2<f64>, sample_ids: &[String]) -> Result<Self> {
        if sample_ids.len() != matrix.ncols() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample ids", matrix.ncols()),
                got: format!("{} sample ids", sample_ids.len()),
            });
        }
        let correlation = pearson_correlation(matrix)?;
        let distance = correlation_distance(&correlation);
        let dendrogram = average_linkage(&distance);
        log::debug!(
            "sample clustering order: {}",
            dendrogram
                .order
                .iter()
                .map(|&i| sample_ids[i].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            correlation,
            distance,
            dendrogram,
        })
    }

    /// Sample ids in dendrogram leaf order
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.dendrogram
            .order
            .iter()
            .map(|&i| self.sample_ids[i].as_str())
            .collect()
    }
}

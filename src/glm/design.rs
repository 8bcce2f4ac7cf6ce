//! Model matrices for the per-gene GLMs

use ndarray::Array2;

use crate::data::SampleTable;
use crate::error::{PipelineError, Result};

/// A model matrix with named columns.
///
/// `groups` maps every sample to a design cell when the design is a single
/// factor (or intercept only). Cell-based shortcuts such as group means and
/// per-cell variances rely on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    matrix: Array2<f64>,
    column_names: Vec<String>,
    groups: Option<Vec<usize>>,
    contrast: Option<(String, String)>,
}

impl Design {
    /// Intercept plus one indicator per non-reference condition, with
    /// `denominator` as the reference level. The coefficient of interest is
    /// the `numerator` indicator.
    pub fn for_contrast(samples: &SampleTable, numerator: &str, denominator: &str) -> Result<Self> {
        samples.check_contrast(numerator, denominator)?;

        let mut levels = vec![denominator.to_string()];
        levels.extend(samples.levels().into_iter().filter(|l| l != denominator));

        let n = samples.n_samples();
        let p = levels.len();
        let mut matrix = Array2::<f64>::zeros((n, p));
        let mut groups = Vec::with_capacity(n);
        for (i, condition) in samples.conditions().iter().enumerate() {
            matrix[[i, 0]] = 1.0;
            let level = levels
                .iter()
                .position(|l| l == condition)
                .ok_or_else(|| PipelineError::InvalidInput {
                    reason: format!("condition '{}' missing from design levels", condition),
                })?;
            if level > 0 {
                matrix[[i, level]] = 1.0;
            }
            groups.push(level);
        }

        let mut column_names = vec!["Intercept".to_string()];
        for level in &levels[1..] {
            column_names.push(format!("condition_{}_vs_{}", level, denominator));
        }

        Ok(Self {
            matrix,
            column_names,
            groups: Some(groups),
            contrast: Some((numerator.to_string(), denominator.to_string())),
        })
    }

    /// Single intercept column (blind dispersion estimation)
    pub fn intercept_only(n_samples: usize) -> Self {
        Self {
            matrix: Array2::ones((n_samples, 1)),
            column_names: vec!["Intercept".to_string()],
            groups: Some(vec![0; n_samples]),
            contrast: None,
        }
    }

    /// Intercept plus one indicator per sample (rlog)
    pub fn per_sample(n_samples: usize) -> Self {
        let mut matrix = Array2::<f64>::zeros((n_samples, n_samples + 1));
        let mut column_names = vec!["Intercept".to_string()];
        for i in 0..n_samples {
            matrix[[i, 0]] = 1.0;
            matrix[[i, i + 1]] = 1.0;
            column_names.push(format!("sample{}", i + 1));
        }
        Self {
            matrix,
            column_names,
            groups: None,
            contrast: None,
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn groups(&self) -> Option<&[usize]> {
        self.groups.as_deref()
    }

    /// Number of samples in each design cell
    pub fn group_sizes(&self) -> Option<Vec<usize>> {
        let groups = self.groups.as_ref()?;
        let n_groups = groups.iter().max().map_or(0, |m| m + 1);
        let mut sizes = vec![0; n_groups];
        for &g in groups {
            sizes[g] += 1;
        }
        Some(sizes)
    }

    /// `(numerator, denominator)` of the tested contrast
    pub fn contrast(&self) -> Option<(&str, &str)> {
        self.contrast.as_ref().map(|(n, d)| (n.as_str(), d.as_str()))
    }

    /// Column holding the numerator-vs-denominator log fold change
    pub fn contrast_coef(&self) -> Result<usize> {
        let (numerator, denominator) = self.contrast().ok_or_else(|| PipelineError::InvalidInput {
            reason: "design has no contrast".to_string(),
        })?;
        let name = format!("condition_{}_vs_{}", numerator, denominator);
        self.column_names
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| PipelineError::DegenerateContrast {
                reason: format!("no design column named {}", name),
            })
    }

    /// Residual degrees of freedom, samples minus coefficients
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_coefs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table(names: &[&str]) -> SampleTable {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        SampleTable::from_sample_names(&names).unwrap()
    }

    #[test]
    fn test_two_level_design_uses_denominator_as_reference() {
        let samples = table(&["ctrl_1", "trt_1", "ctrl_2", "trt_2"]);
        let design = Design::for_contrast(&samples, "trt", "ctrl").unwrap();
        assert_eq!(
            design.matrix(),
            &array![[1.0, 0.0], [1.0, 1.0], [1.0, 0.0], [1.0, 1.0]]
        );
        assert_eq!(design.contrast_coef().unwrap(), 1);
        assert_eq!(design.groups().unwrap(), &[0, 1, 0, 1]);
        assert_eq!(design.group_sizes().unwrap(), vec![2, 2]);
        assert_eq!(design.residual_df(), 2);
    }

    #[test]
    fn test_reference_can_sort_after_numerator() {
        let samples = table(&["A_1", "A_2", "Z_1", "Z_2"]);
        let design = Design::for_contrast(&samples, "A", "Z").unwrap();
        assert_eq!(design.column_names()[1], "condition_A_vs_Z");
        assert_eq!(design.matrix()[[0, 1]], 1.0);
        assert_eq!(design.matrix()[[2, 1]], 0.0);
    }

    #[test]
    fn test_three_levels_keep_extra_column() {
        let samples = table(&["a_1", "b_1", "c_1", "a_2", "b_2", "c_2"]);
        let design = Design::for_contrast(&samples, "c", "a").unwrap();
        assert_eq!(design.n_coefs(), 3);
        assert_eq!(design.column_names()[design.contrast_coef().unwrap()], "condition_c_vs_a");
    }

    #[test]
    fn test_per_sample_design() {
        let design = Design::per_sample(3);
        assert_eq!(design.n_coefs(), 4);
        assert_eq!(design.matrix().row(2).to_vec(), vec![1.0, 0.0, 0.0, 1.0]);
        assert!(design.groups().is_none());
    }

    #[test]
    fn test_degenerate_contrast_is_rejected() {
        let samples = table(&["a_1", "a_2"]);
        assert!(Design::for_contrast(&samples, "b", "a").is_err());
    }
}

//! Per-sample condition labels derived from sample names

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Condition label of a sample: the name with its trailing `_<digits>`
/// replicate suffix removed (`"WT_1"` -> `"WT"`).
pub fn condition_label(sample: &str) -> Result<&str> {
    let invalid = |reason: &str| PipelineError::InvalidSampleName {
        sample: sample.to_string(),
        reason: reason.to_string(),
    };
    let (prefix, suffix) = sample
        .rsplit_once('_')
        .ok_or_else(|| invalid("expected a '_<replicate>' suffix"))?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("replicate suffix must be digits"));
    }
    if prefix.is_empty() {
        return Err(invalid("condition prefix is empty"));
    }
    Ok(prefix)
}

/// Sample ids and their condition labels, in matrix column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    sample_ids: Vec<String>,
    conditions: Vec<String>,
}

impl SampleTable {
    pub fn from_sample_names(sample_ids: &[String]) -> Result<Self> {
        let conditions = sample_ids
            .iter()
            .map(|s| condition_label(s).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            conditions,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn condition(&self, sample_idx: usize) -> Option<&str> {
        self.conditions.get(sample_idx).map(String::as_str)
    }

    /// Distinct condition labels, sorted
    pub fn levels(&self) -> Vec<String> {
        let mut levels = self.conditions.clone();
        levels.sort();
        levels.dedup();
        levels
    }

    pub fn samples_with_level(&self, level: &str) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() == level)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of replicates per condition
    pub fn level_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for c in &self.conditions {
            *counts.entry(c.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Default contrast when none is configured: second sorted level over
    /// the first.
    pub fn default_contrast(&self) -> Result<(String, String)> {
        let levels = self.levels();
        if levels.len() < 2 {
            return Err(PipelineError::DegenerateContrast {
                reason: format!(
                    "need at least 2 condition levels, found {} ({})",
                    levels.len(),
                    levels.join(", ")
                ),
            });
        }
        Ok((levels[1].clone(), levels[0].clone()))
    }

    /// Check that `numerator` vs `denominator` is a usable two-level contrast
    pub fn check_contrast(&self, numerator: &str, denominator: &str) -> Result<()> {
        let levels = self.levels();
        if levels.len() < 2 {
            return Err(PipelineError::DegenerateContrast {
                reason: format!("need at least 2 condition levels, found {}", levels.len()),
            });
        }
        if numerator == denominator {
            return Err(PipelineError::DegenerateContrast {
                reason: format!("numerator and denominator are both '{}'", numerator),
            });
        }
        for level in [numerator, denominator] {
            if !levels.iter().any(|l| l == level) {
                return Err(PipelineError::DegenerateContrast {
                    reason: format!(
                        "level '{}' not present among conditions: {}",
                        level,
                        levels.join(", ")
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_condition_label_strips_replicate_suffix() {
        assert_eq!(condition_label("WT_1").unwrap(), "WT");
        assert_eq!(condition_label("KO_rep_12").unwrap(), "KO_rep");
        assert_eq!(condition_label("treated_007").unwrap(), "treated");
    }

    #[test]
    fn test_condition_label_rejects_unparseable_names() {
        for bad in ["WT", "WT_", "WT_a1", "_3", "WT1"] {
            assert!(
                matches!(condition_label(bad), Err(PipelineError::InvalidSampleName { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_sample_table_levels() {
        let table = SampleTable::from_sample_names(&names(&["WT_1", "KO_1", "WT_2", "KO_2"])).unwrap();
        assert_eq!(table.levels(), names(&["KO", "WT"]));
        assert_eq!(table.samples_with_level("WT"), vec![0, 2]);
        assert_eq!(table.level_counts()["KO"], 2);
        assert_eq!(table.default_contrast().unwrap(), ("WT".to_string(), "KO".to_string()));
    }

    #[test]
    fn test_check_contrast() {
        let table = SampleTable::from_sample_names(&names(&["A_1", "A_2", "B_1", "B_2"])).unwrap();
        assert!(table.check_contrast("B", "A").is_ok());
        assert!(table.check_contrast("A", "A").is_err());
        assert!(table.check_contrast("C", "A").is_err());

        let single = SampleTable::from_sample_names(&names(&["A_1", "A_2"])).unwrap();
        assert!(matches!(
            single.check_contrast("A", "B"),
            Err(PipelineError::DegenerateContrast { .. })
        ));
        assert!(single.default_contrast().is_err());
    }
}

//! Count matrix reader

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ErrorKind, ReaderBuilder, Trim};
use ndarray::Array2;

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Field delimiter: by extension for `.csv`, `.tsv` and `.txt`, otherwise
/// whichever of tab, comma or semicolon the first non-blank line contains
fn detect_delimiter(path: &Path) -> Result<u8> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("csv") => return Ok(b','),
        Some("tsv") | Some("txt") => return Ok(b'\t'),
        _ => {}
    }
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let found = [b'\t', b',', b';'].into_iter().find(|d| line.contains(*d as char));
        return Ok(found.unwrap_or(b','));
    }
    Ok(b',')
}

fn parse_count(value: &str, gene: &str, sample: &str) -> Result<f64> {
    let count = value.parse::<f64>().map_err(|_| PipelineError::InvalidCountMatrix {
        reason: format!("non-numeric count '{}' for gene '{}' in sample '{}'", value, gene, sample),
    })?;
    if !count.is_finite() || count < 0.0 || count.fract() != 0.0 {
        return Err(PipelineError::InvalidCountMatrix {
            reason: format!(
                "count {} for gene '{}' in sample '{}' is not a non-negative integer",
                value, gene, sample
            ),
        });
    }
    Ok(count)
}

/// Ragged rows are a matrix error, everything else stays a CSV error
fn row_error(e: csv::Error) -> PipelineError {
    if let ErrorKind::UnequalLengths { pos, expected_len, len } = e.kind() {
        return PipelineError::InvalidCountMatrix {
            reason: format!(
                "line {} has {} columns, expected {}",
                pos.as_ref().map_or(0, |p| p.line()),
                len,
                expected_len
            ),
        };
    }
    PipelineError::CsvError(e)
}

/// Read a gene × sample count matrix.
///
/// The first header cell names the gene column and is ignored; the rest
/// are sample names. Every data row holds a gene id and one count per
/// sample. Quoted fields may contain the delimiter. Blank lines are skipped.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let delimiter = detect_delimiter(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(false)
        .trim(Trim::All)
        .from_path(path)?;

    let header = reader.headers()?.clone();
    if header.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    if sample_ids.is_empty() {
        return Err(PipelineError::InvalidCountMatrix {
            reason: format!("header of {} has no sample columns", path.display()),
        });
    }
    let n_samples = sample_ids.len();

    let mut gene_ids: Vec<String> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(row_error)?;
        let gene = record.get(0).unwrap_or_default().to_string();
        for (cell, sample) in record.iter().skip(1).zip(&sample_ids) {
            values.push(parse_count(cell, &gene, sample)?);
        }
        gene_ids.push(gene);
    }

    if gene_ids.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("no genes in {}", path.display()),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        PipelineError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!(
        "Read {} genes x {} samples from {}",
        gene_ids.len(),
        n_samples,
        path.display()
    );
    CountMatrix::new(counts, gene_ids, sample_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn file_with(suffix: &str, text: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", text).unwrap();
        file
    }

    #[test]
    fn test_read_csv_with_quotes() {
        let file = file_with(
            ".csv",
            "\"gene\",\"WT_1\",\"WT_2\",\"KO_1\"\n\"g1\",10,12,30\ng2,0,0,0\n\n",
        );
        let m = read_count_matrix(file.path()).unwrap();
        assert_eq!(m.sample_ids(), &["WT_1", "WT_2", "KO_1"]);
        assert_eq!(m.gene_ids(), &["g1", "g2"]);
        assert_eq!(m.counts()[[0, 2]], 30.0);
    }

    #[test]
    fn test_quoted_gene_id_may_contain_delimiter() {
        let file = file_with(
            ".csv",
            "gene_id,WT_1,WT_2,WT_3,KO_1,KO_2,KO_3\n\"ENSG1,alt\",10,12,11,40,44,42\nENSG2, 5 ,6,7,8,9,10\n",
        );
        let m = read_count_matrix(file.path()).unwrap();
        assert_eq!(m.gene_ids(), &["ENSG1,alt", "ENSG2"]);
        assert_eq!(m.n_samples(), 6);
        assert_eq!(m.counts()[[0, 3]], 40.0);
        assert_eq!(m.counts()[[1, 0]], 5.0);
    }

    #[test]
    fn test_sniffs_tab_without_extension() {
        let file = file_with(".counts", "gene_id\ts_1\ts_2\ngene1\t100\t200\n");
        let m = read_count_matrix(file.path()).unwrap();
        assert_eq!((m.n_genes(), m.n_samples()), (1, 2));
    }

    #[test]
    fn test_rejects_bad_cells() {
        for body in ["g1,1.5,2\n", "g1,-1,2\n", "g1,abc,2\n", "g1,1\n", "g1,NaN,2\n"] {
            let file = file_with(".csv", &format!("gene,A_1,A_2\n{}", body));
            assert!(
                matches!(
                    read_count_matrix(file.path()),
                    Err(PipelineError::InvalidCountMatrix { .. })
                ),
                "{:?} should be rejected",
                body
            );
        }
    }

    #[test]
    fn test_empty_and_duplicate() {
        let empty = file_with(".csv", "");
        assert!(matches!(
            read_count_matrix(empty.path()),
            Err(PipelineError::EmptyData { .. })
        ));
        let header_only = file_with(".csv", "gene,A_1\n");
        assert!(matches!(
            read_count_matrix(header_only.path()),
            Err(PipelineError::EmptyData { .. })
        ));
        let dup = file_with(".csv", "gene,A_1,A_1\ng1,1,2\n");
        assert!(read_count_matrix(dup.path()).is_err());
        assert!(read_count_matrix("/nonexistent/counts.csv").is_err());
    }
}

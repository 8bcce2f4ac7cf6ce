//! Tab-separated writers shared by every output table

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, ArrayView2};
use serde::{Serialize, Serializer};

use crate::error::{PipelineError, Result};

/// Serialize a float, writing undefined values as `NA`
pub fn na_float<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_str("NA")
    }
}

/// Parse a float cell, reading `NA` (and empty cells) as NaN
pub fn parse_na_float(cell: &str) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|_| PipelineError::InvalidInput {
        reason: format!("invalid numeric value '{}'", cell),
    })
}

fn format_cell(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        "NA".to_string()
    }
}

/// Write serializable records as a TSV with a header row
pub fn write_records<P: AsRef<Path>, T: Serialize>(path: P, records: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a labelled matrix: one row per `row_ids`, one column per `col_ids`
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    corner: &str,
    row_ids: &[String],
    col_ids: &[String],
    values: ArrayView2<f64>,
) -> Result<()> {
    if values.dim() != (row_ids.len(), col_ids.len()) {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} x {}", row_ids.len(), col_ids.len()),
            got: format!("{} x {}", values.nrows(), values.ncols()),
        });
    }
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{}\t{}", corner, col_ids.join("\t"))?;
    for (id, row) in row_ids.iter().zip(values.rows()) {
        let cells: Vec<String> = row.iter().map(|&v| format_cell(v)).collect();
        writeln!(file, "{}\t{}", id, cells.join("\t"))?;
    }
    file.flush()?;
    Ok(())
}

/// Write one named value per id
pub fn write_vector<P: AsRef<Path>>(path: P, id_header: &str, value_header: &str, ids: &[String], values: &Array1<f64>) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{}\t{}", id_header, value_header)?;
    for (id, &v) in ids.iter().zip(values.iter()) {
        writeln!(file, "{}\t{}", id, format_cell(v))?;
    }
    file.flush()?;
    Ok(())
}

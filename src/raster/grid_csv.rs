use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use std::io::Cursor;
use tracing::debug;

use super::RasterGrid;
use crate::table::utils::{clean_str, parse_number};

/// All labels as numbers, or `None` if any label is not numeric.
fn numeric_labels(labels: &[String]) -> Option<Vec<f64>> {
    labels.iter().map(|l| parse_number(l)).collect()
}

/// Parse a matrix-style CSV: a header of column labels and one row per grid
/// row, optionally led by a row-label column (detected from an empty or
/// non-numeric first header cell). Numeric labels become coordinates.
pub fn parse_grid_csv(source_id: &str, bytes: &[u8]) -> Result<RasterGrid> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(bytes));

    let header: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", source_id))?
        .iter()
        .map(clean_str)
        .collect();
    if header.is_empty() {
        bail!("{}: empty header", source_id);
    }
    let has_row_labels = parse_number(&header[0]).is_none();
    let col_labels: Vec<String> = header[usize::from(has_row_labels)..].to_vec();
    let cols = col_labels.len();

    let mut values = Vec::new();
    let mut row_labels = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("parsing grid row {} of {}", i + 1, source_id))?;
        let mut cells = record.iter();
        if has_row_labels {
            row_labels.push(clean_str(cells.next().unwrap_or("")));
        }
        values.extend(cells.map(|c| parse_number(c).unwrap_or(f64::NAN)));
    }
    let rows = if has_row_labels {
        row_labels.len()
    } else {
        values.len().checked_div(cols).unwrap_or(0)
    };
    if rows == 0 || cols == 0 {
        bail!("{}: grid has no samples", source_id);
    }

    let x = numeric_labels(&col_labels).unwrap_or_else(|| (0..cols).map(|c| c as f64).collect());
    let y = if has_row_labels {
        numeric_labels(&row_labels).unwrap_or_else(|| (0..rows).map(|r| r as f64).collect())
    } else {
        (0..rows).map(|r| r as f64).collect()
    };
    debug!(source = source_id, rows, cols, "parsed csv grid");

    RasterGrid::new(values, rows, cols, x, y).map_err(Into::into)
}

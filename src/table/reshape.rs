// src/table/reshape.rs

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Builder, Int64Builder, UInt32Array},
    compute,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::convert::{downcast_f64, downcast_str};
use super::utils::{parse_number, year_from_label};
use super::Dataset;

/// Columns whose header encodes a year, with that year, in header order.
pub fn year_columns(dataset: &Dataset) -> Vec<(usize, i64)> {
    dataset
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter_map(|(i, f)| year_from_label(f.name()).map(|y| (i, y)))
        .collect()
}

/// Turn a column-per-year table into one row per (entity, year).
///
/// Every non-year column is carried as an id column. The output gets
/// `year_column` (Int64) and `value_column` (Float64) appended; rows are
/// entity-major with years in header order. A table without year-named
/// columns is returned unchanged.
#[instrument(level = "debug", skip(dataset), fields(source = %dataset.source_id))]
pub fn melt_years(dataset: &Dataset, year_column: &str, value_column: &str) -> Result<Dataset> {
    let years = year_columns(dataset);
    if years.is_empty() {
        return Ok(dataset.clone());
    }

    let batch = &dataset.batch;
    let schema = batch.schema();
    let id_idx: Vec<usize> = (0..batch.num_columns())
        .filter(|i| !years.iter().any(|(y, _)| y == i))
        .collect();

    // value columns as f64, whatever they were parsed as
    let mut values: Vec<ArrayRef> = Vec::with_capacity(years.len());
    for (i, _) in &years {
        let col = batch.column(*i);
        let as_f64: ArrayRef = match col.data_type() {
            DataType::Float64 => col.clone(),
            DataType::Utf8 => {
                let s = downcast_str(col)?;
                let parsed: arrow::array::Float64Array =
                    s.iter().map(|o| o.and_then(parse_number)).collect();
                Arc::new(parsed)
            }
            _ => compute::cast(col, &DataType::Float64)
                .with_context(|| format!("casting `{}` to numbers", schema.field(*i).name()))?,
        };
        values.push(as_f64);
    }

    let n_rows = batch.num_rows();
    let n_out = n_rows * years.len();
    let mut take_idx = Vec::with_capacity(n_out);
    let mut year_b = Int64Builder::with_capacity(n_out);
    let mut value_b = Float64Builder::with_capacity(n_out);

    for row in 0..n_rows {
        for (k, (_, year)) in years.iter().enumerate() {
            take_idx.push(row as u32);
            year_b.append_value(*year);
            let v = downcast_f64(&values[k])?;
            if v.is_null(row) || !v.value(row).is_finite() {
                value_b.append_null();
            } else {
                value_b.append_value(v.value(row));
            }
        }
    }

    let indices = UInt32Array::from(take_idx);
    let mut fields: Vec<Field> = Vec::with_capacity(id_idx.len() + 2);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(id_idx.len() + 2);
    for i in &id_idx {
        fields.push(schema.field(*i).clone());
        columns.push(compute::take(batch.column(*i).as_ref(), &indices, None)?);
    }
    fields.push(Field::new(year_column, DataType::Int64, true));
    columns.push(Arc::new(year_b.finish()));
    fields.push(Field::new(value_column, DataType::Float64, true));
    columns.push(Arc::new(value_b.finish()));

    let out = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("building long-format batch")?;
    debug!(
        entities = n_rows,
        years = years.len(),
        rows = out.num_rows(),
        "melted wide table"
    );
    Ok(Dataset::new(dataset.source_id.clone(), out))
}

use crate::table::types::{build_arrow_schema, ColumnSpec, SemanticType};
use crate::table::utils;
use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, Float64Array, Float64Builder, Int64Builder, StringArray,
        StringBuilder,
    },
    compute,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::debug;

/// Build a typed batch from raw string rows using the resolved column kinds.
pub fn rows_to_batch(cols: &[ColumnSpec], rows: &[Vec<String>]) -> Result<RecordBatch> {
    let mut out: Vec<ArrayRef> = Vec::with_capacity(cols.len());

    for (idx, col) in cols.iter().enumerate() {
        let cells = rows.iter().map(|r| r.get(idx).map(String::as_str).unwrap_or(""));
        let arr: ArrayRef = match col.kind {
            SemanticType::Year => {
                let mut b = Int64Builder::with_capacity(rows.len());
                for cell in cells {
                    b.append_option(utils::coerce_year(cell));
                }
                Arc::new(b.finish())
            }
            SemanticType::Number => {
                let mut b = Float64Builder::with_capacity(rows.len());
                for cell in cells {
                    b.append_option(utils::parse_number(cell));
                }
                Arc::new(b.finish())
            }
            SemanticType::Text => {
                let mut b = StringBuilder::new();
                for cell in cells {
                    let c = utils::clean_str(cell);
                    if utils::is_null_token(&c) {
                        b.append_null();
                    } else {
                        b.append_value(c);
                    }
                }
                Arc::new(b.finish())
            }
        };
        out.push(arr);
    }

    RecordBatch::try_new(build_arrow_schema(cols), out).context("building typed record batch")
}

/// Coerce declared columns of an already-typed batch (e.g. read from Parquet)
/// to the arrow type of their semantic kind. Undeclared columns pass through.
pub fn coerce_batch(batch: &RecordBatch, declared: &[ColumnSpec]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut out = Vec::with_capacity(batch.num_columns());

    for col in declared {
        if schema.index_of(&col.name).is_err() {
            return Err(anyhow!("missing declared column `{}`", col.name));
        }
    }

    for (i, field) in schema.fields().iter().enumerate() {
        let arr = batch.column(i);
        match declared.iter().find(|c| &c.name == field.name()) {
            Some(col) => {
                let coerced = coerce_array(arr, col.kind)
                    .with_context(|| format!("coercing `{}` to {}", col.name, col.kind.as_str()))?;
                fields.push(Field::new(field.name(), col.kind.arrow_type(), true));
                out.push(coerced);
            }
            None => {
                fields.push(field.as_ref().clone());
                out.push(arr.clone());
            }
        }
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), out).map_err(Into::into)
}

fn coerce_array(arr: &ArrayRef, kind: SemanticType) -> Result<ArrayRef> {
    let is_text = matches!(arr.data_type(), DataType::Utf8 | DataType::LargeUtf8);
    match kind {
        SemanticType::Text => Ok(compute::cast(arr, &DataType::Utf8)?),
        SemanticType::Number if is_text => {
            let s = compute::cast(arr, &DataType::Utf8)?;
            let s = downcast_str(&s)?;
            let v: Float64Array = s.iter().map(|o| o.and_then(utils::parse_number)).collect();
            Ok(Arc::new(v))
        }
        SemanticType::Number => {
            let f = compute::cast(arr, &DataType::Float64)?;
            let f = downcast_f64(&f)?;
            let v: Float64Array = f.iter().map(|o| o.filter(|x| x.is_finite())).collect();
            Ok(Arc::new(v))
        }
        SemanticType::Year if is_text => {
            let s = compute::cast(arr, &DataType::Utf8)?;
            let s = downcast_str(&s)?;
            let mut b = Int64Builder::with_capacity(s.len());
            for o in s.iter() {
                b.append_option(o.and_then(utils::coerce_year));
            }
            Ok(Arc::new(b.finish()))
        }
        SemanticType::Year => {
            let f = compute::cast(arr, &DataType::Float64)?;
            let f = downcast_f64(&f)?;
            let mut b = Int64Builder::with_capacity(f.len());
            for o in f.iter() {
                b.append_option(o.filter(|x| x.is_finite() && x.fract() == 0.0).map(|x| x as i64));
            }
            Ok(Arc::new(b.finish()))
        }
    }
}

/// Drop rows whose year-kind columns are null. Returns the batch and the number dropped.
pub fn drop_null_years(batch: RecordBatch, cols: &[ColumnSpec]) -> Result<(RecordBatch, usize)> {
    let mut mask: Option<BooleanArray> = None;
    for col in cols.iter().filter(|c| c.kind == SemanticType::Year) {
        let idx = batch.schema().index_of(&col.name)?;
        let valid = compute::is_not_null(batch.column(idx).as_ref())?;
        mask = Some(match mask {
            Some(m) => compute::and(&m, &valid)?,
            None => valid,
        });
    }

    let Some(mask) = mask else {
        return Ok((batch, 0));
    };
    let kept = mask.true_count();
    let dropped = batch.num_rows() - kept;
    if dropped == 0 {
        return Ok((batch, 0));
    }
    debug!(dropped, "dropping rows with non-numeric years");
    let filtered = compute::filter_record_batch(&batch, &mask)?;
    Ok((filtered, dropped))
}

pub(crate) fn downcast_str(arr: &ArrayRef) -> Result<&StringArray> {
    arr.as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("expected a Utf8 column, found {}", arr.data_type()))
}

pub(crate) fn downcast_f64(arr: &ArrayRef) -> Result<&Float64Array> {
    arr.as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow!("expected a Float64 column, found {}", arr.data_type()))
}

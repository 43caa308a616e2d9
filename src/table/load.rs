use anyhow::{Context, Result};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use csv::ReaderBuilder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::io::Cursor;
use tracing::{debug, info, instrument};

use super::convert::{coerce_batch, drop_null_years, rows_to_batch};
use super::derive::{resolve_columns, SAMPLE_LIMIT};
use super::types::{ColumnSpec, SemanticType};
use super::Dataset;

/// Byte offset just past the first `skip_rows` lines.
fn skip_lines(text: &str, skip_rows: usize) -> usize {
    let mut pos = 0;
    for _ in 0..skip_rows {
        match text[pos..].find('\n') {
            Some(i) => pos += i + 1,
            None => return text.len(),
        }
    }
    pos
}

/// Parse a delimited text table. The first non-skipped line is the header.
#[instrument(level = "debug", skip(bytes, declared), fields(len = bytes.len()))]
pub fn parse_csv(
    source_id: &str,
    bytes: &[u8],
    skip_rows: usize,
    declared: &[ColumnSpec],
) -> Result<Dataset> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}');
    let body = &text[skip_lines(text, skip_rows)..];

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(body.as_bytes()));

    let mut headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", source_id))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    // exports with a trailing delimiter carry an unnamed last column
    while headers.last().is_some_and(|h| h.is_empty()) {
        headers.pop();
    }

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("parsing CSV record {} of {}", i + 1, source_id))?;
        rows.push(
            record
                .iter()
                .take(headers.len())
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        );
    }

    let sample_end = rows.len().min(SAMPLE_LIMIT);
    let cols = resolve_columns(source_id, &headers, declared, &rows[..sample_end])?;
    let batch = rows_to_batch(&cols, &rows)?;
    let (batch, dropped) = drop_null_years(batch, &cols)?;

    info!(
        source = source_id,
        rows = batch.num_rows(),
        dropped,
        columns = cols.len(),
        "loaded csv"
    );
    Ok(Dataset::new(source_id, batch))
}

/// Parse a Parquet file held in memory, coercing declared columns.
#[instrument(level = "debug", skip(bytes, declared))]
pub fn parse_parquet(source_id: &str, bytes: Vec<u8>, declared: &[ColumnSpec]) -> Result<Dataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .with_context(|| format!("opening parquet {}", source_id))?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(8192)
        .build()
        .with_context(|| format!("building parquet reader for {}", source_id))?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.with_context(|| format!("reading batch from {}", source_id))?);
    }
    debug!(source = source_id, batches = batches.len(), "read parquet");

    let merged = if batches.is_empty() {
        RecordBatch::new_empty(schema.clone())
    } else {
        concat_batches(&schema, &batches).context("concatenating parquet batches")?
    };

    let coerced = coerce_batch(&merged, declared)
        .with_context(|| format!("coercing declared columns of {}", source_id))?;
    let year_cols: Vec<ColumnSpec> = declared
        .iter()
        .filter(|c| c.kind == SemanticType::Year)
        .cloned()
        .collect();
    let (batch, dropped) = drop_null_years(coerced, &year_cols)?;

    info!(source = source_id, rows = batch.num_rows(), dropped, "loaded parquet");
    Ok(Dataset::new(source_id, batch))
}

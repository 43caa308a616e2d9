// src/table/mod.rs
pub mod convert;
pub mod derive;
pub mod load;
pub mod reshape;
pub mod types;
pub mod utils;
pub mod years;

use crate::error::{PageResult, UnknownColumnSnafu};
use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

pub use load::{parse_csv, parse_parquet};
pub use reshape::melt_years;
pub use types::{ColumnSpec, SemanticType};
pub use years::{YearFilter, YearSlice};

/// An in-memory table loaded from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub source_id: String,
    pub batch: RecordBatch,
}

impl Dataset {
    pub fn new(source_id: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            source_id: source_id.into(),
            batch,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column_index(&self, name: &str) -> PageResult<usize> {
        self.batch
            .schema()
            .index_of(name)
            .ok()
            .ok_or_else(|| UnknownColumnSnafu { column: name }.build())
    }

    pub fn column(&self, name: &str) -> PageResult<&ArrayRef> {
        let idx = self.column_index(name)?;
        Ok(self.batch.column(idx))
    }
}

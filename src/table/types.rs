// src/table/types.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Semantic role of a column as declared by a page.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Text,
    Number,
    Year,
}

impl SemanticType {
    pub fn as_str(&self) -> &str {
        match self {
            SemanticType::Text => "text",
            SemanticType::Number => "number",
            SemanticType::Year => "year",
        }
    }

    /// Text → Utf8, Number → Float64, Year → Int64
    pub fn arrow_type(&self) -> DataType {
        match self {
            SemanticType::Text => DataType::Utf8,
            SemanticType::Number => DataType::Float64,
            SemanticType::Year => DataType::Int64,
        }
    }
}

/// A single declared column.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: SemanticType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: SemanticType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Number)
    }

    pub fn year(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Year)
    }
}

/// Build an ArrowSchema (inside an Arc) from resolved columns. Every field is nullable.
pub fn build_arrow_schema(cols: &[ColumnSpec]) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = cols
        .iter()
        .map(|col| ArrowField::new(&col.name, col.kind.arrow_type(), true))
        .collect();

    Arc::new(ArrowSchema::new(fields))
}

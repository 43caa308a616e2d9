// src/error.rs

use snafu::Snafu;

pub type PageResult<T> = std::result::Result<T, PageError>;

/// Failure kinds surfaced at the page boundary.
///
/// Loaders work with `anyhow` internally and classify into `DataUnavailable`
/// when they hand a result back to a page.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum PageError {
    #[snafu(display("data unavailable for {source_id}: {reason}"))]
    DataUnavailable { source_id: String, reason: String },

    #[snafu(display("no rows with a `{column}` value for year {year}"))]
    EmptySelection { year: i64, column: String },

    #[snafu(display(
        "raster shape {rows}x{cols} ({values_len} samples) does not match coordinates x={x_len} y={y_len}"
    ))]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        values_len: usize,
        x_len: usize,
        y_len: usize,
    },

    #[snafu(display("no valid years in {source_id}"))]
    NoData { source_id: String },

    #[snafu(display("column `{column}` not found"))]
    UnknownColumn { column: String },

    #[snafu(display("required environment variable `{name}` is not set"))]
    MissingSecret { name: String },

    #[snafu(display("unknown page `{page}`"))]
    UnknownPage { page: String },

    #[snafu(display("{message}"))]
    Unclassified { message: String },
}

impl PageError {
    /// Classify a loader failure, keeping the whole context chain in the message.
    pub fn data_unavailable(source_id: impl Into<String>, err: &anyhow::Error) -> Self {
        PageError::DataUnavailable {
            source_id: source_id.into(),
            reason: format!("{:#}", err),
        }
    }

    /// Kinds that are shown as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            PageError::EmptySelection { .. } | PageError::NoData { .. }
        )
    }
}

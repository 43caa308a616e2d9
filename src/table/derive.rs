use anyhow::anyhow;
use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::types::{ColumnSpec, SemanticType};
use super::utils::{clean_str, is_null_token};

pub const SAMPLE_LIMIT: usize = 1_000;

/// Resolve a kind for every header:
///  - declared columns keep their declared kind
///  - undeclared columns look at up to SAMPLE_LIMIT rows, ignoring empty cells;
///    number if every sampled cell parses as f64, otherwise text
///  - no samples at all defaults to text
///
/// Errors when a declared column is missing from the header.
pub fn resolve_columns(
    source_id: &str,
    header_names: &[String],
    declared: &[ColumnSpec],
    sample_rows: &[Vec<String>],
) -> Result<Vec<ColumnSpec>> {
    if header_names.is_empty() {
        return Err(anyhow!("`{}` has no header row", source_id));
    }

    let by_name: HashMap<&str, SemanticType> =
        declared.iter().map(|c| (c.name.as_str(), c.kind)).collect();

    for col in declared {
        if !header_names.iter().any(|h| h.trim() == col.name) {
            return Err(anyhow!(
                "`{}` is missing declared column `{}`",
                source_id,
                col.name
            ));
        }
    }

    if sample_rows.iter().any(|r| r.len() > header_names.len()) {
        warn!(
            "`{}`: some rows have more cells than headers ({} headers)",
            source_id,
            header_names.len()
        );
    }

    let mut cols = Vec::with_capacity(header_names.len());
    for (idx, raw_name) in header_names.iter().enumerate() {
        let name = raw_name.trim();
        if let Some(kind) = by_name.get(name) {
            cols.push(ColumnSpec::new(name, *kind));
            continue;
        }

        let mut seen = 0usize;
        let mut numeric = true;
        for row in sample_rows.iter().take(SAMPLE_LIMIT) {
            let cell = clean_str(row.get(idx).map(String::as_str).unwrap_or(""));
            if is_null_token(&cell) {
                continue;
            }
            seen += 1;
            if cell.parse::<f64>().is_err() {
                numeric = false;
                break;
            }
        }

        let kind = if seen > 0 && numeric {
            SemanticType::Number
        } else {
            if seen == 0 {
                debug!("`{}`: no samples for `{}`, defaulting to text", source_id, name);
            }
            SemanticType::Text
        };
        cols.push(ColumnSpec::new(name, kind));
    }

    Ok(cols)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn infers_undeclared_columns() {
        let headers = s(&["country", "year", "pop", "note"]);
        let rows = vec![
            s(&["Taiwan", "2007", "23174294", ""]),
            s(&["Japan", "2007", "..", "x"]),
        ];
        let cols = resolve_columns("t", &headers, &[ColumnSpec::year("year")], &rows).unwrap();
        assert_eq!(
            cols,
            vec![
                ColumnSpec::text("country"),
                ColumnSpec::year("year"),
                ColumnSpec::number("pop"),
                ColumnSpec::text("note"),
            ]
        );
    }

    #[test]
    fn missing_declared_column_is_an_error() {
        let headers = s(&["country"]);
        let err = resolve_columns("t", &headers, &[ColumnSpec::year("year")], &[]).unwrap_err();
        assert!(err.to_string().contains("missing declared column `year`"));
    }

    #[test]
    fn empty_header_is_an_error() {
        assert!(resolve_columns("t", &[], &[], &[]).is_err());
    }
}

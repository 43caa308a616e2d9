use once_cell::sync::Lazy;
use regex::Regex;

/// `2014` or the World Bank export label `2014 [YR2014]`.
static YEAR_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(?:\s*\[YR\d{4}\])?$").expect("year label regex"));

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Placeholders that mean "no value" in the exports we read.
pub fn is_null_token(cleaned: &str) -> bool {
    cleaned.is_empty() || cleaned == ".." || cleaned.eq_ignore_ascii_case("na")
}

/// Parse a cell into a number, `None` for empty/placeholder/non-numeric cells.
pub fn parse_number(raw: &str) -> Option<f64> {
    let c = clean_str(raw);
    if is_null_token(&c) {
        return None;
    }
    c.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce a cell to a year. Accepts `2007`, `2007.0` and `2007 [YR2007]`.
pub fn coerce_year(raw: &str) -> Option<i64> {
    let c = clean_str(raw);
    if is_null_token(&c) {
        return None;
    }
    if let Ok(y) = c.parse::<i64>() {
        return Some(y);
    }
    if let Ok(f) = c.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Some(f as i64);
        }
        return None;
    }
    year_from_label(&c)
}

/// Year encoded in a wide-layout column header, if the header looks like one.
pub fn year_from_label(header: &str) -> Option<i64> {
    YEAR_LABEL
        .captures(header.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Declared logical type of a column. Every type is stored as nullable text;
/// the type only drives validation and sort semantics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Numeric,
    Enum,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Numeric => "numeric",
            ColumnType::Enum => "enum",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Sorting on numeric columns casts the stored text to a number.
    pub fn sorts_numerically(self) -> bool {
        matches!(self, ColumnType::Numeric)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ColumnType::Text),
            "numeric" => Ok(ColumnType::Numeric),
            "enum" => Ok(ColumnType::Enum),
            "timestamp" => Ok(ColumnType::Timestamp),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

const NAIVE_DATETIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

const OFFSET_DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// Whether `raw` matches one of the accepted timestamp layouts: RFC 3339,
/// a bare date, or a date-time with optional milliseconds and an optional
/// numeric UTC offset. Surrounding whitespace is ignored.
pub fn is_timestamp(raw: &str) -> bool {
    let s = raw.trim();
    if DateTime::parse_from_rfc3339(s).is_ok() {
        return true;
    }
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return true;
    }
    if NAIVE_DATETIME_LAYOUTS
        .iter()
        .any(|layout| NaiveDateTime::parse_from_str(s, layout).is_ok())
    {
        return true;
    }
    OFFSET_DATETIME_LAYOUTS
        .iter()
        .any(|layout| DateTime::parse_from_str(s, layout).is_ok())
}

pub fn is_numeric(raw: &str) -> bool {
    raw.parse::<f64>().is_ok()
}

/// Type check for one cell value. Null and the empty string are valid for
/// every type.
pub fn validate_cell_value(
    column_type: ColumnType,
    enum_values: &[String],
    value: Option<&str>,
) -> bool {
    let Some(value) = value else {
        return true;
    };
    if value.is_empty() {
        return true;
    }
    match column_type {
        ColumnType::Text => true,
        ColumnType::Numeric => is_numeric(value),
        ColumnType::Enum => enum_values.iter().any(|v| v == value),
        ColumnType::Timestamp => is_timestamp(value),
    }
}

use crate::catalog::types::{ColumnType, validate_cell_value};
use crate::error::TableHubError;
use crate::permission::DatabaseId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A logical column. `id` names the physical column and never changes;
/// soft-deleted columns stay in the definition (and in storage) but are
/// hidden from every data-facing projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub deleted_at_micros: Option<u64>,
}

impl Column {
    pub fn from_spec(id: String, spec: ColumnSpec) -> Self {
        Self {
            id,
            name: spec.name,
            column_type: spec.column_type,
            enum_values: spec.enum_values,
            deleted_at_micros: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at_micros.is_some()
    }

    /// Structural comparison against a proposed definition: name or type
    /// differ, or the enum values differ as an unordered set.
    pub fn needs_update(&self, proposed: &ColumnSpec) -> bool {
        if self.column_type != proposed.column_type || self.name != proposed.name {
            return true;
        }
        let current: HashSet<&str> = self.enum_values.iter().map(String::as_str).collect();
        let next: HashSet<&str> = proposed.enum_values.iter().map(String::as_str).collect();
        current != next
    }

    pub fn validate_value(&self, value: Option<&str>) -> bool {
        validate_cell_value(self.column_type, &self.enum_values, value)
    }

    pub fn apply(&mut self, spec: ColumnSpec) {
        self.name = spec.name;
        self.column_type = spec.column_type;
        self.enum_values = spec.enum_values;
    }
}

/// Caller-proposed column definition (no identifier yet).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            enum_values: Vec::new(),
        }
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            column_type: ColumnType::Enum,
            enum_values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate_value(&self, value: Option<&str>) -> bool {
        validate_cell_value(self.column_type, &self.enum_values, value)
    }

    /// Trims the name, drops enum values from non-enum columns and
    /// de-duplicates enum values keeping the first occurrence.
    pub fn normalized(self) -> Result<Self, TableHubError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(TableHubError::Validation(
                "column name must not be empty".into(),
            ));
        }
        let enum_values = if self.column_type == ColumnType::Enum {
            let mut seen = HashSet::new();
            let values: Vec<String> = self
                .enum_values
                .into_iter()
                .filter(|v| seen.insert(v.clone()))
                .collect();
            if values.is_empty() {
                return Err(TableHubError::Validation(format!(
                    "enum column '{name}' needs at least one value"
                )));
            }
            values
        } else {
            Vec::new()
        };
        Ok(Self {
            name,
            column_type: self.column_type,
            enum_values,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub database_id: DatabaseId,
    pub columns: Vec<Column>,
    pub created_at_micros: u64,
    #[serde(default)]
    pub deleted_at_micros: Option<u64>,
}

impl Table {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at_micros.is_some()
    }

    pub fn live_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_deleted())
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_mut(&mut self, column_id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == column_id)
    }

    pub fn live_column(&self, column_id: &str) -> Option<&Column> {
        self.live_columns().find(|c| c.id == column_id)
    }

    pub fn live_column_ids(&self) -> Vec<String> {
        self.live_columns().map(|c| c.id.clone()).collect()
    }

    /// `id` followed by every live column id; what row-returning
    /// statements project.
    pub fn returning_columns(&self) -> Vec<String> {
        let mut cols = Vec::with_capacity(self.columns.len() + 1);
        cols.push("id".to_string());
        cols.extend(self.live_columns().map(|c| c.id.clone()));
        cols
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTable {
    pub name: String,
    pub database_id: DatabaseId,
    pub columns: Vec<ColumnSpec>,
}

#[cfg(test)]
mod tests {
    use super::{Column, ColumnSpec, Table};
    use crate::catalog::types::ColumnType;
    use proptest::prelude::*;

    fn column(spec: ColumnSpec) -> Column {
        Column::from_spec("col_1".into(), spec)
    }

    #[test]
    fn normalization_dedups_enum_values_in_order() {
        let spec = ColumnSpec::enumeration(" Status ", ["b", "a", "b", "c", "a"])
            .normalized()
            .expect("normalize");
        assert_eq!(spec.name, "Status");
        assert_eq!(spec.enum_values, vec!["b", "a", "c"]);
    }

    #[test]
    fn normalization_rejects_empty_enum_and_blank_name() {
        let empty: [&str; 0] = [];
        assert!(ColumnSpec::enumeration("Status", empty).normalized().is_err());
        assert!(ColumnSpec::new("   ", ColumnType::Text).normalized().is_err());
    }

    #[test]
    fn non_enum_columns_drop_enum_values() {
        let mut spec = ColumnSpec::new("Title", ColumnType::Text);
        spec.enum_values = vec!["x".into()];
        assert!(spec.normalized().expect("normalize").enum_values.is_empty());
    }

    #[test]
    fn returning_columns_skip_deleted() {
        let mut hidden = column(ColumnSpec::new("Hidden", ColumnType::Text));
        hidden.id = "col_2".into();
        hidden.deleted_at_micros = Some(1);
        let table = Table {
            id: "t_1".into(),
            name: "T".into(),
            database_id: 1,
            columns: vec![column(ColumnSpec::new("Title", ColumnType::Text)), hidden],
            created_at_micros: 0,
            deleted_at_micros: None,
        };
        assert_eq!(table.returning_columns(), vec!["id", "col_1"]);
        assert!(table.live_column("col_2").is_none());
        assert!(table.column("col_2").is_some());
    }

    #[test]
    fn column_serializes_with_wire_field_names() {
        let col = column(ColumnSpec::enumeration("Status", ["open"]));
        let json = serde_json::to_value(&col).expect("serialize");
        assert_eq!(json["type"], "enum");
        assert_eq!(json["enum"][0], "open");
    }

    proptest! {
        #[test]
        fn enum_comparison_ignores_order(values in proptest::collection::vec("[a-z]{1,4}", 1..8)) {
            let col = column(ColumnSpec::enumeration("E", values.clone()));
            let mut reversed = values.clone();
            reversed.reverse();
            prop_assert!(!col.needs_update(&ColumnSpec::enumeration("E", reversed)));
            let mut extended = values;
            extended.push("zzzzz".into());
            prop_assert!(col.needs_update(&ColumnSpec::enumeration("E", extended)));
        }
    }
}

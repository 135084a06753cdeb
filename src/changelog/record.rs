use crate::catalog::directory::UserMeta;
use crate::catalog::schema::{Column, Table};
use crate::permission::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTarget {
    Cell,
    Table,
    Database,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangedEntity {
    Cell,
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellChange {
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnChange {
    pub change_type: ChangeType,
    pub before: Option<Column>,
    pub after: Option<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowSnapshotItem {
    pub column_id: String,
    pub column_name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowChange {
    pub change_type: ChangeType,
    pub before: Vec<RowSnapshotItem>,
    pub after: Vec<RowSnapshotItem>,
}

/// One payload per changed entity; the tag is the discriminant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "changed_entity", rename_all = "snake_case")]
pub enum ChangePayload {
    Cell(CellChange),
    Column(ColumnChange),
    Row(RowChange),
}

impl ChangePayload {
    pub fn changed_entity(&self) -> ChangedEntity {
        match self {
            ChangePayload::Cell(_) => ChangedEntity::Cell,
            ChangePayload::Column(_) => ChangedEntity::Column,
            ChangePayload::Row(_) => ChangedEntity::Row,
        }
    }
}

/// Live-column snapshot of one row, in definition order.
pub fn row_snapshot(
    table: &Table,
    values: &BTreeMap<String, Option<String>>,
) -> Vec<RowSnapshotItem> {
    table
        .live_columns()
        .map(|column| RowSnapshotItem {
            column_id: column.id.clone(),
            column_name: column.name.clone(),
            value: values.get(&column.id).cloned().flatten(),
        })
        .collect()
}

/// An append-only audit entry. `change_id` is assigned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    pub change_id: u64,
    pub target: ChangeTarget,
    pub actor_id: UserId,
    pub table_id: Option<String>,
    pub column_id: Option<String>,
    pub row_id: Option<i64>,
    pub payload: ChangePayload,
    pub changed_at_nanos: u64,
}

impl ChangeRecord {
    pub fn cell(
        actor_id: UserId,
        table_id: &str,
        column_id: &str,
        row_id: i64,
        change: CellChange,
        changed_at_nanos: u64,
    ) -> Self {
        Self {
            change_id: 0,
            target: ChangeTarget::Cell,
            actor_id,
            table_id: Some(table_id.to_string()),
            column_id: Some(column_id.to_string()),
            row_id: Some(row_id),
            payload: ChangePayload::Cell(change),
            changed_at_nanos,
        }
    }

    pub fn column(
        actor_id: UserId,
        table_id: &str,
        column_id: &str,
        change: ColumnChange,
        changed_at_nanos: u64,
    ) -> Self {
        Self {
            change_id: 0,
            target: ChangeTarget::Table,
            actor_id,
            table_id: Some(table_id.to_string()),
            column_id: Some(column_id.to_string()),
            row_id: None,
            payload: ChangePayload::Column(change),
            changed_at_nanos,
        }
    }

    pub fn row(
        actor_id: UserId,
        table_id: &str,
        row_id: i64,
        change: RowChange,
        changed_at_nanos: u64,
    ) -> Self {
        Self {
            change_id: 0,
            target: ChangeTarget::Table,
            actor_id,
            table_id: Some(table_id.to_string()),
            column_id: None,
            row_id: Some(row_id),
            payload: ChangePayload::Row(change),
            changed_at_nanos,
        }
    }

    pub fn changed_entity(&self) -> ChangedEntity {
        self.payload.changed_entity()
    }
}

/// A record joined with the identity of whoever made the change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEntry {
    #[serde(flatten)]
    pub record: ChangeRecord,
    pub actor: UserMeta,
}

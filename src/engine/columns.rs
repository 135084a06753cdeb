use crate::catalog::schema::{Column, ColumnSpec, Table};
use crate::changelog::record::{ChangeRecord, ChangeType, ColumnChange};
use crate::clock::{monotonic_nanos, now_micros};
use crate::engine::{TableEngine, new_column_id};
use crate::error::TableHubError;
use crate::hub::event::HubEvent;
use crate::permission::{CallerContext, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Result of an edit: `edited` is false when the proposed definition
/// matched the current one and nothing was written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnEdit {
    pub table: Table,
    pub edited: bool,
}

impl TableEngine {
    pub async fn add_column(
        &self,
        caller: &CallerContext,
        table_id: &str,
        spec: ColumnSpec,
    ) -> Result<Table, TableHubError> {
        let spec = spec.normalized()?;
        let (guard, mut table) = self.lock_table(caller, table_id, Role::Admin).await?;
        let column = Column::from_spec(new_column_id(), spec);
        table.columns.push(column.clone());

        self.schema.provision_column(&table, &column).await?;
        self.persist_table(table.clone())?;
        self.ledger.append(vec![ChangeRecord::column(
            caller.user_id,
            &table.id,
            &column.id,
            ColumnChange {
                change_type: ChangeType::Add,
                before: None,
                after: Some(column.clone()),
            },
            monotonic_nanos(),
        )]);
        guard.release();

        debug!(table_id, column_id = %column.id, "column added");
        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(table)
    }

    /// Logical metadata change only; the physical column stays text. Values
    /// already stored must satisfy the proposed definition.
    pub async fn edit_column(
        &self,
        caller: &CallerContext,
        table_id: &str,
        column_id: &str,
        spec: ColumnSpec,
    ) -> Result<ColumnEdit, TableHubError> {
        let spec = spec.normalized()?;
        let (guard, mut table) = self.lock_table(caller, table_id, Role::Admin).await?;
        let before = table
            .live_column(column_id)
            .cloned()
            .ok_or_else(|| TableHubError::column_not_found(column_id))?;
        if !before.needs_update(&spec) {
            return Ok(ColumnEdit {
                table,
                edited: false,
            });
        }

        let stored = self
            .schema
            .execute(self.schema.select_column(&table, column_id))
            .await?
            .into_rows("select_column")?;
        let mut offending = BTreeSet::new();
        for row in &stored {
            let value = row.values.get(column_id).and_then(|v| v.as_deref());
            if !spec.validate_value(value) {
                if let Some(value) = value {
                    offending.insert(value.to_string());
                }
            }
        }
        if !offending.is_empty() {
            return Err(TableHubError::InvalidColumnValue {
                column_id: column_id.to_string(),
                column_type: spec.column_type,
                values: offending.into_iter().collect(),
            });
        }

        let mut after = before.clone();
        after.apply(spec);
        if let Some(column) = table.column_mut(column_id) {
            *column = after.clone();
        }
        self.persist_table(table.clone())?;
        self.ledger.append(vec![ChangeRecord::column(
            caller.user_id,
            &table.id,
            column_id,
            ColumnChange {
                change_type: ChangeType::Update,
                before: Some(before),
                after: Some(after),
            },
            monotonic_nanos(),
        )]);
        guard.release();

        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(ColumnEdit {
            table,
            edited: true,
        })
    }

    /// Soft-deletes a column. Its stored values are kept.
    pub async fn delete_column(
        &self,
        caller: &CallerContext,
        table_id: &str,
        column_id: &str,
    ) -> Result<Table, TableHubError> {
        let (guard, mut table) = self.lock_table(caller, table_id, Role::Admin).await?;
        let before = table
            .column(column_id)
            .cloned()
            .ok_or_else(|| TableHubError::column_not_found(column_id))?;
        if before.is_deleted() {
            return Ok(table);
        }
        if let Some(column) = table.column_mut(column_id) {
            column.deleted_at_micros = Some(now_micros());
        }
        self.persist_table(table.clone())?;
        self.ledger.append(vec![ChangeRecord::column(
            caller.user_id,
            &table.id,
            column_id,
            ColumnChange {
                change_type: ChangeType::Delete,
                before: Some(before),
                after: None,
            },
            monotonic_nanos(),
        )]);
        guard.release();

        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(table)
    }

    pub async fn restore_column(
        &self,
        caller: &CallerContext,
        table_id: &str,
        column_id: &str,
    ) -> Result<Table, TableHubError> {
        let (guard, mut table) = self.lock_table(caller, table_id, Role::Admin).await?;
        let deleted = table
            .column(column_id)
            .map(Column::is_deleted)
            .ok_or_else(|| TableHubError::column_not_found(column_id))?;
        if !deleted {
            return Ok(table);
        }
        if let Some(column) = table.column_mut(column_id) {
            column.deleted_at_micros = None;
        }
        self.persist_table(table.clone())?;
        guard.release();

        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(table)
    }
}

use crate::catalog::schema::Table;
use crate::changelog::record::{
    CellChange, ChangeEntry, ChangeRecord, ChangeType, RowChange, row_snapshot,
};
use crate::clock::{monotonic_nanos, now_micros};
use crate::engine::{RowValues, TableEngine};
use crate::error::{InvalidCell, TableHubError};
use crate::hub::event::{HubEvent, SetCellBusyMessage, SetCellFreeMessage, SetCellValueMessage};
use crate::permission::{CallerContext, Role};
use crate::physical::RowQuery;
use crate::storage::{ColumnOrder, StorageError, StoredRow, TextFilter};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One live row as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRow {
    pub id: i64,
    pub sort_index: i64,
    pub values: RowValues,
}

impl From<StoredRow> for TableRow {
    fn from(row: StoredRow) -> Self {
        Self {
            id: row.id,
            sort_index: row.sort_index,
            values: row.values,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadTableParams {
    pub page: usize,
    pub per_page: usize,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: SortDirection,
    pub filter_by: Option<String>,
    pub filter_value: Option<String>,
}

impl Default for ReadTableParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            sort_by: None,
            sort_direction: SortDirection::Asc,
            filter_by: None,
            filter_value: None,
        }
    }
}

impl ReadTableParams {
    pub fn page(page: usize, per_page: usize) -> Self {
        Self {
            page,
            per_page,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, column_id: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(column_id.into());
        self.sort_direction = direction;
        self
    }

    pub fn filtered_by(mut self, column_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_by = Some(column_id.into());
        self.filter_value = Some(value.into());
        self
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// One page of a table listing plus the number of rows matching the filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TablePage {
    pub rows: Vec<TableRow>,
    pub total: u64,
}

/// Flat export shape: live column names and each row's values in the same
/// column order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableExport {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TableEngine {
    /// Inserts a row. `sort_index` defaults to the storage counter. Every
    /// non-null value gets a cell `add` record and the row gets a row `add`
    /// record, all appended together.
    pub async fn add_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        values: RowValues,
        sort_index: Option<i64>,
    ) -> Result<TableRow, TableHubError> {
        let (guard, table) = self.share_table(caller, table_id, Role::Writer).await?;
        validate_row_values(&table, &values)?;

        let changed_at = monotonic_nanos();
        let statement = self.schema.insert_row(
            &table,
            values.into_iter().collect(),
            sort_index,
            changed_at as i64,
        );
        let row = self
            .schema
            .execute(statement)
            .await?
            .into_rows("insert_row")?
            .pop()
            .ok_or(StorageError::UnexpectedOutcome {
                statement: "insert_row",
                outcome: "empty",
            })?;

        let mut records: Vec<ChangeRecord> = row
            .values
            .iter()
            .filter_map(|(column_id, value)| {
                let value = value.clone()?;
                Some(ChangeRecord::cell(
                    caller.user_id,
                    &table.id,
                    column_id,
                    row.id,
                    CellChange {
                        before: None,
                        after: Some(value),
                    },
                    changed_at,
                ))
            })
            .collect();
        records.push(ChangeRecord::row(
            caller.user_id,
            &table.id,
            row.id,
            RowChange {
                change_type: ChangeType::Add,
                before: Vec::new(),
                after: row_snapshot(&table, &row.values),
            },
            changed_at,
        ));
        self.ledger.append(records);
        guard.release();

        debug!(table_id, row_id = row.id, "row added");
        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(row.into())
    }

    /// Soft-deletes a row. Returns false, records nothing and broadcasts
    /// nothing when the row is absent or already deleted.
    pub async fn delete_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
    ) -> Result<bool, TableHubError> {
        let (guard, table) = self.share_table(caller, table_id, Role::Writer).await?;
        let statement = self.schema.soft_delete_row(&table, row_id, now_micros());
        let Some(before) = self
            .schema
            .execute(statement)
            .await?
            .into_rows("soft_delete_row")?
            .pop()
        else {
            debug!(table_id, row_id, "delete of missing row ignored");
            return Ok(false);
        };

        self.ledger.append(vec![ChangeRecord::row(
            caller.user_id,
            &table.id,
            row_id,
            RowChange {
                change_type: ChangeType::Delete,
                before: row_snapshot(&table, &before.values),
                after: Vec::new(),
            },
            monotonic_nanos(),
        )]);
        guard.release();

        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(true)
    }

    pub async fn restore_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
    ) -> Result<bool, TableHubError> {
        let (guard, table) = self.share_table(caller, table_id, Role::Writer).await?;
        let affected = self
            .schema
            .execute(self.schema.restore_row(&table, row_id))
            .await?
            .into_affected("restore_row")?;
        guard.release();

        if affected == 0 {
            return Ok(false);
        }
        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(true)
    }

    /// Moves a live row to `sort_index`, stamping a fresh version so it
    /// lists ahead of older rows at the same position.
    pub async fn move_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
        sort_index: i64,
    ) -> Result<bool, TableHubError> {
        let (guard, table) = self.share_table(caller, table_id, Role::Writer).await?;
        let statement = self
            .schema
            .move_row(&table, row_id, sort_index, monotonic_nanos() as i64);
        let affected = self.schema.execute(statement).await?.into_affected("move_row")?;
        guard.release();

        if affected == 0 {
            return Ok(false);
        }
        self.notify_table(table_id, HubEvent::FetchTable);
        Ok(true)
    }

    /// Writes one cell with a single atomic read-and-write statement. A
    /// missing or soft-deleted row is a silent no-op and returns false.
    pub async fn set_cell_value(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
        column_id: &str,
        value: Option<String>,
    ) -> Result<bool, TableHubError> {
        let (guard, table) = self.share_table(caller, table_id, Role::Writer).await?;
        let column = table
            .live_column(column_id)
            .ok_or_else(|| TableHubError::column_not_found(column_id))?;
        if !column.validate_value(value.as_deref()) {
            return Err(TableHubError::InvalidColumnValue {
                column_id: column_id.to_string(),
                column_type: column.column_type,
                values: value.into_iter().collect(),
            });
        }

        let statement = self.schema.set_cell(&table, row_id, column_id, value.clone());
        let Some(prior) = self
            .schema
            .execute(statement)
            .await?
            .into_cell_write("set_cell")?
        else {
            debug!(table_id, row_id, column_id, "cell write on missing row ignored");
            return Ok(false);
        };

        self.ledger.append(vec![ChangeRecord::cell(
            caller.user_id,
            &table.id,
            column_id,
            row_id,
            CellChange {
                before: prior.before,
                after: value.clone(),
            },
            prior.changed_at_nanos,
        )]);
        guard.release();

        self.notify_table(
            table_id,
            HubEvent::SetCellValue(SetCellValueMessage {
                row_id,
                column_id: column_id.to_string(),
                value,
            }),
        );
        Ok(true)
    }

    /// Tells the table's subscribers that the caller started editing a cell.
    pub fn mark_cell_busy(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
        column_id: &str,
    ) -> Result<(), TableHubError> {
        self.authorized_table(caller, table_id, Role::Reader)?;
        let user = self.catalog.read().user(caller.user_id)?.clone();
        self.notify_table(
            table_id,
            HubEvent::SetCellBusy(SetCellBusyMessage {
                row_id,
                column_id: column_id.to_string(),
                user,
            }),
        );
        Ok(())
    }

    pub fn mark_cell_free(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: i64,
        column_id: &str,
    ) -> Result<(), TableHubError> {
        self.authorized_table(caller, table_id, Role::Reader)?;
        self.notify_table(
            table_id,
            HubEvent::SetCellFree(SetCellFreeMessage {
                row_id,
                column_id: column_id.to_string(),
                user_id: caller.user_id,
            }),
        );
        Ok(())
    }

    pub async fn read_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        params: ReadTableParams,
    ) -> Result<TablePage, TableHubError> {
        let table = self.authorized_table(caller, table_id, Role::Reader)?;
        if params.page < 1 {
            return Err(TableHubError::Validation("page must be at least 1".into()));
        }
        if params.per_page < 1 || params.per_page > self.config.max_page_size {
            return Err(TableHubError::Validation(format!(
                "per_page must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        let filter = text_filter(&table, &params)?;
        let order = column_order(&table, &params)?;

        let query = RowQuery {
            filter: filter.clone(),
            order,
            limit: Some(params.per_page),
            offset: params.offset(),
        };
        let rows = self
            .schema
            .execute(self.schema.select_rows(&table, query))
            .await?
            .into_rows("select_rows")?;
        let total = self
            .schema
            .execute(self.schema.count_rows(&table, filter))
            .await?
            .into_count("count_rows")?;
        Ok(TablePage {
            rows: rows.into_iter().map(TableRow::from).collect(),
            total,
        })
    }

    pub async fn total_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<u64, TableHubError> {
        let table = self.authorized_table(caller, table_id, Role::Reader)?;
        Ok(self
            .schema
            .execute(self.schema.count_rows(&table, None))
            .await?
            .into_count("count_rows")?)
    }

    /// Every live row in listing order, projected onto the live columns.
    pub async fn export_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<TableExport, TableHubError> {
        let table = self.authorized_table(caller, table_id, Role::Reader)?;
        let rows = self
            .schema
            .execute(self.schema.select_rows(&table, RowQuery::default()))
            .await?
            .into_rows("select_rows")?;
        let columns: Vec<&str> = table.live_columns().map(|c| c.id.as_str()).collect();
        Ok(TableExport {
            headers: table.live_columns().map(|c| c.name.clone()).collect(),
            rows: rows
                .into_iter()
                .map(|mut row| {
                    columns
                        .iter()
                        .map(|id| row.values.remove(*id).flatten())
                        .collect()
                })
                .collect(),
        })
    }

    pub fn list_changes_for_cell(
        &self,
        caller: &CallerContext,
        table_id: &str,
        column_id: &str,
        row_id: i64,
    ) -> Result<Vec<ChangeEntry>, TableHubError> {
        self.authorized_table(caller, table_id, Role::Reader)?;
        let catalog = self.catalog.read();
        Ok(self.ledger.list_for_cell(&catalog, table_id, column_id, row_id))
    }

    pub fn list_changes_for_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<ChangeEntry>, TableHubError> {
        self.authorized_table(caller, table_id, Role::Reader)?;
        let catalog = self.catalog.read();
        Ok(self.ledger.list_for_table(&catalog, table_id))
    }
}

/// Unknown columns fail fast; type failures are collected across the whole row.
fn validate_row_values(table: &Table, values: &RowValues) -> Result<(), TableHubError> {
    let mut invalid = Vec::new();
    for (column_id, value) in values {
        let column = table
            .live_column(column_id)
            .ok_or_else(|| TableHubError::column_not_found(column_id))?;
        if !column.validate_value(value.as_deref()) {
            invalid.push(InvalidCell {
                column_id: column_id.clone(),
                column_type: column.column_type,
                value: value.clone().unwrap_or_default(),
            });
        }
    }
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(TableHubError::InvalidRowValues { invalid })
    }
}

fn text_filter(
    table: &Table,
    params: &ReadTableParams,
) -> Result<Option<TextFilter>, TableHubError> {
    let (Some(column_id), Some(needle)) = (&params.filter_by, &params.filter_value) else {
        return Ok(None);
    };
    if table.live_column(column_id).is_none() {
        return Err(TableHubError::Validation(format!(
            "cannot filter by unknown column {column_id}"
        )));
    }
    if needle.is_empty() {
        return Ok(None);
    }
    Ok(Some(TextFilter {
        column: column_id.clone(),
        needle: needle.clone(),
    }))
}

fn column_order(
    table: &Table,
    params: &ReadTableParams,
) -> Result<Option<ColumnOrder>, TableHubError> {
    let Some(column_id) = &params.sort_by else {
        return Ok(None);
    };
    let column = table.live_column(column_id).ok_or_else(|| {
        TableHubError::Validation(format!("cannot sort by unknown column {column_id}"))
    })?;
    Ok(Some(ColumnOrder {
        column: column_id.clone(),
        numeric: column.column_type.sorts_numerically(),
        descending: params.sort_direction == SortDirection::Desc,
    }))
}

use crate::catalog::schema::{Column, ColumnSpec, NewTable, Table};
use crate::catalog::types::ColumnType;
use crate::clock::{monotonic_nanos, now_micros};
use crate::engine::{TableEngine, new_column_id, new_table_id};
use crate::error::TableHubError;
use crate::hub::event::HubEvent;
use crate::permission::{CallerContext, DatabaseId, Role};
use crate::physical::relation_name;
use tracing::{info, warn};

/// Rows per import batch so that one batch binds at most `max_params`
/// parameters (`columns` values plus the sort version per row).
pub fn import_batch_size(columns: usize, max_params: usize) -> Result<usize, TableHubError> {
    let size = max_params / (columns + 1);
    if size < 1 {
        return Err(TableHubError::TooManyColumns {
            columns,
            max_params,
        });
    }
    Ok(size)
}

impl TableEngine {
    /// Provisions storage for a new table, then records its definition.
    pub async fn create_table(
        &self,
        caller: &CallerContext,
        new_table: NewTable,
    ) -> Result<Table, TableHubError> {
        self.authorize(caller, new_table.database_id, Role::Admin)?;
        let name = normalized_table_name(&new_table.name)?;
        let columns = new_table
            .columns
            .into_iter()
            .map(|spec| -> Result<Column, TableHubError> {
                Ok(Column::from_spec(new_column_id(), spec.normalized()?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let table = Table {
            id: new_table_id(),
            name,
            database_id: new_table.database_id,
            columns,
            created_at_micros: now_micros(),
            deleted_at_micros: None,
        };

        self.schema.provision_table(&table).await?;
        self.catalog.write().insert_table(table.clone())?;
        info!(
            table_id = %table.id,
            database_id = table.database_id,
            columns = table.columns.len(),
            "table created"
        );
        self.notify_members(table.database_id, HubEvent::FetchDatabases);
        Ok(table)
    }

    /// Creates an all-text table from header names and bulk-inserts `rows`
    /// in parameter-bounded batches. The definition is recorded only after
    /// every batch has committed; batches committed before a failure stay
    /// in storage.
    pub async fn import_table(
        &self,
        caller: &CallerContext,
        name: &str,
        database_id: DatabaseId,
        headers: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Result<Table, TableHubError> {
        let batch_size = import_batch_size(headers.len(), self.config.import_max_params)?;
        self.authorize(caller, database_id, Role::Admin)?;
        if let Some(index) = rows.iter().position(|row| row.len() != headers.len()) {
            return Err(TableHubError::Validation(format!(
                "row {index} has {} values, expected {}",
                rows[index].len(),
                headers.len()
            )));
        }
        let name = normalized_table_name(name)?;
        let columns = headers
            .into_iter()
            .map(|header| -> Result<Column, TableHubError> {
                let spec = ColumnSpec::new(header, ColumnType::Text).normalized()?;
                Ok(Column::from_spec(new_column_id(), spec))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let table = Table {
            id: new_table_id(),
            name,
            database_id,
            columns,
            created_at_micros: now_micros(),
            deleted_at_micros: None,
        };

        self.schema.provision_table(&table).await?;

        let total_rows = rows.len();
        let mut committed_rows = 0usize;
        let mut batches = 0usize;
        let mut pending = rows.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<Vec<Option<String>>> = pending.by_ref().take(batch_size).collect();
            let batch_len = batch.len();
            let statement = self
                .schema
                .insert_batch(&table, batch, monotonic_nanos() as i64);
            if let Err(err) = self.schema.execute(statement).await {
                warn!(
                    table_id = %table.id,
                    relation = %relation_name(&table.id),
                    committed_rows,
                    batches,
                    error = %err,
                    "import failed; committed batches remain in storage"
                );
                return Err(err);
            }
            committed_rows += batch_len;
            batches += 1;
        }

        self.catalog.write().insert_table(table.clone())?;
        info!(
            table_id = %table.id,
            database_id,
            columns = table.columns.len(),
            rows = total_rows,
            batches,
            batch_size,
            "table imported"
        );
        self.notify_members(database_id, HubEvent::FetchDatabases);
        Ok(table)
    }

    pub async fn delete_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Table, TableHubError> {
        let (guard, table) = self.lock_table(caller, table_id, Role::Admin).await?;
        let deleted = self
            .catalog
            .write()
            .set_table_deleted(&table.id, Some(now_micros()))?;
        guard.release();
        self.notify_members(deleted.database_id, HubEvent::FetchDatabases);
        Ok(deleted)
    }

    pub async fn restore_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Table, TableHubError> {
        let database_id = self.catalog.read().table(table_id, true)?.database_id;
        self.authorize(caller, database_id, Role::Admin)?;
        let guard = self.locks.lock(table_id).await?;
        let table = self.catalog.read().table(table_id, true)?.clone();
        if !table.is_deleted() {
            return Ok(table);
        }
        let restored = self.catalog.write().set_table_deleted(table_id, None)?;
        guard.release();
        self.notify_members(restored.database_id, HubEvent::FetchDatabases);
        Ok(restored)
    }

    pub fn get_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Table, TableHubError> {
        self.authorized_table(caller, table_id, Role::Reader)
    }

    pub fn list_tables(
        &self,
        caller: &CallerContext,
        database_id: DatabaseId,
    ) -> Result<Vec<Table>, TableHubError> {
        self.authorize(caller, database_id, Role::Reader)?;
        Ok(self.catalog.read().tables_in_database(database_id, false))
    }
}

fn normalized_table_name(name: &str) -> Result<String, TableHubError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TableHubError::Validation("table name must not be empty".into()));
    }
    Ok(name.to_string())
}

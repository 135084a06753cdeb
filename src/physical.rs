use crate::catalog::schema::{Column, Table};
use crate::error::TableHubError;
use crate::storage::statement::{ColumnOrder, Statement, TextFilter};
use crate::storage::{StatementOutcome, StorageBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const USERS_TABLESPACE: &str = "users_tablespace";

pub fn relation_name(table_id: &str) -> String {
    format!("{USERS_TABLESPACE}.{table_id}")
}

pub fn order_index_name(table_id: &str) -> String {
    format!("{table_id}_order_idx")
}

pub fn search_index_name(table_id: &str, column_id: &str) -> String {
    format!("{table_id}_{column_id}_trgm_idx")
}

/// Every statement needed to provision a table, in execution order.
pub fn provision_table_statements(table: &Table) -> Vec<Statement> {
    let relation = relation_name(&table.id);
    let mut statements = Vec::with_capacity(table.columns.len() + 2);
    statements.push(Statement::CreateRelation {
        relation: relation.clone(),
        columns: table.columns.iter().map(|c| c.id.clone()).collect(),
    });
    statements.push(Statement::CreateOrderIndex {
        relation: relation.clone(),
        index_name: order_index_name(&table.id),
    });
    for column in &table.columns {
        statements.push(search_index(table, &column.id));
    }
    statements
}

pub fn provision_column_statements(table: &Table, column: &Column) -> Vec<Statement> {
    vec![
        Statement::AddColumn {
            relation: relation_name(&table.id),
            column: column.id.clone(),
        },
        search_index(table, &column.id),
    ]
}

fn search_index(table: &Table, column_id: &str) -> Statement {
    Statement::CreateSearchIndex {
        relation: relation_name(&table.id),
        column: column_id.to_string(),
        index_name: search_index_name(&table.id, column_id),
    }
}

/// Read parameters already checked against the table definition.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub filter: Option<TextFilter>,
    pub order: Option<ColumnOrder>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Physical Schema Manager: the only place that builds storage statements.
/// Callers hand it logical definitions and get back outcomes.
pub struct PhysicalSchemaManager {
    storage: Arc<dyn StorageBackend>,
    statement_timeout: Option<Duration>,
}

impl PhysicalSchemaManager {
    pub fn new(storage: Arc<dyn StorageBackend>, statement_timeout: Option<Duration>) -> Self {
        Self {
            storage,
            statement_timeout,
        }
    }

    pub async fn execute(&self, statement: Statement) -> Result<StatementOutcome, TableHubError> {
        let kind = statement.kind();
        debug!(
            kind,
            relation = statement.relation(),
            schema_change = statement.is_schema_change(),
            "executing statement"
        );
        let outcome = match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, self.storage.execute(statement))
                .await
                .map_err(|_| TableHubError::Timeout)?,
            None => self.storage.execute(statement).await,
        };
        Ok(outcome?)
    }

    /// Creates the relation, its order index and one search index per
    /// column. Index statements are create-if-not-exists; a failure after
    /// the relation exists leaves it in place.
    pub async fn provision_table(&self, table: &Table) -> Result<(), TableHubError> {
        for (step, statement) in provision_table_statements(table).into_iter().enumerate() {
            if let Err(err) = self.execute(statement).await {
                if step > 0 {
                    warn!(table_id = %table.id, step, error = %err, "table partially provisioned");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn provision_column(
        &self,
        table: &Table,
        column: &Column,
    ) -> Result<(), TableHubError> {
        for (step, statement) in provision_column_statements(table, column)
            .into_iter()
            .enumerate()
        {
            if let Err(err) = self.execute(statement).await {
                if step > 0 {
                    warn!(
                        table_id = %table.id,
                        column_id = %column.id,
                        error = %err,
                        "column added without its search index"
                    );
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn insert_row(
        &self,
        table: &Table,
        values: Vec<(String, Option<String>)>,
        sort_index: Option<i64>,
        sort_index_version: i64,
    ) -> Statement {
        Statement::InsertRow {
            relation: relation_name(&table.id),
            sort_index_version,
            sort_index,
            values,
            returning: table.returning_columns(),
        }
    }

    /// Multi-row insert over the live columns, in definition order.
    pub fn insert_batch(
        &self,
        table: &Table,
        rows: Vec<Vec<Option<String>>>,
        sort_index_version: i64,
    ) -> Statement {
        Statement::InsertBatch {
            relation: relation_name(&table.id),
            sort_index_version,
            columns: table.live_column_ids(),
            rows,
        }
    }

    pub fn soft_delete_row(&self, table: &Table, row_id: i64, deleted_at_micros: u64) -> Statement {
        Statement::SoftDeleteRow {
            relation: relation_name(&table.id),
            row_id,
            deleted_at_micros,
            returning: table.returning_columns(),
        }
    }

    pub fn restore_row(&self, table: &Table, row_id: i64) -> Statement {
        Statement::RestoreRow {
            relation: relation_name(&table.id),
            row_id,
        }
    }

    pub fn move_row(
        &self,
        table: &Table,
        row_id: i64,
        sort_index: i64,
        sort_index_version: i64,
    ) -> Statement {
        Statement::MoveRow {
            relation: relation_name(&table.id),
            row_id,
            sort_index,
            sort_index_version,
        }
    }

    pub fn set_cell(
        &self,
        table: &Table,
        row_id: i64,
        column_id: &str,
        value: Option<String>,
    ) -> Statement {
        Statement::SetCell {
            relation: relation_name(&table.id),
            row_id,
            column: column_id.to_string(),
            value,
        }
    }

    pub fn select_rows(&self, table: &Table, query: RowQuery) -> Statement {
        Statement::SelectRows {
            relation: relation_name(&table.id),
            columns: table.returning_columns(),
            filter: query.filter,
            order: query.order,
            limit: query.limit,
            offset: query.offset,
        }
    }

    /// Every live row's value in one column.
    pub fn select_column(&self, table: &Table, column_id: &str) -> Statement {
        Statement::SelectRows {
            relation: relation_name(&table.id),
            columns: vec!["id".to_string(), column_id.to_string()],
            filter: None,
            order: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn count_rows(&self, table: &Table, filter: Option<TextFilter>) -> Statement {
        Statement::CountRows {
            relation: relation_name(&table.id),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PhysicalSchemaManager, provision_table_statements, relation_name};
    use crate::catalog::schema::{Column, ColumnSpec, Table};
    use crate::catalog::types::ColumnType;
    use crate::error::TableHubError;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::{StatementOutcome, StorageBackend, StorageError, Statement};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    fn table() -> Table {
        Table {
            id: "t_abc".into(),
            name: "Projects".into(),
            database_id: 1,
            columns: vec![
                Column::from_spec("col_1".into(), ColumnSpec::new("Title", ColumnType::Text)),
                Column::from_spec("col_2".into(), ColumnSpec::new("Budget", ColumnType::Numeric)),
            ],
            created_at_micros: 0,
            deleted_at_micros: None,
        }
    }

    #[test]
    fn provisioning_renders_expected_ddl() {
        let sql: Vec<String> = provision_table_statements(&table())
            .iter()
            .map(|s| s.to_sql().sql)
            .collect();
        assert_eq!(sql.len(), 4);
        assert!(sql[0].starts_with("CREATE TABLE users_tablespace.t_abc ("));
        assert_eq!(
            sql[1],
            "create index if not exists t_abc_order_idx on users_tablespace.t_abc (sort_index asc, sort_index_version desc)"
        );
        assert_eq!(
            sql[3],
            "create index if not exists t_abc_col_2_trgm_idx on users_tablespace.t_abc USING gin (col_2 gin_trgm_ops)"
        );
    }

    #[tokio::test]
    async fn provision_column_is_safe_to_repeat_for_indexes() {
        let storage = Arc::new(MemoryStorage::default());
        let manager = PhysicalSchemaManager::new(storage.clone(), None);
        let mut table = table();
        manager.provision_table(&table).await.expect("provision");
        let added = Column::from_spec(
            "col_3".into(),
            ColumnSpec::new("Due", ColumnType::Timestamp),
        );
        table.columns.push(added.clone());
        manager.provision_column(&table, &added).await.expect("column");
        assert!(storage.has_index("t_abc_col_3_trgm_idx"));
        assert_eq!(
            storage.relation_columns(&relation_name("t_abc")),
            Some(vec!["col_1".into(), "col_2".into(), "col_3".into()])
        );
        let again = manager.provision_table(&table).await.expect_err("relation exists");
        assert!(matches!(
            again,
            TableHubError::Storage(StorageError::DuplicateRelation(_))
        ));
    }

    struct Stalled;

    #[async_trait]
    impl StorageBackend for Stalled {
        async fn execute(&self, _statement: Statement) -> Result<StatementOutcome, StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StatementOutcome::Done)
        }
    }

    #[tokio::test]
    async fn statement_deadline_surfaces_timeout() {
        let manager =
            PhysicalSchemaManager::new(Arc::new(Stalled), Some(Duration::from_millis(20)));
        let err = manager.provision_table(&table()).await.expect_err("deadline");
        assert!(matches!(err, TableHubError::Timeout));
    }
}

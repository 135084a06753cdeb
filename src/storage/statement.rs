use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Case-insensitive substring match on one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextFilter {
    pub column: String,
    pub needle: String,
}

impl TextFilter {
    /// `%needle%` with LIKE metacharacters escaped.
    pub fn like_pattern(&self) -> String {
        let escaped = self
            .needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    }
}

/// Caller-requested ordering applied before the default row order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnOrder {
    pub column: String,
    pub numeric: bool,
    pub descending: bool,
}

/// An executable storage statement. Built by the physical schema manager;
/// backends either interpret it directly or render it with [`Statement::to_sql`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    CreateRelation {
        relation: String,
        columns: Vec<String>,
    },
    AddColumn {
        relation: String,
        column: String,
    },
    CreateOrderIndex {
        relation: String,
        index_name: String,
    },
    CreateSearchIndex {
        relation: String,
        column: String,
        index_name: String,
    },
    InsertRow {
        relation: String,
        sort_index_version: i64,
        sort_index: Option<i64>,
        values: Vec<(String, Option<String>)>,
        returning: Vec<String>,
    },
    /// Multi-row insert; every row carries one value per entry of `columns`.
    InsertBatch {
        relation: String,
        sort_index_version: i64,
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// Stamps `deleted_at` on a live row and returns its prior values.
    SoftDeleteRow {
        relation: String,
        row_id: i64,
        deleted_at_micros: u64,
        returning: Vec<String>,
    },
    RestoreRow {
        relation: String,
        row_id: i64,
    },
    MoveRow {
        relation: String,
        row_id: i64,
        sort_index: i64,
        sort_index_version: i64,
    },
    /// Writes one cell of a live row and reports the value it replaced, in
    /// one atomic step.
    SetCell {
        relation: String,
        row_id: i64,
        column: String,
        value: Option<String>,
    },
    SelectRows {
        relation: String,
        columns: Vec<String>,
        filter: Option<TextFilter>,
        order: Option<ColumnOrder>,
        limit: Option<usize>,
        offset: usize,
    },
    CountRows {
        relation: String,
        filter: Option<TextFilter>,
    },
}

/// Bind parameter of rendered SQL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SqlParam {
    Int(i64),
    Text(Option<String>),
    TextArray(Vec<String>),
    TimestampMicros(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlText {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

struct Placeholders {
    params: Vec<SqlParam>,
}

impl Placeholders {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }
}

const ORDER_BY_DEFAULT: &str = "sort_index ASC, sort_index_version DESC";

impl Statement {
    pub fn relation(&self) -> &str {
        match self {
            Statement::CreateRelation { relation, .. }
            | Statement::AddColumn { relation, .. }
            | Statement::CreateOrderIndex { relation, .. }
            | Statement::CreateSearchIndex { relation, .. }
            | Statement::InsertRow { relation, .. }
            | Statement::InsertBatch { relation, .. }
            | Statement::SoftDeleteRow { relation, .. }
            | Statement::RestoreRow { relation, .. }
            | Statement::MoveRow { relation, .. }
            | Statement::SetCell { relation, .. }
            | Statement::SelectRows { relation, .. }
            | Statement::CountRows { relation, .. } => relation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateRelation { .. } => "create_relation",
            Statement::AddColumn { .. } => "add_column",
            Statement::CreateOrderIndex { .. } => "create_order_index",
            Statement::CreateSearchIndex { .. } => "create_search_index",
            Statement::InsertRow { .. } => "insert_row",
            Statement::InsertBatch { .. } => "insert_batch",
            Statement::SoftDeleteRow { .. } => "soft_delete_row",
            Statement::RestoreRow { .. } => "restore_row",
            Statement::MoveRow { .. } => "move_row",
            Statement::SetCell { .. } => "set_cell",
            Statement::SelectRows { .. } => "select_rows",
            Statement::CountRows { .. } => "count_rows",
        }
    }

    pub fn is_schema_change(&self) -> bool {
        matches!(
            self,
            Statement::CreateRelation { .. }
                | Statement::AddColumn { .. }
                | Statement::CreateOrderIndex { .. }
                | Statement::CreateSearchIndex { .. }
        )
    }

    /// Bind parameters the statement needs; checked against the backend's
    /// per-statement limit.
    pub fn param_count(&self) -> usize {
        match self {
            Statement::CreateRelation { .. }
            | Statement::AddColumn { .. }
            | Statement::CreateOrderIndex { .. }
            | Statement::CreateSearchIndex { .. } => 0,
            Statement::InsertRow {
                sort_index, values, ..
            } => 1 + usize::from(sort_index.is_some()) + values.len(),
            Statement::InsertBatch { columns, rows, .. } => rows.len() * (columns.len() + 1),
            Statement::SoftDeleteRow { .. } => 2,
            Statement::RestoreRow { .. } => 1,
            Statement::MoveRow { .. } => 3,
            Statement::SetCell { .. } => 3,
            Statement::SelectRows { filter, limit, .. } => {
                usize::from(filter.is_some()) + usize::from(limit.is_some()) + 1
            }
            Statement::CountRows { filter, .. } => usize::from(filter.is_some()),
        }
    }

    /// Renders parameterised PostgreSQL (`$1..$n`).
    pub fn to_sql(&self) -> SqlText {
        let mut p = Placeholders::new();
        let sql = match self {
            Statement::CreateRelation { relation, columns } => {
                let mut sql = format!(
                    "CREATE TABLE {relation} ( id bigserial primary key, sort_index bigserial not null, sort_index_version bigint not null default 0, "
                );
                for column in columns {
                    let _ = write!(sql, "{column} text, ");
                }
                sql.push_str("deleted_at timestamp with time zone)");
                sql
            }
            Statement::AddColumn { relation, column } => {
                format!("ALTER TABLE {relation} ADD COLUMN {column} text")
            }
            Statement::CreateOrderIndex {
                relation,
                index_name,
            } => format!(
                "create index if not exists {index_name} on {relation} (sort_index asc, sort_index_version desc)"
            ),
            Statement::CreateSearchIndex {
                relation,
                column,
                index_name,
            } => format!(
                "create index if not exists {index_name} on {relation} USING gin ({column} gin_trgm_ops)"
            ),
            Statement::InsertRow {
                relation,
                sort_index_version,
                sort_index,
                values,
                returning,
            } => {
                let mut cols = vec!["sort_index_version".to_string()];
                let mut holders = vec![p.push(SqlParam::Int(*sort_index_version))];
                if let Some(sort_index) = sort_index {
                    cols.push("sort_index".into());
                    holders.push(p.push(SqlParam::Int(*sort_index)));
                }
                for (column, value) in values {
                    cols.push(column.clone());
                    holders.push(p.push(SqlParam::Text(value.clone())));
                }
                format!(
                    "INSERT INTO {relation} ({}) VALUES ({}) RETURNING {}",
                    cols.join(","),
                    holders.join(","),
                    returning.join(", ")
                )
            }
            Statement::InsertBatch {
                relation,
                sort_index_version,
                columns,
                rows,
            } => {
                let mut cols = vec!["sort_index_version".to_string()];
                cols.extend(columns.iter().cloned());
                let tuples: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        let mut holders = vec![p.push(SqlParam::Int(*sort_index_version))];
                        holders.extend(row.iter().map(|v| p.push(SqlParam::Text(v.clone()))));
                        format!("({})", holders.join(","))
                    })
                    .collect();
                format!(
                    "INSERT INTO {relation} ({}) VALUES {}",
                    cols.join(","),
                    tuples.join(",")
                )
            }
            Statement::SoftDeleteRow {
                relation,
                row_id,
                deleted_at_micros,
                returning,
            } => {
                let at = p.push(SqlParam::TimestampMicros(*deleted_at_micros));
                let id = p.push(SqlParam::Int(*row_id));
                let returning: Vec<String> =
                    returning.iter().map(|c| format!("old_data.{c}")).collect();
                format!(
                    "WITH old_data AS (SELECT * FROM {relation} WHERE id = {id} AND deleted_at IS NULL) UPDATE {relation} AS t SET deleted_at = {at} FROM old_data WHERE t.id = old_data.id RETURNING {}",
                    returning.join(", ")
                )
            }
            Statement::RestoreRow { relation, row_id } => {
                let id = p.push(SqlParam::Int(*row_id));
                format!(
                    "UPDATE {relation} SET deleted_at = NULL WHERE id = {id} AND deleted_at IS NOT NULL"
                )
            }
            Statement::MoveRow {
                relation,
                row_id,
                sort_index,
                sort_index_version,
            } => {
                let index = p.push(SqlParam::Int(*sort_index));
                let version = p.push(SqlParam::Int(*sort_index_version));
                let id = p.push(SqlParam::Int(*row_id));
                format!(
                    "UPDATE {relation} SET sort_index = {index}, sort_index_version = {version} WHERE id = {id} AND deleted_at IS NULL"
                )
            }
            Statement::SetCell {
                relation,
                row_id,
                column,
                value,
            } => {
                let id = p.push(SqlParam::Int(*row_id));
                let v = p.push(SqlParam::Text(value.clone()));
                let target = p.push(SqlParam::Int(*row_id));
                format!(
                    "WITH old_data AS (SELECT {column} as v FROM {relation} WHERE id = {id} AND deleted_at IS NULL) UPDATE {relation} as t SET {column} = {v} FROM old_data WHERE t.id = {target} RETURNING old_data.v as before, now() as changed_at"
                )
            }
            Statement::SelectRows {
                relation,
                columns,
                filter,
                order,
                limit,
                offset,
            } => {
                let mut sql = format!(
                    "SELECT {} FROM {relation} WHERE deleted_at IS NULL",
                    columns.join(", ")
                );
                if let Some(filter) = filter {
                    let holder = p.push(SqlParam::TextArray(vec![filter.like_pattern()]));
                    let _ = write!(sql, " AND {} ILIKE ANY ({holder})", filter.column);
                }
                sql.push_str(" ORDER BY ");
                if let Some(order) = order {
                    let dir = if order.descending { "desc" } else { "asc" };
                    if order.numeric {
                        let _ = write!(sql, "NULLIF({}, '')::numeric {dir}, ", order.column);
                    } else {
                        let _ = write!(sql, "{} {dir}, ", order.column);
                    }
                }
                sql.push_str(ORDER_BY_DEFAULT);
                sql.push_str(", id ASC");
                if let Some(limit) = limit {
                    let holder = p.push(SqlParam::Int(*limit as i64));
                    let _ = write!(sql, " LIMIT {holder}");
                }
                let holder = p.push(SqlParam::Int(*offset as i64));
                let _ = write!(sql, " OFFSET {holder}");
                sql
            }
            Statement::CountRows { relation, filter } => {
                let mut sql =
                    format!("SELECT count(*) as total FROM {relation} WHERE deleted_at IS NULL");
                if let Some(filter) = filter {
                    let holder = p.push(SqlParam::TextArray(vec![filter.like_pattern()]));
                    let _ = write!(sql, " AND {} ILIKE ANY ({holder})", filter.column);
                }
                sql
            }
        };
        SqlText {
            sql,
            params: p.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnOrder, SqlParam, Statement, TextFilter};

    #[test]
    fn create_relation_renders_physical_layout() {
        let stmt = Statement::CreateRelation {
            relation: "users_tablespace.t_1".into(),
            columns: vec!["col_a".into(), "col_b".into()],
        };
        assert_eq!(
            stmt.to_sql().sql,
            "CREATE TABLE users_tablespace.t_1 ( id bigserial primary key, sort_index bigserial not null, sort_index_version bigint not null default 0, col_a text, col_b text, deleted_at timestamp with time zone)"
        );
        assert_eq!(stmt.param_count(), 0);
    }

    #[test]
    fn batch_param_count_matches_rendered_placeholders() {
        let stmt = Statement::InsertBatch {
            relation: "users_tablespace.t_1".into(),
            sort_index_version: 7,
            columns: vec!["col_a".into(), "col_b".into()],
            rows: vec![vec![Some("x".into()), None]; 3],
        };
        let sql = stmt.to_sql();
        assert_eq!(stmt.param_count(), 9);
        assert_eq!(sql.params.len(), 9);
        assert!(sql.sql.ends_with("($7,$8,$9)"));
    }

    #[test]
    fn set_cell_reads_prior_value_in_same_statement() {
        let stmt = Statement::SetCell {
            relation: "users_tablespace.t_1".into(),
            row_id: 4,
            column: "col_a".into(),
            value: Some("750".into()),
        };
        let sql = stmt.to_sql();
        assert!(sql.sql.starts_with("WITH old_data AS (SELECT col_a as v"));
        assert!(sql.sql.contains("RETURNING old_data.v as before"));
        assert_eq!(stmt.param_count(), sql.params.len());
    }

    #[test]
    fn select_always_ends_with_default_order() {
        let stmt = Statement::SelectRows {
            relation: "users_tablespace.t_1".into(),
            columns: vec!["id".into(), "col_a".into()],
            filter: Some(TextFilter {
                column: "col_a".into(),
                needle: "50%_off".into(),
            }),
            order: Some(ColumnOrder {
                column: "col_a".into(),
                numeric: true,
                descending: true,
            }),
            limit: Some(20),
            offset: 40,
        };
        let sql = stmt.to_sql();
        assert!(sql.sql.contains(
            "ORDER BY NULLIF(col_a, '')::numeric desc, sort_index ASC, sort_index_version DESC"
        ));
        assert_eq!(
            sql.params[0],
            SqlParam::TextArray(vec!["%50\\%\\_off%".into()])
        );
        assert_eq!(stmt.param_count(), sql.params.len());
    }
}

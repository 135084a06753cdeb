use crate::clock::monotonic_nanos;
use crate::storage::statement::{ColumnOrder, Statement, TextFilter};
use crate::storage::{PriorCell, StatementOutcome, StorageBackend, StorageError, StoredRow};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

pub const DEFAULT_MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone)]
struct RowData {
    sort_index: i64,
    sort_index_version: i64,
    values: HashMap<String, Option<String>>,
    deleted_at_micros: Option<u64>,
}

impl RowData {
    fn is_live(&self) -> bool {
        self.deleted_at_micros.is_none()
    }

    fn value(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

type OrderKey = (i64, Reverse<i64>, i64);

#[derive(Debug, Default)]
struct Relation {
    columns: Vec<String>,
    rows: BTreeMap<i64, RowData>,
    /// `(sort_index asc, sort_index_version desc, id asc)`.
    order: BTreeSet<OrderKey>,
    last_id: i64,
    last_sort_index: i64,
}

impl Relation {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    fn order_key(id: i64, row: &RowData) -> OrderKey {
        (row.sort_index, Reverse(row.sort_index_version), id)
    }

    fn insert(
        &mut self,
        sort_index: Option<i64>,
        version: i64,
        values: HashMap<String, Option<String>>,
    ) -> i64 {
        self.last_id += 1;
        let id = self.last_id;
        let sort_index = match sort_index {
            Some(index) => index,
            None => {
                self.last_sort_index += 1;
                self.last_sort_index
            }
        };
        let row = RowData {
            sort_index,
            sort_index_version: version,
            values,
            deleted_at_micros: None,
        };
        self.order.insert(Self::order_key(id, &row));
        self.rows.insert(id, row);
        id
    }

    fn project(&self, id: i64, row: &RowData, columns: &[String]) -> StoredRow {
        let values = columns
            .iter()
            .filter(|c| c.as_str() != "id")
            .map(|c| (c.clone(), row.values.get(c).cloned().flatten()))
            .collect();
        StoredRow {
            id,
            sort_index: row.sort_index,
            sort_index_version: row.sort_index_version,
            values,
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    relations: HashMap<String, Relation>,
    index_names: HashSet<String>,
}

/// In-process row store that interprets [`Statement`]s with the same
/// semantics a PostgreSQL backend gives their rendered SQL: bigserial keys
/// and sort indexes, soft deletes, ILIKE-style filters and the default
/// `sort_index asc, sort_index_version desc` order. Every statement runs
/// under one store-wide lock, so each is atomic.
pub struct MemoryStorage {
    store: RwLock<Store>,
    max_bind_params: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BIND_PARAMS)
    }
}

impl MemoryStorage {
    pub fn new(max_bind_params: usize) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            max_bind_params,
        }
    }

    pub fn relation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.read().relations.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn relation_columns(&self, relation: &str) -> Option<Vec<String>> {
        self.store
            .read()
            .relations
            .get(relation)
            .map(|r| r.columns.clone())
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.store.read().index_names.contains(index_name)
    }

    /// Physical row count, soft-deleted rows included.
    pub fn physical_row_count(&self, relation: &str) -> usize {
        self.store
            .read()
            .relations
            .get(relation)
            .map_or(0, |r| r.rows.len())
    }

    fn apply(&self, statement: Statement) -> Result<StatementOutcome, StorageError> {
        let params = statement.param_count();
        if params > self.max_bind_params {
            return Err(StorageError::TooManyParameters {
                params,
                max: self.max_bind_params,
            });
        }
        match statement {
            Statement::CreateRelation { relation, columns } => {
                let mut store = self.store.write();
                if store.relations.contains_key(&relation) {
                    return Err(StorageError::DuplicateRelation(relation));
                }
                let mut seen = HashSet::new();
                for column in &columns {
                    if !seen.insert(column.as_str()) {
                        return Err(StorageError::DuplicateColumn {
                            relation,
                            column: column.clone(),
                        });
                    }
                }
                store.relations.insert(
                    relation,
                    Relation {
                        columns,
                        ..Relation::default()
                    },
                );
                Ok(StatementOutcome::Done)
            }
            Statement::AddColumn { relation, column } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                if rel.has_column(&column) {
                    return Err(StorageError::DuplicateColumn { relation, column });
                }
                rel.columns.push(column);
                Ok(StatementOutcome::Done)
            }
            Statement::CreateOrderIndex {
                relation,
                index_name,
            } => {
                let mut store = self.store.write();
                relation_mut(&mut store, &relation)?;
                store.index_names.insert(index_name);
                Ok(StatementOutcome::Done)
            }
            Statement::CreateSearchIndex {
                relation,
                column,
                index_name,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                require_columns(rel, &relation, std::slice::from_ref(&column))?;
                store.index_names.insert(index_name);
                Ok(StatementOutcome::Done)
            }
            Statement::InsertRow {
                relation,
                sort_index_version,
                sort_index,
                values,
                returning,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                let named: Vec<String> = values.iter().map(|(c, _)| c.clone()).collect();
                require_columns(rel, &relation, &named)?;
                require_columns(rel, &relation, &returning)?;
                let id = rel.insert(sort_index, sort_index_version, values.into_iter().collect());
                let row = rel.rows.get(&id).ok_or_else(|| missing_row(&relation, id))?;
                Ok(StatementOutcome::Rows(vec![rel.project(id, row, &returning)]))
            }
            Statement::InsertBatch {
                relation,
                sort_index_version,
                columns,
                rows,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                require_columns(rel, &relation, &columns)?;
                if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
                    return Err(StorageError::Backend(format!(
                        "VALUES lists must all be the same length: expected {}, got {}",
                        columns.len(),
                        bad.len()
                    )));
                }
                let inserted = rows.len() as u64;
                for row in rows {
                    let values = columns.iter().cloned().zip(row).collect();
                    rel.insert(None, sort_index_version, values);
                }
                Ok(StatementOutcome::Affected(inserted))
            }
            Statement::SoftDeleteRow {
                relation,
                row_id,
                deleted_at_micros,
                returning,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                require_columns(rel, &relation, &returning)?;
                let Some(row) = rel.rows.get(&row_id).filter(|r| r.is_live()).cloned() else {
                    return Ok(StatementOutcome::Rows(Vec::new()));
                };
                let snapshot = rel.project(row_id, &row, &returning);
                if let Some(stored) = rel.rows.get_mut(&row_id) {
                    stored.deleted_at_micros = Some(deleted_at_micros);
                }
                Ok(StatementOutcome::Rows(vec![snapshot]))
            }
            Statement::RestoreRow { relation, row_id } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                match rel.rows.get_mut(&row_id) {
                    Some(row) if !row.is_live() => {
                        row.deleted_at_micros = None;
                        Ok(StatementOutcome::Affected(1))
                    }
                    _ => Ok(StatementOutcome::Affected(0)),
                }
            }
            Statement::MoveRow {
                relation,
                row_id,
                sort_index,
                sort_index_version,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                let Some(row) = rel.rows.get_mut(&row_id).filter(|r| r.is_live()) else {
                    return Ok(StatementOutcome::Affected(0));
                };
                let old_key = Relation::order_key(row_id, row);
                row.sort_index = sort_index;
                row.sort_index_version = sort_index_version;
                let new_key = Relation::order_key(row_id, row);
                rel.order.remove(&old_key);
                rel.order.insert(new_key);
                Ok(StatementOutcome::Affected(1))
            }
            Statement::SetCell {
                relation,
                row_id,
                column,
                value,
            } => {
                let mut store = self.store.write();
                let rel = relation_mut(&mut store, &relation)?;
                require_columns(rel, &relation, std::slice::from_ref(&column))?;
                let Some(row) = rel.rows.get_mut(&row_id).filter(|r| r.is_live()) else {
                    return Ok(StatementOutcome::CellWrite(None));
                };
                let before = row.values.insert(column, value).flatten();
                Ok(StatementOutcome::CellWrite(Some(PriorCell {
                    before,
                    changed_at_nanos: monotonic_nanos(),
                })))
            }
            Statement::SelectRows {
                relation,
                columns,
                filter,
                order,
                limit,
                offset,
            } => {
                let store = self.store.read();
                let rel = relation_ref(&store, &relation)?;
                require_columns(rel, &relation, &columns)?;
                let mut matched = live_matches(rel, &relation, filter.as_ref())?;
                if let Some(order) = &order {
                    require_columns(rel, &relation, std::slice::from_ref(&order.column))?;
                    matched.sort_by(|a, b| compare_by(order, a.1, b.1));
                }
                let rows = matched
                    .into_iter()
                    .skip(offset)
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|(id, row)| rel.project(id, row, &columns))
                    .collect();
                Ok(StatementOutcome::Rows(rows))
            }
            Statement::CountRows { relation, filter } => {
                let store = self.store.read();
                let rel = relation_ref(&store, &relation)?;
                let matched = live_matches(rel, &relation, filter.as_ref())?;
                Ok(StatementOutcome::Count(matched.len() as u64))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn execute(&self, statement: Statement) -> Result<StatementOutcome, StorageError> {
        debug!(
            kind = statement.kind(),
            relation = statement.relation(),
            params = statement.param_count(),
            "memory storage statement"
        );
        self.apply(statement)
    }
}

fn relation_mut<'a>(
    store: &'a mut Store,
    relation: &str,
) -> Result<&'a mut Relation, StorageError> {
    store
        .relations
        .get_mut(relation)
        .ok_or_else(|| StorageError::UndefinedRelation(relation.to_string()))
}

fn relation_ref<'a>(store: &'a Store, relation: &str) -> Result<&'a Relation, StorageError> {
    store
        .relations
        .get(relation)
        .ok_or_else(|| StorageError::UndefinedRelation(relation.to_string()))
}

fn require_columns(rel: &Relation, relation: &str, columns: &[String]) -> Result<(), StorageError> {
    match columns
        .iter()
        .find(|c| c.as_str() != "id" && !rel.has_column(c))
    {
        Some(column) => Err(StorageError::UndefinedColumn {
            relation: relation.to_string(),
            column: column.clone(),
        }),
        None => Ok(()),
    }
}

fn missing_row(relation: &str, id: i64) -> StorageError {
    StorageError::Backend(format!("row {id} vanished from {relation}"))
}

/// Live rows in default order, narrowed by the filter when given.
fn live_matches<'a>(
    rel: &'a Relation,
    relation: &str,
    filter: Option<&TextFilter>,
) -> Result<Vec<(i64, &'a RowData)>, StorageError> {
    let needle = match filter {
        Some(filter) => {
            require_columns(rel, relation, std::slice::from_ref(&filter.column))?;
            Some((filter.column.as_str(), filter.needle.to_lowercase()))
        }
        None => None,
    };
    let mut out = Vec::new();
    for (_, _, id) in &rel.order {
        let Some(row) = rel.rows.get(id) else {
            continue;
        };
        if !row.is_live() {
            continue;
        }
        if let Some((column, needle)) = &needle {
            let hit = row
                .value(column)
                .is_some_and(|v| v.to_lowercase().contains(needle.as_str()));
            if !hit {
                continue;
            }
        }
        out.push((*id, row));
    }
    Ok(out)
}

/// Nulls sort last ascending and first descending. For numeric ordering
/// the empty string and unparseable text count as null.
fn compare_by(order: &ColumnOrder, a: &RowData, b: &RowData) -> Ordering {
    let ord = if order.numeric {
        let key = |row: &RowData| {
            row.value(&order.column)
                .and_then(|v| v.trim().parse::<f64>().ok())
        };
        nulls_last(key(a), key(b), |x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal))
    } else {
        nulls_last(a.value(&order.column), b.value(&order.column), |x, y| x.cmp(y))
    };
    if order.descending { ord.reverse() } else { ord }
}

fn nulls_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(&x, &y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

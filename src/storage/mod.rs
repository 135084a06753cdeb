pub mod memory;
pub mod statement;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use statement::{ColumnOrder, SqlParam, SqlText, Statement, TextFilter};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("relation '{0}' does not exist")]
    UndefinedRelation(String),
    #[error("column '{column}' of relation '{relation}' does not exist")]
    UndefinedColumn { relation: String, column: String },
    #[error("relation '{0}' already exists")]
    DuplicateRelation(String),
    #[error("column '{column}' of relation '{relation}' already exists")]
    DuplicateColumn { relation: String, column: String },
    #[error("statement needs {params} bind parameters, limit is {max}")]
    TooManyParameters { params: usize, max: usize },
    #[error("unexpected outcome for {statement}: {outcome}")]
    UnexpectedOutcome {
        statement: &'static str,
        outcome: &'static str,
    },
    #[error("backend failure: {0}")]
    Backend(String),
}

/// A row as stored: the synthetic key, its position, and the text values of
/// the projected columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRow {
    pub id: i64,
    pub sort_index: i64,
    pub sort_index_version: i64,
    pub values: BTreeMap<String, Option<String>>,
}

/// Value a cell held just before an atomic write, and when the write landed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorCell {
    pub before: Option<String>,
    pub changed_at_nanos: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    Done,
    Affected(u64),
    Rows(Vec<StoredRow>),
    /// `None` when the target row does not exist.
    CellWrite(Option<PriorCell>),
    Count(u64),
}

impl StatementOutcome {
    fn name(&self) -> &'static str {
        match self {
            StatementOutcome::Done => "done",
            StatementOutcome::Affected(_) => "affected",
            StatementOutcome::Rows(_) => "rows",
            StatementOutcome::CellWrite(_) => "cell_write",
            StatementOutcome::Count(_) => "count",
        }
    }

    fn unexpected(&self, statement: &'static str) -> StorageError {
        StorageError::UnexpectedOutcome {
            statement,
            outcome: self.name(),
        }
    }

    pub fn into_rows(self, statement: &'static str) -> Result<Vec<StoredRow>, StorageError> {
        match self {
            StatementOutcome::Rows(rows) => Ok(rows),
            other => Err(other.unexpected(statement)),
        }
    }

    pub fn into_affected(self, statement: &'static str) -> Result<u64, StorageError> {
        match self {
            StatementOutcome::Affected(n) => Ok(n),
            other => Err(other.unexpected(statement)),
        }
    }

    pub fn into_cell_write(
        self,
        statement: &'static str,
    ) -> Result<Option<PriorCell>, StorageError> {
        match self {
            StatementOutcome::CellWrite(prior) => Ok(prior),
            other => Err(other.unexpected(statement)),
        }
    }

    pub fn into_count(self, statement: &'static str) -> Result<u64, StorageError> {
        match self {
            StatementOutcome::Count(n) => Ok(n),
            other => Err(other.unexpected(statement)),
        }
    }
}

/// Executes opaque statements against the physical row store. Each call is
/// atomic on its own; nothing spans statements.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn execute(&self, statement: Statement) -> Result<StatementOutcome, StorageError>;
}

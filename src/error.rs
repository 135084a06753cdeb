use crate::catalog::types::ColumnType;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Database,
    Table,
    Column,
    User,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Database => write!(f, "database"),
            ResourceType::Table => write!(f, "table"),
            ResourceType::Column => write!(f, "column"),
            ResourceType::User => write!(f, "user"),
        }
    }
}

/// One cell value rejected by its column's type or enum set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCell {
    pub column_id: String,
    pub column_type: ColumnType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableHubErrorCode {
    DatabaseNotFound,
    TableNotFound,
    ColumnNotFound,
    UserNotFound,
    DatabaseAlreadyExists,
    TableAlreadyExists,
    ColumnAlreadyExists,
    UserAlreadyExists,
    InvalidColumnValue,
    TooManyColumns,
    Validation,
    InvalidConfig,
    PermissionDenied,
    LockTimeout,
    Timeout,
    Unavailable,
    Storage,
}

impl TableHubErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TableHubErrorCode::DatabaseNotFound => "database_not_found",
            TableHubErrorCode::TableNotFound => "table_not_found",
            TableHubErrorCode::ColumnNotFound => "column_not_found",
            TableHubErrorCode::UserNotFound => "user_not_found",
            TableHubErrorCode::DatabaseAlreadyExists => "database_already_exists",
            TableHubErrorCode::TableAlreadyExists => "table_already_exists",
            TableHubErrorCode::ColumnAlreadyExists => "column_already_exists",
            TableHubErrorCode::UserAlreadyExists => "user_already_exists",
            TableHubErrorCode::InvalidColumnValue => "invalid_column_value",
            TableHubErrorCode::TooManyColumns => "too_many_columns",
            TableHubErrorCode::Validation => "validation",
            TableHubErrorCode::InvalidConfig => "invalid_config",
            TableHubErrorCode::PermissionDenied => "permission_denied",
            TableHubErrorCode::LockTimeout => "lock_timeout",
            TableHubErrorCode::Timeout => "timeout",
            TableHubErrorCode::Unavailable => "unavailable",
            TableHubErrorCode::Storage => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum TableHubError {
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("{resource_type} '{resource_id}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("invalid value(s) for {column_type} column '{column_id}': {values:?}")]
    InvalidColumnValue {
        column_id: String,
        column_type: ColumnType,
        values: Vec<String>,
    },
    #[error("invalid value(s) in row: {}", describe_invalid_cells(.invalid))]
    InvalidRowValues { invalid: Vec<InvalidCell> },
    #[error("too many columns: {columns} columns exceed the {max_params} parameter ceiling")]
    TooManyColumns { columns: usize, max_params: usize },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out waiting for lock on '{key}'")]
    LockTimeout { key: String },
    #[error("timeout")]
    Timeout,
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TableHubError {
    pub fn table_not_found(table_id: impl Into<String>) -> Self {
        TableHubError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: table_id.into(),
        }
    }

    pub fn column_not_found(column_id: impl Into<String>) -> Self {
        TableHubError::NotFound {
            resource_type: ResourceType::Column,
            resource_id: column_id.into(),
        }
    }

    pub fn code(&self) -> TableHubErrorCode {
        match self {
            TableHubError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Database => TableHubErrorCode::DatabaseNotFound,
                ResourceType::Table => TableHubErrorCode::TableNotFound,
                ResourceType::Column => TableHubErrorCode::ColumnNotFound,
                ResourceType::User => TableHubErrorCode::UserNotFound,
            },
            TableHubError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Database => TableHubErrorCode::DatabaseAlreadyExists,
                ResourceType::Table => TableHubErrorCode::TableAlreadyExists,
                ResourceType::Column => TableHubErrorCode::ColumnAlreadyExists,
                ResourceType::User => TableHubErrorCode::UserAlreadyExists,
            },
            TableHubError::InvalidColumnValue { .. } | TableHubError::InvalidRowValues { .. } => {
                TableHubErrorCode::InvalidColumnValue
            }
            TableHubError::TooManyColumns { .. } => TableHubErrorCode::TooManyColumns,
            TableHubError::Validation(_) => TableHubErrorCode::Validation,
            TableHubError::InvalidConfig { .. } => TableHubErrorCode::InvalidConfig,
            TableHubError::PermissionDenied(_) => TableHubErrorCode::PermissionDenied,
            TableHubError::LockTimeout { .. } => TableHubErrorCode::LockTimeout,
            TableHubError::Timeout => TableHubErrorCode::Timeout,
            TableHubError::Unavailable { .. } => TableHubErrorCode::Unavailable,
            TableHubError::Storage(_) => TableHubErrorCode::Storage,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Conditions the caller caused and can correct (the 4xx family).
    /// Everything else is an internal failure of this request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TableHubError::NotFound { .. }
                | TableHubError::AlreadyExists { .. }
                | TableHubError::InvalidColumnValue { .. }
                | TableHubError::InvalidRowValues { .. }
                | TableHubError::TooManyColumns { .. }
                | TableHubError::Validation(_)
                | TableHubError::PermissionDenied(_)
        )
    }
}

fn describe_invalid_cells(invalid: &[InvalidCell]) -> String {
    invalid
        .iter()
        .map(|cell| format!("{} column '{}': {:?}", cell.column_type, cell.column_id, cell.value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub mod catalog;
pub mod changelog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod key_lock;
pub mod permission;
pub mod physical;
pub mod storage;

pub use crate::catalog::Catalog;
pub use crate::catalog::schema::{Column, ColumnSpec, NewTable, Table};
pub use crate::catalog::types::ColumnType;
pub use crate::changelog::ChangeLedger;
pub use crate::config::EngineConfig;
pub use crate::engine::{
    ColumnEdit, EngineHubs, ReadTableParams, RowValues, SortDirection, TableEngine, TableExport,
    TablePage, TableRow,
};
pub use crate::error::{InvalidCell, TableHubError, TableHubErrorCode};
pub use crate::hub::{Hub, Notifier, Subscription};
pub use crate::permission::{CallerContext, Role};
pub use crate::storage::StorageBackend;
pub use crate::storage::memory::MemoryStorage;

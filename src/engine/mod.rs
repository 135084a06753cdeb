mod access;
mod columns;
mod rows;
mod tables;


use crate::catalog::Catalog;
use crate::catalog::schema::Table;
use crate::changelog::ChangeLedger;
use crate::config::EngineConfig;
use crate::error::TableHubError;
use crate::hub::event::HubEvent;
use crate::hub::{Hub, Notifier};
use crate::key_lock::{KeyLockRegistry, KeyReadGuard, KeyWriteGuard};
use crate::permission::{CallerContext, DatabaseId, Role, UserId};
use crate::physical::PhysicalSchemaManager;
use crate::storage::StorageBackend;
use crate::storage::memory::MemoryStorage;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub use columns::ColumnEdit;
pub use rows::{ReadTableParams, SortDirection, TableExport, TablePage, TableRow};
pub use tables::import_batch_size;

const TABLES_HUB: &str = "tables";
const USERS_HUB: &str = "users";

/// Cell values keyed by column id.
pub type RowValues = BTreeMap<String, Option<String>>;

/// The Collaborative Table Engine.
///
/// Schema mutations (column add/edit/delete/restore, table delete/restore)
/// hold the per-table exclusive lock across read, mutate and persist. Row
/// and cell writes hold the same lock in shared mode, so they run
/// concurrently with each other but never interleave with a schema change.
/// Broadcasts go out after the lock is released and never block.
pub struct TableEngine {
    config: EngineConfig,
    catalog: RwLock<Catalog>,
    schema: PhysicalSchemaManager,
    ledger: ChangeLedger,
    locks: KeyLockRegistry,
    tables_notifier: Arc<dyn Notifier>,
    users_notifier: Arc<dyn Notifier>,
    hubs: Option<EngineHubs>,
}

/// Hubs started by [`TableEngine::new`]; transports subscribe through them.
#[derive(Clone)]
pub struct EngineHubs {
    pub tables: Arc<Hub>,
    pub users: Arc<Hub>,
}

impl TableEngine {
    /// Builds an engine with its own table and user hubs. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self, TableHubError> {
        config.validate()?;
        let hubs = EngineHubs {
            tables: Arc::new(Hub::start(
                TABLES_HUB,
                config.hub_queue_capacity,
                config.subscriber_queue_capacity,
            )),
            users: Arc::new(Hub::start(
                USERS_HUB,
                config.hub_queue_capacity,
                config.subscriber_queue_capacity,
            )),
        };
        let mut engine =
            Self::with_notifiers(config, storage, hubs.tables.clone(), hubs.users.clone())?;
        engine.hubs = Some(hubs);
        Ok(engine)
    }

    pub fn in_memory(config: EngineConfig) -> Result<Self, TableHubError> {
        let storage = Arc::new(MemoryStorage::new(config.max_bind_params));
        Self::new(config, storage)
    }

    /// Builds an engine that publishes through caller-supplied notifiers.
    pub fn with_notifiers(
        config: EngineConfig,
        storage: Arc<dyn StorageBackend>,
        tables_notifier: Arc<dyn Notifier>,
        users_notifier: Arc<dyn Notifier>,
    ) -> Result<Self, TableHubError> {
        config.validate()?;
        info!(
            import_max_params = config.import_max_params,
            max_bind_params = config.max_bind_params,
            table_lock_timeout_ms = config.table_lock_timeout_ms,
            statement_timeout_ms = config.statement_timeout_ms,
            hub_queue_capacity = config.hub_queue_capacity,
            subscriber_queue_capacity = config.subscriber_queue_capacity,
            max_page_size = config.max_page_size,
            "table engine configured"
        );
        Ok(Self {
            schema: PhysicalSchemaManager::new(storage, config.statement_timeout()),
            locks: KeyLockRegistry::new(config.table_lock_timeout()),
            catalog: RwLock::new(Catalog::default()),
            ledger: ChangeLedger::new(),
            tables_notifier,
            users_notifier,
            hubs: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hubs(&self) -> Option<&EngineHubs> {
        self.hubs.as_ref()
    }

    /// Point-in-time copy of the logical catalog.
    pub fn catalog_snapshot(&self) -> Catalog {
        self.catalog.read().snapshot()
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn check_role(&self, user_id: UserId, database_id: DatabaseId, required: Role) -> bool {
        self.catalog
            .read()
            .role_of(user_id, database_id)
            .is_some_and(|role| role.authorizes(required))
    }

    fn authorize(
        &self,
        caller: &CallerContext,
        database_id: DatabaseId,
        required: Role,
    ) -> Result<(), TableHubError> {
        let catalog = self.catalog.read();
        catalog.database(database_id)?;
        match catalog.role_of(caller.user_id, database_id) {
            Some(role) if role.authorizes(required) => Ok(()),
            Some(role) => Err(TableHubError::PermissionDenied(format!(
                "user {} has role {role} on database {database_id}, {required} required",
                caller.user_id
            ))),
            None => Err(TableHubError::PermissionDenied(format!(
                "user {} is not a member of database {database_id}",
                caller.user_id
            ))),
        }
    }

    /// Current definition of a live table, checked against the caller's role.
    fn authorized_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        required: Role,
    ) -> Result<Table, TableHubError> {
        let table = self.catalog.read().table(table_id, false)?.clone();
        self.authorize(caller, table.database_id, required)?;
        Ok(table)
    }

    /// Exclusive table lock. Only tables the caller can already reach get a
    /// registry entry; the definition is re-read once the lock is held.
    async fn lock_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        required: Role,
    ) -> Result<(KeyWriteGuard, Table), TableHubError> {
        self.authorized_table(caller, table_id, required)?;
        let guard = self.locks.lock(table_id).await?;
        let table = self.authorized_table(caller, table_id, required)?;
        Ok((guard, table))
    }

    /// Shared counterpart of [`Self::lock_table`] for row and cell writes.
    async fn share_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        required: Role,
    ) -> Result<(KeyReadGuard, Table), TableHubError> {
        self.authorized_table(caller, table_id, required)?;
        let guard = self.locks.read(table_id).await?;
        let table = self.authorized_table(caller, table_id, required)?;
        Ok((guard, table))
    }

    fn persist_table(&self, table: Table) -> Result<(), TableHubError> {
        self.catalog.write().update_table(table)
    }

    fn user_topics(&self, database_id: DatabaseId) -> Vec<String> {
        self.catalog
            .read()
            .member_ids(database_id)
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    fn notify_table(&self, table_id: &str, event: HubEvent) {
        self.tables_notifier.try_broadcast(table_id, event);
    }

    fn notify_user(&self, user_id: UserId, event: HubEvent) {
        self.users_notifier.try_broadcast(&user_id.to_string(), event);
    }

    fn notify_members(&self, database_id: DatabaseId, event: HubEvent) {
        let topics = self.user_topics(database_id);
        self.users_notifier.try_broadcast_many(&topics, event);
    }
}

/// `t_` followed by 32 hex digits.
pub fn new_table_id() -> String {
    format!("t_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_column_id() -> String {
    format!("col_{}", uuid::Uuid::new_v4().simple())
}

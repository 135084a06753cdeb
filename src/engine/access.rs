use crate::catalog::directory::{
    DatabaseMember, DatabaseMeta, MemberDatabase, Membership, UserMeta,
};
use crate::engine::TableEngine;
use crate::error::TableHubError;
use crate::hub::event::{GoAwayFromTableMessage, HubEvent};
use crate::permission::{CallerContext, DatabaseId, Role, UserId};
use tracing::info;

impl TableEngine {
    pub fn register_user(&self, email: &str, name: &str) -> Result<UserMeta, TableHubError> {
        let user = self.catalog.write().register_user(email, name)?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Creates a database owned by the caller, who becomes its admin.
    pub fn create_database(
        &self,
        caller: &CallerContext,
        name: &str,
    ) -> Result<DatabaseMeta, TableHubError> {
        let database = {
            let mut catalog = self.catalog.write();
            catalog.user(caller.user_id)?;
            let database = catalog.create_database(name)?;
            catalog.upsert_membership(caller.user_id, database.id, Role::Admin)?;
            database
        };
        info!(database_id = database.id, owner = caller.user_id, "database created");
        self.notify_user(caller.user_id, HubEvent::FetchDatabases);
        Ok(database)
    }

    /// Grants `role` to `user_id`, reviving a removed membership.
    pub fn set_role(
        &self,
        caller: &CallerContext,
        database_id: DatabaseId,
        user_id: UserId,
        role: Role,
    ) -> Result<Membership, TableHubError> {
        self.authorize(caller, database_id, Role::Admin)?;
        let membership = self
            .catalog
            .write()
            .upsert_membership(user_id, database_id, role)?;
        info!(database_id, user_id, role = %role, "role granted");
        self.notify_user(user_id, HubEvent::FetchDatabases);
        Ok(membership)
    }

    /// Revokes a membership. The removed user is told to leave every table
    /// of the database and to refetch its database list.
    pub fn remove_member(
        &self,
        caller: &CallerContext,
        database_id: DatabaseId,
        user_id: UserId,
    ) -> Result<bool, TableHubError> {
        self.authorize(caller, database_id, Role::Admin)?;
        let (revoked, tables) = {
            let mut catalog = self.catalog.write();
            catalog.user(user_id)?;
            let revoked = catalog.revoke_membership(user_id, database_id);
            (revoked, catalog.tables_in_database(database_id, false))
        };
        if !revoked {
            return Ok(false);
        }
        info!(database_id, user_id, "member removed");
        for table in tables {
            self.notify_user(
                user_id,
                HubEvent::GoAwayFromTable(GoAwayFromTableMessage { table_id: table.id }),
            );
        }
        self.notify_user(user_id, HubEvent::FetchDatabases);
        Ok(true)
    }

    pub fn databases_for_user(
        &self,
        caller: &CallerContext,
    ) -> Result<Vec<MemberDatabase>, TableHubError> {
        let catalog = self.catalog.read();
        catalog.user(caller.user_id)?;
        Ok(catalog.databases_of(caller.user_id))
    }

    pub fn members(
        &self,
        caller: &CallerContext,
        database_id: DatabaseId,
    ) -> Result<Vec<DatabaseMember>, TableHubError> {
        self.authorize(caller, database_id, Role::Reader)?;
        Ok(self.catalog.read().members_of(database_id))
    }
}

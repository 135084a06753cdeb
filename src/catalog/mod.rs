pub mod directory;
pub mod schema;
pub mod types;

use crate::catalog::directory::{
    DatabaseMember, DatabaseMeta, MemberDatabase, Membership, UserMeta,
};
use crate::catalog::schema::Table;
use crate::clock::now_micros;
use crate::error::{ResourceType, TableHubError};
use crate::permission::{DatabaseId, Role, UserId};
use im::HashMap;
use serde::{Deserialize, Serialize};

/// Logical metadata: table definitions plus the user/database/membership
/// directory. Persistent maps make `clone()` cheap, so readers take a
/// snapshot and writers publish a whole new definition in one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Catalog {
    pub tables: HashMap<String, Table>,
    pub users: HashMap<UserId, UserMeta>,
    pub databases: HashMap<DatabaseId, DatabaseMeta>,
    pub memberships: HashMap<(UserId, DatabaseId), Membership>,
    next_user_id: UserId,
    next_database_id: DatabaseId,
}

impl Catalog {
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn insert_table(&mut self, table: Table) -> Result<(), TableHubError> {
        if self.tables.contains_key(&table.id) {
            return Err(TableHubError::AlreadyExists {
                resource_type: ResourceType::Table,
                resource_id: table.id,
            });
        }
        self.database(table.database_id)?;
        self.tables.insert(table.id.clone(), table);
        Ok(())
    }

    /// Looks a table up; soft-deleted tables are only visible with
    /// `with_deleted`.
    pub fn table(&self, table_id: &str, with_deleted: bool) -> Result<&Table, TableHubError> {
        match self.tables.get(table_id) {
            Some(table) if with_deleted || !table.is_deleted() => Ok(table),
            _ => Err(TableHubError::table_not_found(table_id)),
        }
    }

    /// Replaces a stored definition wholesale.
    pub fn update_table(&mut self, table: Table) -> Result<(), TableHubError> {
        if !self.tables.contains_key(&table.id) {
            return Err(TableHubError::table_not_found(table.id));
        }
        self.tables.insert(table.id.clone(), table);
        Ok(())
    }

    pub fn set_table_deleted(
        &mut self,
        table_id: &str,
        deleted_at_micros: Option<u64>,
    ) -> Result<Table, TableHubError> {
        let table = self
            .tables
            .get_mut(table_id)
            .ok_or_else(|| TableHubError::table_not_found(table_id))?;
        table.deleted_at_micros = deleted_at_micros;
        Ok(table.clone())
    }

    pub fn tables_in_database(&self, database_id: DatabaseId, with_deleted: bool) -> Vec<Table> {
        let mut tables: Vec<Table> = self
            .tables
            .values()
            .filter(|t| t.database_id == database_id && (with_deleted || !t.is_deleted()))
            .cloned()
            .collect();
        tables.sort_by(|a, b| {
            a.created_at_micros
                .cmp(&b.created_at_micros)
                .then_with(|| a.id.cmp(&b.id))
        });
        tables
    }

    pub fn register_user(&mut self, email: &str, name: &str) -> Result<UserMeta, TableHubError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(TableHubError::Validation("email must not be empty".into()));
        }
        if self.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(TableHubError::AlreadyExists {
                resource_type: ResourceType::User,
                resource_id: email.to_string(),
            });
        }
        self.next_user_id += 1;
        let user = UserMeta {
            id: self.next_user_id,
            email: email.to_string(),
            name: name.to_string(),
            created_at_micros: now_micros(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn user(&self, user_id: UserId) -> Result<&UserMeta, TableHubError> {
        self.users.get(&user_id).ok_or_else(|| TableHubError::NotFound {
            resource_type: ResourceType::User,
            resource_id: user_id.to_string(),
        })
    }

    pub fn create_database(&mut self, name: &str) -> Result<DatabaseMeta, TableHubError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TableHubError::Validation(
                "database name must not be empty".into(),
            ));
        }
        self.next_database_id += 1;
        let database = DatabaseMeta {
            id: self.next_database_id,
            name: name.to_string(),
            created_at_micros: now_micros(),
            deleted_at_micros: None,
        };
        self.databases.insert(database.id, database.clone());
        Ok(database)
    }

    pub fn database(&self, database_id: DatabaseId) -> Result<&DatabaseMeta, TableHubError> {
        match self.databases.get(&database_id) {
            Some(db) if db.deleted_at_micros.is_none() => Ok(db),
            _ => Err(TableHubError::NotFound {
                resource_type: ResourceType::Database,
                resource_id: database_id.to_string(),
            }),
        }
    }

    /// Grants `role`, reviving a revoked membership if one exists.
    pub fn upsert_membership(
        &mut self,
        user_id: UserId,
        database_id: DatabaseId,
        role: Role,
    ) -> Result<Membership, TableHubError> {
        self.user(user_id)?;
        self.database(database_id)?;
        let now = now_micros();
        let membership = self
            .memberships
            .entry((user_id, database_id))
            .or_insert_with(|| Membership {
                user_id,
                database_id,
                role,
                created_at_micros: now,
                deleted_at_micros: None,
            });
        membership.role = role;
        membership.deleted_at_micros = None;
        Ok(membership.clone())
    }

    /// Soft-deletes the membership. Returns false if there was no active one.
    pub fn revoke_membership(&mut self, user_id: UserId, database_id: DatabaseId) -> bool {
        match self.memberships.get_mut(&(user_id, database_id)) {
            Some(m) if m.is_active() => {
                m.deleted_at_micros = Some(now_micros());
                true
            }
            _ => false,
        }
    }

    pub fn role_of(&self, user_id: UserId, database_id: DatabaseId) -> Option<Role> {
        self.database(database_id).ok()?;
        self.memberships
            .get(&(user_id, database_id))
            .filter(|m| m.is_active())
            .map(|m| m.role)
    }

    pub fn member_ids(&self, database_id: DatabaseId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .memberships
            .values()
            .filter(|m| m.database_id == database_id && m.is_active())
            .map(|m| m.user_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn members_of(&self, database_id: DatabaseId) -> Vec<DatabaseMember> {
        self.member_ids(database_id)
            .into_iter()
            .filter_map(|user_id| {
                let user = self.users.get(&user_id)?.clone();
                let role = self.memberships.get(&(user_id, database_id))?.role;
                Some(DatabaseMember { user, role })
            })
            .collect()
    }

    pub fn databases_of(&self, user_id: UserId) -> Vec<MemberDatabase> {
        let mut out: Vec<MemberDatabase> = self
            .memberships
            .values()
            .filter(|m| m.user_id == user_id && m.is_active())
            .filter_map(|m| {
                let database = self.database(m.database_id).ok()?.clone();
                Some(MemberDatabase {
                    database,
                    role: m.role,
                })
            })
            .collect();
        out.sort_by_key(|d| d.database.id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::catalog::schema::Table;
    use crate::error::TableHubErrorCode;
    use crate::permission::Role;

    fn table(id: &str, database_id: i64, created: u64) -> Table {
        Table {
            id: id.into(),
            name: id.into(),
            database_id,
            columns: Vec::new(),
            created_at_micros: created,
            deleted_at_micros: None,
        }
    }

    #[test]
    fn soft_deleted_tables_are_hidden_unless_requested() {
        let mut catalog = Catalog::default();
        let db = catalog.create_database("main").expect("db");
        catalog.insert_table(table("t_a", db.id, 1)).expect("insert");
        catalog.set_table_deleted("t_a", Some(5)).expect("delete");
        let err = catalog.table("t_a", false).expect_err("hidden");
        assert_eq!(err.code(), TableHubErrorCode::TableNotFound);
        assert!(catalog.table("t_a", true).is_ok());
        assert!(catalog.tables_in_database(db.id, false).is_empty());
    }

    #[test]
    fn insert_table_requires_live_database() {
        let mut catalog = Catalog::default();
        let err = catalog.insert_table(table("t_a", 99, 1)).expect_err("no db");
        assert_eq!(err.code(), TableHubErrorCode::DatabaseNotFound);
    }

    #[test]
    fn duplicate_emails_are_rejected() {
        let mut catalog = Catalog::default();
        catalog.register_user("a@x.io", "A").expect("first");
        let err = catalog.register_user("A@X.io", "A2").expect_err("dup");
        assert_eq!(err.code(), TableHubErrorCode::UserAlreadyExists);
    }

    #[test]
    fn membership_upsert_revives_revoked_role() {
        let mut catalog = Catalog::default();
        let user = catalog.register_user("a@x.io", "A").expect("user");
        let db = catalog.create_database("main").expect("db");
        catalog
            .upsert_membership(user.id, db.id, Role::Writer)
            .expect("grant");
        assert!(catalog.revoke_membership(user.id, db.id));
        assert!(!catalog.revoke_membership(user.id, db.id));
        assert_eq!(catalog.role_of(user.id, db.id), None);
        assert!(catalog.databases_of(user.id).is_empty());

        catalog
            .upsert_membership(user.id, db.id, Role::Reader)
            .expect("regrant");
        assert_eq!(catalog.role_of(user.id, db.id), Some(Role::Reader));
        assert_eq!(catalog.member_ids(db.id), vec![user.id]);
        assert_eq!(catalog.members_of(db.id)[0].role, Role::Reader);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let mut catalog = Catalog::default();
        let db = catalog.create_database("main").expect("db");
        let before = catalog.snapshot();
        catalog.insert_table(table("t_a", db.id, 1)).expect("insert");
        assert!(before.table("t_a", true).is_err());
        assert!(catalog.table("t_a", false).is_ok());
    }
}

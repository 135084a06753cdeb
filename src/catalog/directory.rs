use crate::permission::{DatabaseId, Role, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMeta {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub created_at_micros: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseMeta {
    pub id: DatabaseId,
    pub name: String,
    pub created_at_micros: u64,
    #[serde(default)]
    pub deleted_at_micros: Option<u64>,
}

/// A user's role on one database. Revocation soft-deletes the membership;
/// granting again clears the stamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub user_id: UserId,
    pub database_id: DatabaseId,
    pub role: Role,
    pub created_at_micros: u64,
    #[serde(default)]
    pub deleted_at_micros: Option<u64>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.deleted_at_micros.is_none()
    }
}

/// A database as seen by one of its members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberDatabase {
    pub database: DatabaseMeta,
    pub role: Role,
}

/// A member as seen from the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseMember {
    pub user: UserMeta,
    pub role: Role,
}

//! User directory rows.

use herald_core::audience::DirectoryUser;
use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub display_name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_login_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// The subset of `users` needed for audience resolution.
#[derive(Debug, Clone, FromRow)]
pub struct DirectoryUserRow {
    pub id: DbId,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_login_at: Option<Timestamp>,
}

impl From<DirectoryUserRow> for DirectoryUser {
    fn from(row: DirectoryUserRow) -> Self {
        DirectoryUser {
            id: row.id,
            is_active: row.is_active,
            is_admin: row.is_admin,
            last_login_at: row.last_login_at,
        }
    }
}

/// DTO for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub display_name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
}

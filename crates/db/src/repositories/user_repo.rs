//! Repository for the `users` table.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::user::{CreateUser, DirectoryUserRow, User};

const COLUMNS: &str =
    "id, display_name, email, is_active, is_admin, last_login_at, created_at, updated_at";

pub struct UserRepo;

impl UserRepo {
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (display_name, email, is_active, is_admin) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&input.display_name)
            .bind(&input.email)
            .bind(input.is_active)
            .bind(input.is_admin)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Every user, ordered by id, reduced to the targeting attributes.
    pub async fn directory(pool: &PgPool) -> Result<Vec<DirectoryUserRow>, sqlx::Error> {
        sqlx::query_as::<_, DirectoryUserRow>(
            "SELECT id, is_active, is_admin, last_login_at FROM users ORDER BY id",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn count_active(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = true")
                .fetch_one(pool)
                .await?;
        Ok(count.unwrap_or(0))
    }

    /// Stamp a successful login.
    pub async fn record_login(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! Persistence collaborator for users, tokens, permissions and photos.
//!
//! The [`Store`] trait is the seam the admission core talks through; the
//! production implementation is [`PgStore`]. Every call is bounded by
//! [`DB_TIMEOUT`] so a slow database fails the request instead of hanging it.

use crate::api::{
    permissions::Permissions,
    tokens::{Scope, Token},
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info_span, Instrument};

/// Deadline applied to every database call.
pub const DB_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("storage unavailable: {0}")]
    Unavailable(anyhow::Error),
}

/// A registered account. The password hash is never part of this value; it
/// only travels alongside it out of [`Store::user_by_email`].
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub activated: bool,
    #[serde(skip)]
    pub version: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Photo {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub caption: String,
    #[serde(skip)]
    pub version: i32,
}

/// Storage contract required by the token service, the permission registry
/// and the handlers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<(User, String), StoreError>;
    /// Optimistic update keyed on `(id, version)`; a missed match is an
    /// [`StoreError::EditConflict`].
    async fn update_user(&self, user: &User) -> Result<User, StoreError>;

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError>;
    /// Single predicate covering hash match, scope match and expiry so an
    /// absent and an expired token are indistinguishable to callers.
    async fn user_for_token(
        &self,
        scope: Scope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, StoreError>;
    /// Deleting zero rows is not an error.
    async fn delete_tokens(&self, scope: Scope, user_id: i64) -> Result<(), StoreError>;

    async fn capabilities_for(&self, user_id: i64) -> Result<Permissions, StoreError>;
    async fn grant_capability(&self, user_id: i64, code: &str) -> Result<(), StoreError>;

    async fn list_photos(&self) -> Result<Vec<Photo>, StoreError>;
    async fn photo(&self, id: i64) -> Result<Photo, StoreError>;
    async fn insert_photo(&self, title: &str, caption: &str) -> Result<Photo, StoreError>;
    async fn delete_photo(&self, id: i64) -> Result<(), StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Run a query future under [`DB_TIMEOUT`] and map sqlx errors to the
/// store taxonomy.
async fn bounded<T, F>(operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(DB_TIMEOUT, fut).await {
        Err(_) => Err(StoreError::Unavailable(anyhow!(
            "{operation} timed out after {DB_TIMEOUT:?}"
        ))),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(sqlx::Error::RowNotFound)) => Err(StoreError::RecordNotFound),
        Ok(Err(err)) if is_unique_violation(&err) => Err(StoreError::DuplicateEmail),
        Ok(Err(err)) => Err(StoreError::Unavailable(err.into())),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        created_at: row.get("created_at"),
        name: row.get("name"),
        email: row.get("email"),
        activated: row.get("activated"),
        version: row.get("version"),
    }
}

fn photo_from_row(row: &PgRow) -> Photo {
    Photo {
        id: row.get("id"),
        created_at: row.get("created_at"),
        title: row.get("title"),
        caption: row.get("caption"),
        version: row.get("version"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let query = r"
            INSERT INTO users (name, email, password_hash, activated)
            VALUES ($1, $2, $3, false)
            RETURNING id, created_at, name, email, activated, version
        ";
        let row = bounded(
            "insert user",
            sqlx::query(query)
                .bind(name)
                .bind(email)
                .bind(password_hash)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query)),
        )
        .await?;
        Ok(user_from_row(&row))
    }

    async fn user_by_email(&self, email: &str) -> Result<(User, String), StoreError> {
        let query = r"
            SELECT id, created_at, name, email, password_hash, activated, version
            FROM users
            WHERE email = $1
        ";
        let row = bounded(
            "lookup user by email",
            sqlx::query(query)
                .bind(email)
                .fetch_one(&self.pool)
                .instrument(query_span("SELECT", query)),
        )
        .await?;
        let password_hash: String = row.get("password_hash");
        Ok((user_from_row(&row), password_hash))
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        let query = r"
            UPDATE users
            SET name = $1, email = $2, activated = $3, version = version + 1
            WHERE id = $4 AND version = $5
            RETURNING id, created_at, name, email, activated, version
        ";
        let row = bounded(
            "update user",
            sqlx::query(query)
                .bind(&user.name)
                .bind(&user.email)
                .bind(user.activated)
                .bind(user.id)
                .bind(user.version)
                .fetch_one(&self.pool)
                .instrument(query_span("UPDATE", query)),
        )
        .await
        .map_err(|err| match err {
            // A vanished row here means someone else bumped the version.
            StoreError::RecordNotFound => StoreError::EditConflict,
            other => other,
        })?;
        Ok(user_from_row(&row))
    }

    async fn insert_token(&self, token: &Token) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
        ";
        bounded(
            "insert token",
            sqlx::query(query)
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.pool)
                .instrument(query_span("INSERT", query)),
        )
        .await?;
        Ok(())
    }

    async fn user_for_token(
        &self,
        scope: Scope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let query = r"
            SELECT users.id, users.created_at, users.name, users.email,
                   users.activated, users.version
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = $1
              AND tokens.scope = $2
              AND tokens.expiry > $3
        ";
        let row = bounded(
            "lookup user for token",
            sqlx::query(query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_one(&self.pool)
                .instrument(query_span("SELECT", query)),
        )
        .await?;
        Ok(user_from_row(&row))
    }

    async fn delete_tokens(&self, scope: Scope, user_id: i64) -> Result<(), StoreError> {
        let query = r"
            DELETE FROM tokens
            WHERE scope = $1 AND user_id = $2
        ";
        bounded(
            "delete tokens",
            sqlx::query(query)
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.pool)
                .instrument(query_span("DELETE", query)),
        )
        .await?;
        Ok(())
    }

    async fn capabilities_for(&self, user_id: i64) -> Result<Permissions, StoreError> {
        let query = r"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions
                ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
        ";
        let rows = bounded(
            "lookup capabilities",
            sqlx::query(query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(query_span("SELECT", query)),
        )
        .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("code"))
            .collect())
    }

    async fn grant_capability(&self, user_id: i64, code: &str) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = $2
        ";
        bounded(
            "grant capability",
            sqlx::query(query)
                .bind(user_id)
                .bind(code)
                .execute(&self.pool)
                .instrument(query_span("INSERT", query)),
        )
        .await?;
        Ok(())
    }

    async fn list_photos(&self) -> Result<Vec<Photo>, StoreError> {
        let query = r"
            SELECT id, created_at, title, caption, version
            FROM photo
            ORDER BY id
        ";
        let rows = bounded(
            "list photos",
            sqlx::query(query)
                .fetch_all(&self.pool)
                .instrument(query_span("SELECT", query)),
        )
        .await?;
        Ok(rows.iter().map(photo_from_row).collect())
    }

    async fn photo(&self, id: i64) -> Result<Photo, StoreError> {
        let query = r"
            SELECT id, created_at, title, caption, version
            FROM photo
            WHERE id = $1
        ";
        let row = bounded(
            "lookup photo",
            sqlx::query(query)
                .bind(id)
                .fetch_one(&self.pool)
                .instrument(query_span("SELECT", query)),
        )
        .await?;
        Ok(photo_from_row(&row))
    }

    async fn insert_photo(&self, title: &str, caption: &str) -> Result<Photo, StoreError> {
        let query = r"
            INSERT INTO photo (title, caption)
            VALUES ($1, $2)
            RETURNING id, created_at, title, caption, version
        ";
        let row = bounded(
            "insert photo",
            sqlx::query(query)
                .bind(title)
                .bind(caption)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query)),
        )
        .await?;
        Ok(photo_from_row(&row))
    }

    async fn delete_photo(&self, id: i64) -> Result<(), StoreError> {
        let query = r"
            DELETE FROM photo
            WHERE id = $1
        ";
        let result = bounded(
            "delete photo",
            sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(query_span("DELETE", query)),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }
}

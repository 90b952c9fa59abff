/// User directory
///
/// The `users` table belongs to the login collaborator. Token handling only
/// needs to know whether a user still exists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::DatabaseError;

/// Stored login credentials
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: i64,
    pub password_hash: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the new user's ID
    ///
    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if the username is taken
    async fn create(&self, username: &str, password_hash: &str) -> Result<i64, DatabaseError>;

    async fn credentials(&self, username: &str) -> Result<Option<UserCredentials>, DatabaseError>;

    async fn exists(&self, user_id: i64) -> Result<bool, DatabaseError>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn create(&self, username: &str, password_hash: &str) -> Result<i64, DatabaseError> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(user_id)
    }

    async fn credentials(&self, username: &str) -> Result<Option<UserCredentials>, DatabaseError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, password_hash FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, password_hash)| UserCredentials {
            user_id,
            password_hash,
        }))
    }

    async fn exists(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    by_name: HashMap<String, UserCredentials>,
}

/// Process-local directory for tests and development
#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    table: Arc<Mutex<UserTable>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a user; refresh tokens are left in place
    pub async fn remove(&self, user_id: i64) {
        self.table
            .lock()
            .await
            .by_name
            .retain(|_, credentials| credentials.user_id != user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn create(&self, username: &str, password_hash: &str) -> Result<i64, DatabaseError> {
        let mut table = self.table.lock().await;
        if table.by_name.contains_key(username) {
            return Err(DatabaseError::UniqueConstraintViolation(format!(
                "username {}",
                username
            )));
        }
        table.next_id += 1;
        let user_id = table.next_id;
        table.by_name.insert(
            username.to_string(),
            UserCredentials {
                user_id,
                password_hash: password_hash.to_string(),
            },
        );
        Ok(user_id)
    }

    async fn credentials(&self, username: &str) -> Result<Option<UserCredentials>, DatabaseError> {
        Ok(self.table.lock().await.by_name.get(username).cloned())
    }

    async fn exists(&self, user_id: i64) -> Result<bool, DatabaseError> {
        Ok(self
            .table
            .lock()
            .await
            .by_name
            .values()
            .any(|credentials| credentials.user_id == user_id))
    }
}

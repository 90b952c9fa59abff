use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{RefreshTokenRepository, RepositoryTransaction};
use crate::auth::{ClientFingerprint, RefreshTokenRecord};
use crate::error::DatabaseError;

type RefreshTokenRow = (Uuid, String, i64, Uuid, String, String, DateTime<Utc>, DateTime<Utc>);

const SELECT_RECORD: &str = r#"
    SELECT id, token_hash, userId, keyPairId, userAgent, agentIp, issued_at, expires_at
    FROM refresh_tokens
    WHERE id = $1
"#;

const SELECT_RECORD_FOR_UPDATE: &str = r#"
    SELECT id, token_hash, userId, keyPairId, userAgent, agentIp, issued_at, expires_at
    FROM refresh_tokens
    WHERE id = $1
    FOR UPDATE
"#;

const INSERT_RECORD: &str = r#"
    INSERT INTO refresh_tokens (id, token_hash, userId, keyPairId, userAgent, agentIp, issued_at, expires_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

const DELETE_RECORD: &str = "DELETE FROM refresh_tokens WHERE id = $1";

fn into_record(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (token_id, secret_hash, user_id, key_pair_id, user_agent, ip, issued_at, expires_at) = row;
    RefreshTokenRecord {
        token_id,
        secret_hash,
        user_id,
        key_pair_id,
        fingerprint: ClientFingerprint { user_agent, ip },
        issued_at,
        expires_at,
    }
}

/// `refresh_tokens` table access over a Postgres pool
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DatabaseError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRepositoryTransaction { tx: Some(tx) }))
    }

    async fn lookup(&self, token_id: &Uuid) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(SELECT_RECORD)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(into_record))
    }

    async fn delete(&self, token_id: &Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(DELETE_RECORD)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Wraps a sqlx transaction, which rolls back when dropped uncommitted
struct PgRepositoryTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgRepositoryTransaction {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, DatabaseError> {
        self.tx.as_mut().ok_or_else(|| {
            DatabaseError::Transaction("transaction already committed".to_string())
        })
    }
}

#[async_trait]
impl RepositoryTransaction for PgRepositoryTransaction {
    async fn lookup_for_update(
        &mut self,
        token_id: &Uuid,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let tx = self.open()?;
        let row = sqlx::query_as::<_, RefreshTokenRow>(SELECT_RECORD_FOR_UPDATE)
            .bind(token_id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(row.map(into_record))
    }

    async fn insert(&mut self, record: &RefreshTokenRecord) -> Result<(), DatabaseError> {
        let tx = self.open()?;
        sqlx::query(INSERT_RECORD)
            .bind(record.token_id)
            .bind(&record.secret_hash)
            .bind(record.user_id)
            .bind(record.key_pair_id)
            .bind(&record.fingerprint.user_agent)
            .bind(&record.fingerprint.ip)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    async fn delete(&mut self, token_id: &Uuid) -> Result<bool, DatabaseError> {
        let tx = self.open()?;
        let result = sqlx::query(DELETE_RECORD)
            .bind(token_id)
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        let tx = self.tx.take().ok_or_else(|| {
            DatabaseError::Transaction("transaction already committed".to_string())
        })?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))
    }
}

/// Refresh token storage
///
/// `RefreshTokenStore` owns record minting and the replace-on-rotation rule.
/// Persistence sits behind `RefreshTokenRepository`, whose transactions are
/// the only concurrency control: a transaction that is dropped without
/// `commit` rolls back.

mod memory;
mod postgres;

pub use memory::InMemoryRefreshTokenRepository;
pub use postgres::PgRefreshTokenRepository;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::{
    generate_secret, ClientFingerprint, CompositeRefreshToken, RefreshTokenRecord, SecretHasher,
};
use crate::configuration::{JwtSettings, MIN_KEY_BYTES};
use crate::error::{ConfigError, DatabaseError, TokenError};

/// Durable backend for refresh token records
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DatabaseError>;

    async fn lookup(&self, token_id: &Uuid) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    /// Returns whether a record was removed
    async fn delete(&self, token_id: &Uuid) -> Result<bool, DatabaseError>;
}

/// A scoped unit of work; rolls back on drop unless committed
#[async_trait]
pub trait RepositoryTransaction: Send {
    /// Read a record and hold it against concurrent writers until the
    /// transaction ends
    async fn lookup_for_update(
        &mut self,
        token_id: &Uuid,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    async fn insert(&mut self, record: &RefreshTokenRecord) -> Result<(), DatabaseError>;

    /// Returns whether a record was removed
    async fn delete(&mut self, token_id: &Uuid) -> Result<bool, DatabaseError>;

    async fn commit(&mut self) -> Result<(), DatabaseError>;
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn RefreshTokenRepository>,
    hasher: SecretHasher,
    ttl: Duration,
    secret_length: usize,
}

impl RefreshTokenStore {
    pub fn new(
        repository: Arc<dyn RefreshTokenRepository>,
        hasher: SecretHasher,
        ttl_seconds: i64,
        secret_length: usize,
    ) -> Self {
        Self {
            repository,
            hasher,
            ttl: Duration::seconds(ttl_seconds),
            secret_length: secret_length.max(MIN_KEY_BYTES),
        }
    }

    pub fn from_settings(
        repository: Arc<dyn RefreshTokenRepository>,
        config: &JwtSettings,
    ) -> Result<Self, ConfigError> {
        let hasher = SecretHasher::new(config.refresh_hash_key.as_bytes())?;
        Ok(Self::new(
            repository,
            hasher,
            config.refresh_token_expiry,
            config.refresh_secret_length,
        ))
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, TokenError> {
        Ok(self.repository.begin().await?)
    }

    /// Build a fresh record and the plaintext token handed to the client
    ///
    /// # Errors
    /// Returns `TokenError::Internal` if the entropy source fails
    pub fn mint(
        &self,
        user_id: i64,
        key_pair_id: Uuid,
        fingerprint: ClientFingerprint,
    ) -> Result<(RefreshTokenRecord, CompositeRefreshToken), TokenError> {
        let secret = generate_secret(self.secret_length)?;
        let token_id = Uuid::new_v4();
        let issued_at = Utc::now();

        let record = RefreshTokenRecord {
            token_id,
            secret_hash: self.hasher.hash(&secret),
            user_id,
            key_pair_id,
            fingerprint,
            issued_at,
            expires_at: issued_at + self.ttl,
        };

        Ok((record, CompositeRefreshToken::new(token_id, secret)))
    }

    /// Mint and insert a record inside the caller's transaction
    pub async fn create_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        user_id: i64,
        key_pair_id: Uuid,
        fingerprint: ClientFingerprint,
    ) -> Result<CompositeRefreshToken, TokenError> {
        let (record, token) = self.mint(user_id, key_pair_id, fingerprint)?;
        tx.insert(&record).await?;
        Ok(token)
    }

    /// Mint and persist a record in its own transaction
    pub async fn create(
        &self,
        user_id: i64,
        key_pair_id: Uuid,
        fingerprint: ClientFingerprint,
    ) -> Result<CompositeRefreshToken, TokenError> {
        let mut tx = self.begin().await?;
        let token = self
            .create_in(tx.as_mut(), user_id, key_pair_id, fingerprint)
            .await?;
        tx.commit().await?;
        Ok(token)
    }

    /// # Errors
    /// Returns `TokenError::NotFound` if no record exists under `token_id`
    pub async fn lookup(&self, token_id: &Uuid) -> Result<RefreshTokenRecord, TokenError> {
        self.repository
            .lookup(token_id)
            .await?
            .ok_or(TokenError::NotFound)
    }

    /// Idempotent: deleting an absent record succeeds
    pub async fn delete(&self, token_id: &Uuid) -> Result<(), TokenError> {
        let removed = self.repository.delete(token_id).await?;
        if !removed {
            tracing::debug!(token_id = %token_id, "Refresh token already absent");
        }
        Ok(())
    }

    /// Delete `old_token_id` and insert `new_record` within `tx`
    ///
    /// # Errors
    /// Returns `TokenError::NotFound` if the old record is already gone; the
    /// caller must then drop `tx` so nothing is inserted
    pub async fn replace_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        old_token_id: &Uuid,
        new_record: &RefreshTokenRecord,
    ) -> Result<(), TokenError> {
        if !tx.delete(old_token_id).await? {
            return Err(TokenError::NotFound);
        }
        tx.insert(new_record).await?;
        Ok(())
    }

    /// `replace_in` as one committed unit
    pub async fn replace_atomically(
        &self,
        old_token_id: &Uuid,
        new_record: &RefreshTokenRecord,
    ) -> Result<(), TokenError> {
        let mut tx = self.begin().await?;
        self.replace_in(tx.as_mut(), old_token_id, new_record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Constant-time check of a presented secret against `record`
    pub fn secret_matches(&self, record: &RefreshTokenRecord, presented: &CompositeRefreshToken) -> bool {
        self.hasher.verify(presented.secret(), &record.secret_hash)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{RefreshTokenRepository, RepositoryTransaction};
use crate::auth::RefreshTokenRecord;
use crate::error::DatabaseError;

type Records = HashMap<Uuid, RefreshTokenRecord>;

/// Process-local repository for tests and single-node development
///
/// A transaction holds the table lock for its whole lifetime and works on a
/// copy, so transactions are serializable and a dropped one leaves no trace.
#[derive(Clone, Default)]
pub struct InMemoryRefreshTokenRepository {
    records: Arc<Mutex<Records>>,
}

impl InMemoryRefreshTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenRepository {
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DatabaseError> {
        let guard = self.records.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard: Some(guard),
            working,
        }))
    }

    async fn lookup(&self, token_id: &Uuid) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        Ok(self.records.lock().await.get(token_id).cloned())
    }

    async fn delete(&self, token_id: &Uuid) -> Result<bool, DatabaseError> {
        Ok(self.records.lock().await.remove(token_id).is_some())
    }
}

struct InMemoryTransaction {
    guard: Option<OwnedMutexGuard<Records>>,
    working: Records,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.guard.is_none() {
            return Err(DatabaseError::Transaction(
                "transaction already committed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryTransaction for InMemoryTransaction {
    async fn lookup_for_update(
        &mut self,
        token_id: &Uuid,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        self.ensure_open()?;
        Ok(self.working.get(token_id).cloned())
    }

    async fn insert(&mut self, record: &RefreshTokenRecord) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        if self.working.contains_key(&record.token_id) {
            return Err(DatabaseError::UniqueConstraintViolation(format!(
                "refresh token {}",
                record.token_id
            )));
        }
        self.working.insert(record.token_id, record.clone());
        Ok(())
    }

    async fn delete(&mut self, token_id: &Uuid) -> Result<bool, DatabaseError> {
        self.ensure_open()?;
        Ok(self.working.remove(token_id).is_some())
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        let mut guard = self.guard.take().ok_or_else(|| {
            DatabaseError::Transaction("transaction already committed".to_string())
        })?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}

/// Token rotation
///
/// A refresh record is ISSUED at login or rotation and leaves that state in
/// one of three ways:
/// - ROTATED: consumed and replaced by a new record in the same transaction
/// - REJECTED: identity checks failed, record left untouched
/// - REVOKED: secret mismatch or expiry, record deleted
///
/// Every read and write of one rotation runs in a single store transaction.
/// The presented record is locked on read, so of two concurrent rotations
/// of the same token only one can find it.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::jwt::{ExpiryPolicy, TokenSigner};
use crate::auth::refresh_token::{ClientFingerprint, CompositeRefreshToken};
use crate::configuration::JwtSettings;
use crate::error::{ConfigError, TokenError};
use crate::notifier::AnomalyNotifier;
use crate::store::{RefreshTokenRepository, RefreshTokenStore};
use crate::users::UserDirectory;

/// Access token plus its paired refresh token
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: CompositeRefreshToken,
    pub key_pair_id: Uuid,
}

#[derive(Clone)]
pub struct RotationProtocol {
    signer: TokenSigner,
    store: RefreshTokenStore,
    users: Arc<dyn UserDirectory>,
    notifier: AnomalyNotifier,
}

impl RotationProtocol {
    pub fn new(
        signer: TokenSigner,
        store: RefreshTokenStore,
        users: Arc<dyn UserDirectory>,
        notifier: AnomalyNotifier,
    ) -> Self {
        Self {
            signer,
            store,
            users,
            notifier,
        }
    }

    pub fn from_settings(
        config: &JwtSettings,
        repository: Arc<dyn RefreshTokenRepository>,
        users: Arc<dyn UserDirectory>,
        notifier: AnomalyNotifier,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            TokenSigner::from_settings(config),
            RefreshTokenStore::from_settings(repository, config)?,
            users,
            notifier,
        ))
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn store(&self) -> &RefreshTokenStore {
        &self.store
    }

    /// Start a new issuance cycle for an authenticated user
    pub async fn issue_initial(
        &self,
        user_id: i64,
        fingerprint: &ClientFingerprint,
    ) -> Result<TokenPair, TokenError> {
        let key_pair_id = Uuid::new_v4();
        let access_token = self.signer.issue(user_id, key_pair_id)?;
        let refresh_token = self
            .store
            .create(user_id, key_pair_id, fingerprint.clone())
            .await?;

        tracing::info!(
            user_id = user_id,
            token_id = %refresh_token.token_id,
            "Token pair issued"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            key_pair_id,
        })
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The access token only binds identity here: an expired but correctly
    /// signed access token is accepted, since that is when refresh is needed.
    ///
    /// # Errors
    /// - `MalformedInput`, `SignatureInvalid` before the store is touched
    /// - `NotFound` if the record is absent (never issued, rotated, logged out)
    /// - `IdentityMismatch` on user, cycle, or user-agent mismatch; record kept
    /// - `Revoked` on secret mismatch; record deleted
    /// - `Expired` if the record is past its expiry; record deleted
    /// - `StorageFailure` if the transaction fails; nothing is changed
    pub async fn rotate(
        &self,
        presented_access_token: &str,
        presented_refresh_token: &str,
        fingerprint: &ClientFingerprint,
    ) -> Result<TokenPair, TokenError> {
        let presented = CompositeRefreshToken::parse(presented_refresh_token)?;
        let claims = self
            .signer
            .verify(presented_access_token, ExpiryPolicy::IgnoreExpiry)?;

        let mut tx = self.store.begin().await?;

        let record = match tx.lookup_for_update(&presented.token_id).await? {
            Some(record) => record,
            None => {
                tracing::warn!(
                    user_id = claims.uid,
                    token_id = %presented.token_id,
                    "Unknown or consumed refresh token presented"
                );
                return Err(TokenError::NotFound);
            }
        };

        if record.user_id != claims.uid || record.key_pair_id != claims.kpid {
            tracing::warn!(
                user_id = claims.uid,
                token_id = %record.token_id,
                "Access token does not belong to this refresh token"
            );
            return Err(TokenError::IdentityMismatch);
        }

        if record.fingerprint.user_agent != fingerprint.user_agent {
            tracing::warn!(
                user_id = record.user_id,
                token_id = %record.token_id,
                "Refresh token presented by a different user agent"
            );
            return Err(TokenError::IdentityMismatch);
        }

        if record.fingerprint.ip != fingerprint.ip {
            self.notifier.notify(record.user_id, &fingerprint.ip);
        }

        if !self.store.secret_matches(&record, &presented) {
            tx.delete(&record.token_id).await?;
            tx.commit().await?;
            tracing::warn!(
                user_id = record.user_id,
                token_id = %record.token_id,
                "Refresh secret mismatch, token revoked"
            );
            return Err(TokenError::Revoked);
        }

        if record.is_expired_at(Utc::now()) {
            tx.delete(&record.token_id).await?;
            tx.commit().await?;
            tracing::info!(
                user_id = record.user_id,
                token_id = %record.token_id,
                "Expired refresh token removed"
            );
            return Err(TokenError::Expired);
        }

        let key_pair_id = Uuid::new_v4();
        let (new_record, refresh_token) =
            self.store
                .mint(record.user_id, key_pair_id, fingerprint.clone())?;
        self.store
            .replace_in(tx.as_mut(), &record.token_id, &new_record)
            .await?;
        let access_token = self.signer.issue(record.user_id, key_pair_id)?;
        tx.commit().await?;

        tracing::info!(
            user_id = record.user_id,
            old_token_id = %record.token_id,
            token_id = %new_record.token_id,
            "Refresh token rotated"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            key_pair_id,
        })
    }

    /// Delete the record named by `refresh_token`; repeat calls succeed
    ///
    /// # Errors
    /// `MalformedInput` if no token ID can be read; `StorageFailure`
    pub async fn logout(&self, refresh_token: &str) -> Result<(), TokenError> {
        let token_id = CompositeRefreshToken::parse_token_id(refresh_token)?;
        self.store.delete(&token_id).await?;
        tracing::info!(token_id = %token_id, "Refresh token logged out");
        Ok(())
    }

    /// Authorize direct API access; returns the user ID
    ///
    /// # Errors
    /// Any `verify` failure with expiry enforced, or `NotFound` if the user
    /// no longer exists
    pub async fn access_check(&self, access_token: &str) -> Result<i64, TokenError> {
        let claims = self.signer.verify(access_token, ExpiryPolicy::Enforce)?;
        if !self.users.exists(claims.uid).await? {
            tracing::warn!(user_id = claims.uid, "Access token for unknown user");
            return Err(TokenError::NotFound);
        }
        Ok(claims.uid)
    }
}

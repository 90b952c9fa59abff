/// Refresh Token Primitives
///
/// Refresh tokens are handed to clients as `<token-id>:<base64-secret>`.
/// - The token ID is a random UUID naming the stored record
/// - The secret is at least 32 random bytes from the OS entropy source
/// - Only a keyed HMAC-SHA256 of the secret is ever stored
/// - Each token is single-use: rotation deletes the record it consumed

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{ConfigError, TokenError};

type HmacSha256 = Hmac<Sha256>;

/// Client identity captured when a refresh token is issued or rotated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint {
    pub user_agent: String,
    pub ip: String,
}

impl ClientFingerprint {
    pub fn new(user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip: ip.into(),
        }
    }
}

/// Persisted refresh token; holds the secret hash, never the secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    pub secret_hash: String,
    pub user_id: i64,
    pub key_pair_id: Uuid,
    pub fingerprint: ClientFingerprint,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// The `<token-id>:<secret>` value exchanged with clients
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeRefreshToken {
    pub token_id: Uuid,
    secret: Vec<u8>,
}

impl CompositeRefreshToken {
    pub fn new(token_id: Uuid, secret: Vec<u8>) -> Self {
        Self { token_id, secret }
    }

    /// Split and decode the client-supplied text
    ///
    /// # Errors
    /// Returns `MalformedInput` unless the value is exactly one UUID and one
    /// non-empty base64 secret separated by a single `:`
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        let mut parts = value.split(':');
        let (token_id, secret) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(secret), None) if !id.is_empty() && !secret.is_empty() => {
                (id, secret)
            }
            _ => return Err(TokenError::MalformedInput),
        };

        let token_id = Uuid::parse_str(token_id).map_err(|_| TokenError::MalformedInput)?;
        let secret = STANDARD
            .decode(secret)
            .map_err(|_| TokenError::MalformedInput)?;

        Ok(Self { token_id, secret })
    }

    /// Only the identifier, for logout where the secret is not checked
    pub fn parse_token_id(value: &str) -> Result<Uuid, TokenError> {
        let token_id = value
            .split_once(':')
            .map(|(id, _)| id)
            .ok_or(TokenError::MalformedInput)?;
        Uuid::parse_str(token_id).map_err(|_| TokenError::MalformedInput)
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Display for CompositeRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token_id, STANDARD.encode(&self.secret))
    }
}

// Never print the secret
impl fmt::Debug for CompositeRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRefreshToken")
            .field("token_id", &self.token_id)
            .finish_non_exhaustive()
    }
}

/// Keyed hash for refresh secrets
///
/// Secrets are high-entropy random values, so a fast keyed MAC is enough;
/// bcrypt stays reserved for user passwords.
#[derive(Clone)]
pub struct SecretHasher {
    keyed: HmacSha256,
}

impl SecretHasher {
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the MAC rejects the key
    pub fn new(key: &[u8]) -> Result<Self, ConfigError> {
        let keyed = HmacSha256::new_from_slice(key)
            .map_err(|_| ConfigError::InvalidValue("refresh hash key".to_string()))?;
        Ok(Self { keyed })
    }

    /// Hex-encoded HMAC-SHA256 of `secret`
    pub fn hash(&self, secret: &[u8]) -> String {
        let mut mac = self.keyed.clone();
        mac.update(secret);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison of `secret` against a stored hash
    pub fn verify(&self, secret: &[u8], stored_hash: &str) -> bool {
        let expected = match hex::decode(stored_hash) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let mut mac = self.keyed.clone();
        mac.update(secret);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Fill `length` bytes from the OS entropy source
///
/// # Errors
/// Returns `TokenError::Internal` if the entropy source fails; only the
/// calling request is affected
pub fn generate_secret(length: usize) -> Result<Vec<u8>, TokenError> {
    let mut secret = vec![0u8; length];
    OsRng.try_fill_bytes(&mut secret).map_err(|e| {
        tracing::error!("Entropy source failure: {}", e);
        TokenError::Internal("entropy source unavailable".to_string())
    })?;
    Ok(secret)
}

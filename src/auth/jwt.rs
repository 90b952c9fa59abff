/// Access Token Signing and Verification
///
/// Access tokens are stateless HS512 JWTs. They are never persisted and
/// cannot be revoked before they expire.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::AccessClaims;
use crate::configuration::JwtSettings;
use crate::error::TokenError;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// How `verify` treats the `exp` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Direct API access: expired tokens are rejected
    Enforce,
    /// Identity binding during refresh: signature and shape only
    IgnoreExpiry,
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_seconds: i64,
}

impl TokenSigner {
    pub fn new(secret: &[u8], access_ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_seconds,
        }
    }

    pub fn from_settings(config: &JwtSettings) -> Self {
        Self::new(config.secret.as_bytes(), config.access_token_expiry)
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    /// Sign a new access token for `user_id` in issuance cycle `key_pair_id`
    ///
    /// # Errors
    /// Returns `TokenError::Internal` if encoding fails
    pub fn issue(&self, user_id: i64, key_pair_id: Uuid) -> Result<String, TokenError> {
        let claims = AccessClaims::new(user_id, key_pair_id, self.access_ttl_seconds);

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature, algorithm and claim shape, and extract the claims
    ///
    /// # Errors
    /// - `MalformedInput` if the token cannot be decoded
    /// - `SignatureInvalid` on a bad signature or any algorithm other than HS512
    /// - `Expired` if `policy` is `Enforce` and the token is past `exp`
    pub fn verify(&self, token: &str, policy: ExpiryPolicy) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = policy == ExpiryPolicy::Enforce;

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature
                    | ErrorKind::InvalidAlgorithm
                    | ErrorKind::InvalidAlgorithmName => TokenError::SignatureInvalid,
                    _ => TokenError::MalformedInput,
                }
            })
    }
}

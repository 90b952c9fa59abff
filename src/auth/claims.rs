/// Access token claims
///
/// One flat record with exactly four fields. Nothing else in the payload is
/// accepted, so there are no implicitly trusted registered claims.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccessClaims {
    /// Subject user ID
    pub uid: i64,
    /// Issuance cycle shared with the paired refresh token
    pub kpid: Uuid,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl AccessClaims {
    /// Claims for `user_id` valid for `expiry_seconds` from now
    pub fn new(user_id: i64, key_pair_id: Uuid, expiry_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            uid: user_id,
            kpid: key_pair_id,
            iat: now,
            exp: now + expiry_seconds,
        }
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.exp
    }
}

/// Authentication module
///
/// Access token signing, refresh token primitives, the rotation protocol,
/// and password hashing for the login collaborator.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod rotation;

pub use claims::AccessClaims;
pub use jwt::{ExpiryPolicy, TokenSigner};
pub use password::{hash_password, validate_username, verify_password};
pub use refresh_token::{
    generate_secret, ClientFingerprint, CompositeRefreshToken, RefreshTokenRecord, SecretHasher,
};
pub use rotation::{RotationProtocol, TokenPair};

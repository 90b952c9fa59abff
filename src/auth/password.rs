/// Password Hashing for the login collaborator
///
/// Passwords use bcrypt. Refresh secrets do not come through here.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
// bcrypt only reads the first 72 bytes
const MAX_PASSWORD_LENGTH: usize = 72;
const MAX_USERNAME_LENGTH: usize = 64;

/// Hash a password after checking strength rules
///
/// # Errors
/// - Validation error if the password is too short, too long, or too weak
/// - Internal error if bcrypt fails
pub fn hash_password(password: &str) -> Result<String, AppError> {
    validate_password_strength(password)?;

    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against its stored bcrypt hash
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    verify(password, password_hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Trim and check a username
pub fn validate_username(username: &str) -> Result<String, ValidationError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong(
            "username".to_string(),
            MAX_USERNAME_LENGTH,
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }
    Ok(username.to_string())
}

/// Requirements:
/// - 8 to 72 bytes
/// - At least one digit, one lowercase and one uppercase letter
fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        ));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        ));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}

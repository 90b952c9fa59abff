/// Error Handling Module
///
/// Errors are layered the same way the request flows:
/// 1. Domain errors (token lifecycle, storage, validation, configuration)
/// 2. A unified application error used by the HTTP layer
/// 3. HTTP response mapping with structured logging
///
/// Token validation failures keep their distinct kind for logging, but the
/// HTTP layer collapses all of them into one "invalid credentials" outcome.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Failure kinds of the token lifecycle
#[derive(Debug)]
pub enum TokenError {
    /// Token text could not be parsed
    MalformedInput,
    /// Signature or algorithm check failed
    SignatureInvalid,
    /// Token or refresh record is past its expiry
    Expired,
    /// No refresh record under the presented identifier
    NotFound,
    /// Presented access token or client does not match the refresh record
    IdentityMismatch,
    /// Refresh secret did not match; the record has been burned
    Revoked,
    /// The backing store failed (transaction, commit, connection)
    StorageFailure(DatabaseError),
    /// Entropy or signing failure local to this request
    Internal(String),
}

impl TokenError {
    /// Stable name of the failure kind, for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::MalformedInput => "malformed_input",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::Expired => "expired",
            TokenError::NotFound => "not_found",
            TokenError::IdentityMismatch => "identity_mismatch",
            TokenError::Revoked => "revoked",
            TokenError::StorageFailure(_) => "storage_failure",
            TokenError::Internal(_) => "internal",
        }
    }

    /// True for every kind that must surface as "invalid credentials"
    pub fn is_credential_failure(&self) -> bool {
        !matches!(self, TokenError::StorageFailure(_) | TokenError::Internal(_))
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::MalformedInput => write!(f, "Malformed token"),
            TokenError::SignatureInvalid => write!(f, "Invalid token signature"),
            TokenError::Expired => write!(f, "Token has expired"),
            TokenError::NotFound => write!(f, "Refresh token not found"),
            TokenError::IdentityMismatch => write!(f, "Token identity mismatch"),
            TokenError::Revoked => write!(f, "Refresh token revoked"),
            TokenError::StorageFailure(e) => write!(f, "Token storage failure: {}", e),
            TokenError::Internal(msg) => write!(f, "Token processing failure: {}", msg),
        }
    }
}

impl StdError for TokenError {}

impl From<DatabaseError> for TokenError {
    fn from(err: DatabaseError) -> Self {
        TokenError::StorageFailure(err)
    }
}

/// Validation errors for input data
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
        }
    }
}

impl StdError for ValidationError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    UniqueConstraintViolation(String),
    QueryExecution(String),
    ConnectionPool(String),
    Transaction(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(msg) => {
                write!(f, "Duplicate entry: {}", msg)
            }
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        let unique_violation = err
            .as_database_error()
            .and_then(|e| e.code())
            .map(|code| code == "23505")
            .unwrap_or(false);

        if unique_violation {
            return DatabaseError::UniqueConstraintViolation(err.to_string());
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionPool(err.to_string())
            }
            other => DatabaseError::QueryExecution(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Login and request-level authentication errors
#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    MissingToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::MissingToken => write!(f, "Missing authentication token"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Token(TokenError),
    Auth(AuthError),
    Database(DatabaseError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Token(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Token(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with server logs
    pub error_id: String,
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

const INVALID_CREDENTIALS: (StatusCode, &str, &str) = (
    StatusCode::UNAUTHORIZED,
    "INVALID_CREDENTIALS",
    "Invalid credentials",
);

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),

            // One outcome for every credential failure; the kind is only logged
            AppError::Token(e) if e.is_credential_failure() => (
                INVALID_CREDENTIALS.0,
                INVALID_CREDENTIALS.1,
                INVALID_CREDENTIALS.2.to_string(),
            ),
            AppError::Auth(AuthError::InvalidCredentials) => (
                INVALID_CREDENTIALS.0,
                INVALID_CREDENTIALS.1,
                INVALID_CREDENTIALS.2.to_string(),
            ),
            AppError::Auth(AuthError::MissingToken) => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "Missing authentication token".to_string(),
            ),

            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => (
                StatusCode::CONFLICT,
                "DUPLICATE_ENTRY",
                "Username already registered".to_string(),
            ),
            AppError::Database(DatabaseError::ConnectionPool(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Database service temporarily unavailable".to_string(),
            ),

            AppError::Token(_) | AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        }
    }

    pub fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Token(e) if e.is_credential_failure() => {
                tracing::warn!(
                    request_id = request_id,
                    kind = e.kind(),
                    error = %e,
                    "Credential rejected"
                );
            }
            AppError::Token(e) => {
                tracing::error!(
                    request_id = request_id,
                    kind = e.kind(),
                    error = %e,
                    "Token processing failed"
                );
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Database(e) => {
                tracing::error!(request_id = request_id, error = %e, "Database error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, code, message) = self.classify();
        let body = ErrorResponse::new(request_id, message, code.to_string(), status.as_u16());

        HttpResponse::build(status).json(body)
    }

    fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

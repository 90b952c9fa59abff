use crate::error::ConfigError;

/// Smallest accepted key or secret length, in bytes
pub const MIN_KEY_BYTES: usize = 32;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    pub webhook: WebhookSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Token issuance settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    /// HMAC key for access tokens
    pub secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    /// Random bytes in each refresh secret
    pub refresh_secret_length: usize,
    /// Key for hashing refresh secrets at rest
    pub refresh_hash_key: String,
}

impl JwtSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if self.secret.len() < MIN_KEY_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_KEY_BYTES
            )));
        }
        if self.refresh_hash_key.len() < MIN_KEY_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_hash_key must be at least {} bytes",
                MIN_KEY_BYTES
            )));
        }
        if self.refresh_secret_length < MIN_KEY_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_secret_length must be at least {}",
                MIN_KEY_BYTES
            )));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Anomaly alert delivery
#[derive(serde::Deserialize, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub queue_capacity: usize,
    pub timeout_seconds: u64,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.webhook.url.is_empty() {
            return Err(ConfigError::MissingRequired("webhook.url".to_string()));
        }
        if self.webhook.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "webhook.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads `configuration.yaml` (optional), then `APP_*` environment overrides,
/// e.g. `APP_JWT__SECRET`.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}

use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use token_rotation::auth::RotationProtocol;
use token_rotation::configuration::get_configuration;
use token_rotation::notifier::{spawn_webhook_worker, AnomalyNotifier, WebhookClient};
use token_rotation::startup::run;
use token_rotation::store::PgRefreshTokenRepository;
use token_rotation::telemetry::init_telemetry;
use token_rotation::users::PgUserDirectory;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    configuration.validate().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    tracing::info!("Configuration loaded successfully");

    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to migrate the database: {}", e);
        startup_error(std::io::ErrorKind::Other, "Database migration error")
    })?;
    tracing::info!("Database connection pool ready");

    let webhook_client = WebhookClient::from_settings(&configuration.webhook).map_err(|e| {
        tracing::error!("Failed to build webhook client: {}", e);
        startup_error(std::io::ErrorKind::Other, "Webhook client error")
    })?;
    let (notifier, alerts) = AnomalyNotifier::channel(configuration.webhook.queue_capacity);
    spawn_webhook_worker(alerts, webhook_client);

    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let protocol = RotationProtocol::from_settings(
        &configuration.jwt,
        Arc::new(PgRefreshTokenRepository::new(pool)),
        users.clone(),
        notifier,
    )
    .map_err(|e| {
        tracing::error!("Invalid token configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, Arc::new(protocol), users)?.await
}

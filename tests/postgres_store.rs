//! Rotation against a real Postgres database
//!
//! Run with `cargo test -- --ignored` once the database from
//! `configuration.yaml` is reachable.

use std::sync::Arc;

use sqlx::{Connection, Executor, PgConnection, PgPool, Row};
use token_rotation::auth::{ClientFingerprint, RotationProtocol};
use token_rotation::configuration::{get_configuration, DatabaseSettings};
use token_rotation::error::TokenError;
use token_rotation::notifier::AnomalyNotifier;
use token_rotation::store::PgRefreshTokenRepository;
use token_rotation::users::{PgUserDirectory, UserDirectory};

pub struct TestDatabase {
    pub pool: PgPool,
    pub protocol: Arc<RotationProtocol>,
    pub user_id: i64,
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn spawn_database() -> TestDatabase {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    let pool = configure_database(&configuration.database).await;

    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let user_id = users
        .create("alice", "not-a-real-hash")
        .await
        .expect("Failed to create user");

    let (notifier, _alerts) = AnomalyNotifier::channel(8);
    let protocol = RotationProtocol::from_settings(
        &configuration.jwt,
        Arc::new(PgRefreshTokenRepository::new(pool.clone())),
        users,
        notifier,
    )
    .expect("Failed to build rotation protocol");

    TestDatabase {
        pool,
        protocol: Arc::new(protocol),
        user_id,
    }
}

async fn stored_tokens(pool: &PgPool, user_id: i64) -> i64 {
    sqlx::query("SELECT COUNT(*) FROM refresh_tokens WHERE userId = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count refresh tokens")
        .get::<i64, _>(0)
}

fn fingerprint() -> ClientFingerprint {
    ClientFingerprint::new("Mozilla/5.0", "192.0.2.10")
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn rotation_replaces_the_stored_row() {
    let db = spawn_database().await;
    let pair = db.protocol.issue_initial(db.user_id, &fingerprint()).await.unwrap();
    assert_eq!(stored_tokens(&db.pool, db.user_id).await, 1);

    let rotated = db
        .protocol
        .rotate(&pair.access_token, &pair.refresh_token.to_string(), &fingerprint())
        .await
        .expect("Rotation should succeed");

    assert_eq!(stored_tokens(&db.pool, db.user_id).await, 1);
    assert!(db.protocol.store().lookup(&rotated.refresh_token.token_id).await.is_ok());
    assert!(matches!(
        db.protocol.store().lookup(&pair.refresh_token.token_id).await,
        Err(TokenError::NotFound)
    ));

    let stored_hash: String = sqlx::query("SELECT token_hash FROM refresh_tokens WHERE id = $1")
        .bind(rotated.refresh_token.token_id)
        .fetch_one(&db.pool)
        .await
        .unwrap()
        .get(0);
    assert!(!stored_hash.contains(&rotated.refresh_token.to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Postgres instance"]
async fn concurrent_rotations_serialize_on_the_row_lock() {
    let db = spawn_database().await;
    let pair = db.protocol.issue_initial(db.user_id, &fingerprint()).await.unwrap();
    let presented = pair.refresh_token.to_string();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let protocol = db.protocol.clone();
        let access_token = pair.access_token.clone();
        let refresh_token = presented.clone();
        handles.push(tokio::spawn(async move {
            protocol
                .rotate(&access_token, &refresh_token, &fingerprint())
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(TokenError::NotFound) => {}
            Err(other) => panic!("Unexpected failure kind: {:?}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(stored_tokens(&db.pool, db.user_id).await, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn rejected_identity_leaves_row_in_place() {
    let db = spawn_database().await;
    let pair = db.protocol.issue_initial(db.user_id, &fingerprint()).await.unwrap();

    let result = db
        .protocol
        .rotate(
            &pair.access_token,
            &pair.refresh_token.to_string(),
            &ClientFingerprint::new("curl/8.0", "192.0.2.10"),
        )
        .await;

    assert!(matches!(result, Err(TokenError::IdentityMismatch)));
    assert_eq!(stored_tokens(&db.pool, db.user_id).await, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn logout_deletes_the_row() {
    let db = spawn_database().await;
    let pair = db.protocol.issue_initial(db.user_id, &fingerprint()).await.unwrap();

    db.protocol.logout(&pair.refresh_token.to_string()).await.unwrap();
    db.protocol.logout(&pair.refresh_token.to_string()).await.unwrap();

    assert_eq!(stored_tokens(&db.pool, db.user_id).await, 0);
}

use std::net::TcpListener;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use token_rotation::auth::RotationProtocol;
use token_rotation::configuration::JwtSettings;
use token_rotation::notifier::{AnomalyEvent, AnomalyNotifier};
use token_rotation::startup::run;
use token_rotation::store::InMemoryRefreshTokenRepository;
use token_rotation::users::InMemoryUserDirectory;

const USER_AGENT: &str = "integration-test/1.0";
const PASSWORD: &str = "SecurePass123";

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub repository: InMemoryRefreshTokenRepository,
    pub _alerts: mpsc::Receiver<AnomalyEvent>,
}

/// Tokens handed out by login or refresh
pub struct Session {
    pub access_token: String,
    pub refresh_cookie: String,
}

fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "test-secret-key-at-least-32-characters-long".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 3600,
        refresh_secret_length: 32,
        refresh_hash_key: "test-hash-key-at-least-32-characters-long".to_string(),
    }
}

fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let repository = InMemoryRefreshTokenRepository::new();
    let users = Arc::new(InMemoryUserDirectory::new());
    let (notifier, alerts) = AnomalyNotifier::channel(16);
    let protocol = RotationProtocol::from_settings(
        &jwt_settings(),
        Arc::new(repository.clone()),
        users.clone(),
        notifier,
    )
    .expect("Failed to build rotation protocol");

    let server = run(listener, Arc::new(protocol), users).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .expect("Failed to build client");

    TestApp {
        address,
        client,
        repository,
        _alerts: alerts,
    }
}

/// Value of the `refresh_token` cookie set by the response, if any
fn refresh_cookie_value(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("refresh_token="))
        .map(|value| {
            let pair = value.split(';').next().unwrap_or_default();
            pair.trim_start_matches("refresh_token=").to_string()
        })
}

fn set_cookie_header(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

impl TestApp {
    async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/register", self.address))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/login", self.address))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn refresh(&self, session: &Session) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/refresh", self.address))
            .bearer_auth(&session.access_token)
            .header("Cookie", format!("refresh_token={}", session.refresh_cookie))
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn logout(&self, refresh_cookie: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/logout", self.address))
            .header("Cookie", format!("refresh_token={}", refresh_cookie))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Register and log in a fresh user
    async fn signed_in(&self, username: &str) -> Session {
        self.register(username, PASSWORD).await;
        let response = self.login(username, PASSWORD).await;
        assert_eq!(200, response.status().as_u16());
        session_from(response).await
    }
}

async fn session_from(response: reqwest::Response) -> Session {
    let refresh_cookie = refresh_cookie_value(&response).expect("Missing refresh cookie");
    let body: Value = response.json().await.expect("Failed to parse response");
    Session {
        access_token: body["access_token"].as_str().unwrap().to_string(),
        refresh_cookie,
    }
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_for_valid_credentials() {
    let app = spawn_app();

    let response = app.register("alice", PASSWORD).await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["user_id"].as_i64().is_some());
}

#[tokio::test]
async fn register_returns_409_for_duplicate_username() {
    let app = spawn_app();
    app.register("alice", PASSWORD).await;

    let response = app.register("alice", "AnotherPass456").await;

    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
}

#[tokio::test]
async fn register_returns_400_for_invalid_input() {
    let app = spawn_app();
    let test_cases = vec![
        (json!({ "username": "alice", "password": "short" }), "password too short"),
        (json!({ "username": "alice", "password": "alllowercase1" }), "no uppercase"),
        (json!({ "username": "", "password": PASSWORD }), "empty username"),
        (json!({ "username": "bad name!", "password": PASSWORD }), "invalid characters"),
        (json!({ "username": "alice" }), "missing password"),
    ];

    for (body, description) in test_cases {
        let response = app
            .client
            .post(&format!("{}/auth/register", app.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");

        assert_eq!(
            400,
            response.status().as_u16(),
            "Expected 400 for: {}",
            description
        );
    }
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_tokens_and_hardened_cookie() {
    let app = spawn_app();
    app.register("alice", PASSWORD).await;

    let response = app.login("alice", PASSWORD).await;

    assert_eq!(200, response.status().as_u16());

    let cookie = set_cookie_header(&response);
    assert!(cookie.starts_with("refresh_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Strict"));

    let authorization = response
        .headers()
        .get(reqwest::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(authorization.starts_with("Bearer "));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(authorization, format!("Bearer {}", body["access_token"].as_str().unwrap()));
    assert_eq!(app.repository.len().await, 1);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.register("alice", PASSWORD).await;

    let wrong_password = app.login("alice", "WrongPass999").await;
    let unknown_user = app.login("mallory", PASSWORD).await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_user.status().as_u16());

    let first: Value = wrong_password.json().await.unwrap();
    let second: Value = unknown_user.json().await.unwrap();
    assert_eq!(first["code"], "INVALID_CREDENTIALS");
    assert_eq!(first["code"], second["code"]);
    assert_eq!(first["message"], second["message"]);
}

// --- Protected Route Tests ---

#[tokio::test]
async fn me_returns_current_user_with_valid_token() {
    let app = spawn_app();
    let session = app.signed_in("alice").await;

    let response = app
        .client
        .get(&format!("{}/auth/me", app.address))
        .bearer_auth(&session.access_token)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["user_id"].as_i64().is_some());
}

#[tokio::test]
async fn me_rejects_missing_or_invalid_token() {
    let app = spawn_app();

    let missing = app
        .client
        .get(&format!("{}/auth/me", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, missing.status().as_u16());
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "MISSING_TOKEN");

    let invalid = app
        .client
        .get(&format!("{}/auth/me", app.address))
        .bearer_auth("not.a.jwt")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, invalid.status().as_u16());
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
}

// --- Refresh Tests ---

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() {
    let app = spawn_app();
    let first = app.signed_in("alice").await;

    let response = app.refresh(&first).await;
    assert_eq!(200, response.status().as_u16());
    let second = session_from(response).await;
    assert_ne!(second.refresh_cookie, first.refresh_cookie);
    assert_ne!(second.access_token, first.access_token);

    let replay = app.refresh(&first).await;
    assert_eq!(401, replay.status().as_u16());
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_CREDENTIALS");

    // The rotated pair keeps working
    let response = app.refresh(&second).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_requires_both_tokens() {
    let app = spawn_app();
    let session = app.signed_in("alice").await;

    let without_cookie = app
        .client
        .post(&format!("{}/auth/refresh", app.address))
        .bearer_auth(&session.access_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, without_cookie.status().as_u16());

    let without_bearer = app
        .client
        .post(&format!("{}/auth/refresh", app.address))
        .header("Cookie", format!("refresh_token={}", session.refresh_cookie))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, without_bearer.status().as_u16());
}

#[tokio::test]
async fn refresh_from_another_user_agent_is_rejected() {
    let app = spawn_app();
    let session = app.signed_in("alice").await;

    let response = app
        .client
        .post(&format!("{}/auth/refresh", app.address))
        .bearer_auth(&session.access_token)
        .header("Cookie", format!("refresh_token={}", session.refresh_cookie))
        .header("User-Agent", "stolen-cookie-replayer/0.1")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(401, response.status().as_u16());

    // The legitimate client can still rotate
    let response = app.refresh(&session).await;
    assert_eq!(200, response.status().as_u16());
}

// --- Logout Tests ---

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = spawn_app();
    let session = app.signed_in("alice").await;

    let response = app.logout(&session.refresh_cookie).await;
    assert_eq!(200, response.status().as_u16());
    assert!(set_cookie_header(&response).starts_with("refresh_token="));
    assert!(app.repository.is_empty().await);

    let response = app.refresh(&session).await;
    assert_eq!(401, response.status().as_u16());

    // Second logout with the same cookie is still fine
    let response = app.logout(&session.refresh_cookie).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn logout_without_cookie_returns_401() {
    let app = spawn_app();

    let response = app
        .client
        .post(&format!("{}/auth/logout", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(401, response.status().as_u16());
}

/// Authentication Routes
///
/// Access tokens travel in `Authorization: Bearer`, refresh tokens only in
/// the `refresh_token` cookie (HttpOnly, Secure, SameSite=Strict).

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::{AUTHORIZATION, USER_AGENT};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{
    hash_password, validate_username, verify_password, ClientFingerprint, RotationProtocol,
    TokenPair,
};
use crate::error::{AppError, AuthError};
use crate::middleware::{bearer_token, AuthenticatedUser};
use crate::users::UserDirectory;

pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
}

/// Body of login and refresh responses; the refresh token is only in the cookie
#[derive(Serialize)]
pub struct AuthResponse {
    pub user_id: Option<i64>,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub user_id: i64,
}

/// User agent and peer IP of the caller
pub fn client_fingerprint(req: &HttpRequest) -> ClientFingerprint {
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    ClientFingerprint::new(user_agent, ip)
}

fn refresh_cookie(value: String, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build(REFRESH_COOKIE, value)
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_seconds))
        .finish()
}

fn token_response(protocol: &RotationProtocol, user_id: Option<i64>, pair: TokenPair) -> HttpResponse {
    let cookie = refresh_cookie(pair.refresh_token.to_string(), protocol.store().ttl_seconds());

    HttpResponse::Ok()
        .cookie(cookie)
        .insert_header((AUTHORIZATION, format!("Bearer {}", pair.access_token)))
        .json(AuthResponse {
            user_id,
            access_token: pair.access_token,
            token_type: "Bearer".to_string(),
            expires_in: protocol.signer().access_ttl_seconds(),
        })
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid username or weak password
/// - 409: username already registered
pub async fn register(
    form: web::Json<CredentialsRequest>,
    users: web::Data<dyn UserDirectory>,
) -> Result<HttpResponse, AppError> {
    let username = validate_username(&form.username)?;
    let password_hash = hash_password(&form.password)?;

    let user_id = users.create(&username, &password_hash).await?;

    tracing::info!(user_id = user_id, "User registered");
    Ok(HttpResponse::Created().json(RegisterResponse { user_id }))
}

/// POST /auth/login
///
/// Unknown username and wrong password give the same 401.
pub async fn login(
    req: HttpRequest,
    form: web::Json<CredentialsRequest>,
    users: web::Data<dyn UserDirectory>,
    protocol: web::Data<RotationProtocol>,
) -> Result<HttpResponse, AppError> {
    let credentials = users
        .credentials(form.username.trim())
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !verify_password(&form.password, &credentials.password_hash)? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let pair = protocol
        .issue_initial(credentials.user_id, &client_fingerprint(&req))
        .await?;

    tracing::info!(user_id = credentials.user_id, "User logged in");
    Ok(token_response(&protocol, Some(credentials.user_id), pair))
}

/// POST /auth/refresh
///
/// # Errors
/// - 401: missing tokens or any rejected credential, without saying why
/// - 500: storage failure
pub async fn refresh(
    req: HttpRequest,
    protocol: web::Data<RotationProtocol>,
) -> Result<HttpResponse, AppError> {
    let refresh_token = req
        .cookie(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(AuthError::MissingToken)?;
    let access_token = bearer_token(
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
    )
    .ok_or(AuthError::MissingToken)?;

    let pair = protocol
        .rotate(access_token, &refresh_token, &client_fingerprint(&req))
        .await?;

    Ok(token_response(&protocol, None, pair))
}

/// POST /auth/logout
///
/// Idempotent; the cookie is cleared either way.
pub async fn logout(
    req: HttpRequest,
    protocol: web::Data<RotationProtocol>,
) -> Result<HttpResponse, AppError> {
    let refresh_token = req
        .cookie(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or(AuthError::MissingToken)?;

    protocol.logout(&refresh_token).await?;

    let mut removal = refresh_cookie(String::new(), 0);
    removal.make_removal();
    Ok(HttpResponse::Ok().cookie(removal).finish())
}

/// GET /auth/me
pub async fn current_user(user: web::ReqData<AuthenticatedUser>) -> HttpResponse {
    HttpResponse::Ok().json(UserResponse {
        user_id: user.into_inner().0,
    })
}

//! Credential service: registration, login and logout.
//!
//! Successful registration and login answer with the user, a signed session
//! token, and the same token as an `HttpOnly` cookie. The realtime gateway
//! never calls into this module.

mod error;
pub mod password;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use store::{CredentialStore, InMemoryCredentialStore, NewUser, StoreError, User};
pub use token::{Claims, TokenIssuer};

use crate::metrics;
use crate::server::AppState;
use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Registration request body.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub phonenumber: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Login request body.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub phonenumber: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The public part of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub phonenumber: String,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            phonenumber: user.phonenumber.clone(),
        }
    }
}

/// Body of a successful registration or login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: UserView,
    pub token: String,
}

/// Auth routes, to be nested under `/api/auth`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    let result = register_user(&state, request).await;
    metrics::record_auth("register", status_of(&result, StatusCode::CREATED));
    let (user, token) = result?;

    info!(user = %user.id, "User registered");
    let cookie = session_cookie(&state.config.auth.cookie_name, token.clone(), state.tokens.ttl());
    Ok((
        StatusCode::CREATED,
        jar.add(cookie),
        Json(AuthResponse {
            message: "User Registered Successfully",
            user: UserView::from(&user),
            token,
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AuthError> {
    let result = login_user(&state, request).await;
    metrics::record_auth("login", status_of(&result, StatusCode::OK));
    let (user, token) = result?;

    debug!(user = %user.id, "User logged in");
    let cookie = session_cookie(&state.config.auth.cookie_name, token.clone(), state.tokens.ttl());
    Ok((
        StatusCode::OK,
        jar.add(cookie),
        Json(AuthResponse {
            message: "Login Successful",
            user: UserView::from(&user),
            token,
        }),
    ))
}

async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Json<Value>) {
    metrics::record_auth("logout", StatusCode::OK.as_u16());
    // Always emit the expired cookie, even when the request carried none.
    let expired = Cookie::build((state.config.auth.cookie_name.clone(), ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(time::Duration::ZERO)
        .expires(time::OffsetDateTime::UNIX_EPOCH)
        .build();

    (jar.add(expired), Json(json!({ "message": "Logout Successful" })))
}

async fn register_user(
    state: &AppState,
    request: RegisterRequest,
) -> Result<(User, String), AuthError> {
    let phonenumber = required(request.phonenumber, "phonenumber")?;
    let email = required(request.email, "email")?;
    let password = required(request.password, "password")?;

    create_account(state, phonenumber, email, password)
        .await
        .map_err(|e| {
            error!("Failed to create user: {e:#}");
            AuthError::RegistrationFailed
        })
}

async fn create_account(
    state: &AppState,
    phonenumber: String,
    email: String,
    password: String,
) -> anyhow::Result<(User, String)> {
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .context("Password hashing task failed")??;

    let user = state
        .credentials
        .create_user(NewUser {
            email,
            phonenumber,
            password_hash,
        })
        .await?;

    let token = state.tokens.issue(&user.id, false)?;
    Ok((user, token))
}

async fn login_user(state: &AppState, request: LoginRequest) -> Result<(User, String), AuthError> {
    let phonenumber = required(request.phonenumber, "phonenumber")?;
    let password = required(request.password, "password")?;

    match authenticate(state, &phonenumber, password).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => {
            debug!(phonenumber = %phonenumber, "Login rejected");
            Err(AuthError::InvalidCredentials)
        }
        Err(e) => {
            error!("Failed to login: {e:#}");
            Err(AuthError::LoginFailed)
        }
    }
}

/// Check credentials; `Ok(None)` means unknown user or wrong password.
async fn authenticate(
    state: &AppState,
    phonenumber: &str,
    password: String,
) -> anyhow::Result<Option<(User, String)>> {
    let Some(user) = state.credentials.find_by_phonenumber(phonenumber).await? else {
        return Ok(None);
    };

    let stored = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &stored))
        .await
        .context("Password verification task failed")??;
    if !valid {
        return Ok(None);
    }

    // Login carries the same privileges as registration.
    let token = state.tokens.issue(&user.id, false)?;
    Ok(Some((user, token)))
}

fn required(value: Option<String>, field: &'static str) -> Result<String, AuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingField(field))
}

fn status_of<T>(result: &Result<T, AuthError>, success: StatusCode) -> u16 {
    match result {
        Ok(_) => success.as_u16(),
        Err(e) => e.status().as_u16(),
    }
}

/// Build the session cookie carrying `token`.
#[must_use]
pub fn session_cookie(name: &str, token: String, ttl: Duration) -> Cookie<'static> {
    let max_age = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((name.to_string(), token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(time::Duration::seconds(max_age))
        .build()
}

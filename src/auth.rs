use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::error;

use crate::billing::LedgerService;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub success: bool,
    pub user_id: i32,
    pub role: String,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: String,
    pub subscription_tier: String,
    pub is_premium: bool,
    pub daily_usage: i32,
}

#[derive(FromRow)]
struct Credentials {
    id: i32,
    password_hash: String,
    role: String,
}

fn issue_token(user_id: i32, role: &str) -> Result<String, AppError> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(TOKEN_LIFETIME_HOURS))
        .expect("valid timestamp")
        .timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(crate::config::JWT_SECRET.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

fn session_cookie(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        value.parse().expect("valid header value"),
    );
    headers
}

pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SessionInfo>)> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("Username required".into()));
    }
    if !payload.email.contains('@') {
        return Err(AppError::BadRequest("Invalid email".into()));
    }
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;

    let inserted: Result<i32, sqlx::Error> = sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash, role) VALUES ($1, $2, $3, 'OWNER') RETURNING id",
    )
    .bind(username)
    .bind(&payload.email)
    .bind(hash.to_string())
    .fetch_one(&pool)
    .await;

    let user_id = inserted.map_err(|e| {
        if let sqlx::Error::Database(db_err) = &e {
            match db_err.constraint() {
                Some("users_email_key") => {
                    return AppError::BadRequest("Email already registered".into())
                }
                Some("users_username_key") => {
                    return AppError::BadRequest("Username already taken".into())
                }
                _ => {}
            }
        }
        AppError::Db(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(SessionInfo {
            success: true,
            user_id,
            role: "OWNER".to_string(),
        }),
    ))
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<SessionInfo>)> {
    let credentials = sqlx::query_as::<_, Credentials>(
        "SELECT id, password_hash, role FROM users WHERE email = $1 AND is_active = TRUE",
    )
    .bind(&payload.email)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error while fetching user");
        AppError::Db(e)
    })?
    .ok_or(AppError::Unauthorized)?;

    let parsed = PasswordHash::new(&credentials.password_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }

    let token = issue_token(credentials.id, &credentials.role)?;
    let headers = session_cookie(&format!(
        "auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/"
    ));
    Ok((
        headers,
        Json(SessionInfo {
            success: true,
            user_id: credentials.id,
            role: credentials.role,
        }),
    ))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    (
        session_cookie("auth_token=deleted; HttpOnly; Path=/; Max-Age=0"),
        "Logged out",
    )
}

/// Account readout: identity plus the subscription snapshot the account page
/// renders.
pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, role }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    #[derive(FromRow)]
    struct Identity {
        username: String,
        email: String,
    }

    let identity =
        sqlx::query_as::<_, Identity>("SELECT username, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error while fetching user");
                AppError::Db(e)
            })?
            .ok_or(AppError::NotFound)?;

    let ledger = LedgerService::new(pool);
    let profile = ledger.profile_for_user(user_id).await?;
    let is_premium = profile.is_premium(Utc::now());
    Ok(Json(UserInfo {
        id: user_id,
        username: identity.username,
        email: identity.email,
        role,
        subscription_tier: profile.subscription_tier,
        is_premium,
        daily_usage: profile.daily_usage_count,
    }))
}

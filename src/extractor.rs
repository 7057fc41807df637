use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    sub: i32,
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

pub struct AuthUser {
    pub user_id: i32,
    pub role: String,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role == "ADMIN"
    }
}

/// Some surfaces personalize for a session when one exists but stay open to
/// anonymous callers (dashboard summary, gateway success callback).
pub struct OptionalAuthUser(pub Option<AuthUser>);

fn bearer_or_cookie_token(parts: &Parts) -> Option<String> {
    if let Some(cookie_header) = parts.headers.get(axum::http::header::COOKIE) {
        let cookies = cookie_header.to_str().unwrap_or("");
        let token = cookies.split(';').find_map(|c| {
            let c = c.trim();
            c.strip_prefix("auth_token=").map(|s| s.to_string())
        });
        if token.is_some() {
            return token;
        }
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|authz| authz.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.to_string()))
}

fn decode_user(token: &str) -> Option<AuthUser> {
    let secret = crate::config::JWT_SECRET.as_str();
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|decoded| AuthUser {
        user_id: decoded.claims.sub,
        role: decoded.claims.role,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_or_cookie_token(parts)
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;
        decode_user(&token).ok_or((StatusCode::UNAUTHORIZED, "Invalid token".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = bearer_or_cookie_token(parts).and_then(|token| decode_user(&token));
        Ok(OptionalAuthUser(user))
    }
}

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::security::RequestMeta;
use crate::state::AppState;

pub const ACCESS_COOKIE_NAME: &str = "access";

const ISSUER: &str = "exam-buddy";
const AUDIENCE: &str = "exam-buddy-web";

/// The acting user, resolved from the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub user_id: i32,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

pub fn validate_access_jwt(secret: &str, token: &str) -> anyhow::Result<AuthUser> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(AuthUser {
        user_id: data.claims.sub.parse()?,
        username: data.claims.username,
    })
}

/// Mints an access token for the login service that fronts this backend.
pub fn issue_access_jwt(
    secret: &str,
    user_id: i32,
    username: &str,
    ttl: time::Duration,
) -> anyhow::Result<String> {
    let now = time::OffsetDateTime::now_utc();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: (now + ttl).unix_timestamp() as usize,
        iat: now.unix_timestamp() as usize,
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
    };

    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(ACCESS_COOKIE_NAME)
            .map(|c| c.value().to_string())
    })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestMeta>()
            .map(|m| m.request_id.clone())
            .unwrap_or_default();

        let Some(token) = access_token(&parts.headers) else {
            return Err(
                ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "missing access token")
                    .with_hint("send the access token as a Bearer header or the `access` cookie")
                    .with_request_id(&request_id),
            );
        };

        validate_access_jwt(&state.jwt_secret, &token).map_err(|_| {
            ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid access token")
                .with_request_id(&request_id)
        })
    }
}

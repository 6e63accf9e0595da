//! Session-token extraction.
//!
//! The OAuth login flow lives outside the core; what arrives here is a
//! signed bearer token carrying the external subject. The extractor
//! validates it, upserts the user (first authenticated contact creates the
//! row and its webhook token) and derives the root bit from the configured
//! root email.

use std::future::{ready, Ready};

use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::catalog::entity::User;

use super::error::ApiError;
use super::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// External subject id, unique per identity-provider account.
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

/// The authenticated principal: a catalog user plus the root bit.
pub struct AuthUser {
    pub user: User,
    pub is_root: bool,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::internal("app state missing from request"))?;

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| ApiError::Unauthorized("invalid session token".to_string()))?
    .claims;

    let user = state.catalog.upsert_user(
        &claims.sub,
        &claims.email,
        claims.name.as_deref().unwrap_or(&claims.email),
    )?;
    let is_root = state.config.root_email.as_deref() == Some(user.email.as_str());
    Ok(AuthUser { user, is_root })
}

/// Issues a session token; used by tests and by the external login flow's
/// sibling process, which shares the secret.
pub fn issue_token(
    jwt_secret: &str,
    subject: &str,
    email: &str,
    expires_at: usize,
) -> Result<String, jsonwebtoken::errors::Error> {
    #[derive(serde::Serialize)]
    struct OutgoingClaims<'a> {
        sub: &'a str,
        email: &'a str,
        exp: usize,
    }
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &OutgoingClaims {
            sub: subject,
            email,
            exp: expires_at,
        },
        &jsonwebtoken::EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

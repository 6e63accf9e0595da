//! Node volume migration endpoints. Migration and rollback are
//! asynchronous: the request is accepted, the state machine runs on a
//! detached thread.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::http::auth::AuthUser;
use crate::http::error::ApiError;
use crate::http::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MigrateRequest {
    #[serde(default)]
    pub size_gb: Option<u32>,
}

pub async fn migrate(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: Option<web::Json<MigrateRequest>>,
) -> Result<HttpResponse, ApiError> {
    let size_gb = body.map(|b| b.into_inner()).unwrap_or_default().size_gb;
    let migration = state
        .migrator
        .request(&auth.user.id, auth.is_root, &path, size_gb)?;
    Ok(HttpResponse::Accepted().json(migration))
}

pub async fn rollback(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let migration = state
        .migrator
        .rollback_request(&auth.user.id, auth.is_root, &path)?;
    Ok(HttpResponse::Accepted().json(migration))
}

pub async fn delete_backup(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let migrator = state.migrator.clone();
    let user_id = auth.user.id.clone();
    let is_root = auth.is_root;
    let node_id = path.into_inner();
    web::block(move || migrator.delete_backup(&user_id, is_root, &node_id)).await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn status(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let migration = state
        .migrator
        .status(&auth.user.id, auth.is_root, &path)?
        .ok_or(ApiError::NotFound)?;
    Ok(HttpResponse::Ok().json(migration))
}
